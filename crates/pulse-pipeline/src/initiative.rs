use pulse_completion::{CompletionRequest, decode_structured};
use pulse_core::{MemoryRecord, NewProposal, NewStep, Proposal, Step};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{info, warn};

use crate::goal::ResolvedGoal;
use crate::{PipelineContext, StageError};

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Declined,
    Proposed {
        proposal: Proposal,
        steps: Vec<Step>,
    },
}

#[derive(Debug, Deserialize)]
struct InitiativeDecision {
    should_propose: bool,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "summary")]
    reason: Option<String>,
    #[serde(default)]
    steps: Option<Vec<PlannedStep>>,
}

#[derive(Debug, Deserialize)]
struct PlannedStep {
    #[serde(default, deserialize_with = "lenient_order")]
    order: Option<i64>,
    title: String,
}

// Nothing is written until the whole decision validates.
pub fn plan_initiative(
    ctx: &PipelineContext<'_>,
    goal: &ResolvedGoal,
    memories: &[MemoryRecord],
) -> Result<PlanOutcome, StageError> {
    let request = CompletionRequest::prompt(initiative_prompt(&goal.title, memories)).structured();
    let raw = ctx.completion.complete(&request)?;
    let decision: InitiativeDecision = decode_structured(&raw)?;

    if !decision.should_propose {
        info!(goal = %goal.title, "agent declined to propose");
        return Ok(PlanOutcome::Declined);
    }

    let title = decision
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .ok_or_else(|| StageError::Content("positive decision without a title".to_string()))?;
    let steps = planned_steps(decision.steps.unwrap_or_default())?;

    let proposal = ctx.store.insert_proposal(
        &NewProposal::initiative(ctx.agent_id, title).with_summary(decision.reason),
    )?;
    if proposal.id.trim().is_empty() {
        return Err(StageError::Integrity(
            "proposal insert returned no identifier".to_string(),
        ));
    }
    info!(proposal_id = %proposal.id, title = %proposal.title, steps = steps.len(), "initiative proposed");

    if steps.is_empty() {
        return Ok(PlanOutcome::Proposed {
            proposal,
            steps: Vec::new(),
        });
    }
    let steps = ctx
        .store
        .insert_steps(&proposal.id, &steps)
        .inspect_err(|err| {
            warn!(proposal_id = %proposal.id, error = %err, "proposal stored without its steps");
        })?;
    Ok(PlanOutcome::Proposed { proposal, steps })
}

// Integral numbers and numeric strings; anything else falls back to position.
fn lenient_order<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(order_from_value))
}

fn order_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|order| order.fract() == 0.0 && order.abs() < i64::MAX as f64)
                .map(|order| order as i64)
        }),
        Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
}

fn planned_steps(planned: Vec<PlannedStep>) -> Result<Vec<NewStep>, StageError> {
    planned
        .into_iter()
        .enumerate()
        .map(|(idx, step)| {
            let title = step.title.trim();
            if title.is_empty() {
                return Err(StageError::Content(format!(
                    "planned step {} has no title",
                    idx + 1
                )));
            }
            let order = step.order.unwrap_or(idx as i64 + 1);
            Ok(NewStep::new(order, title))
        })
        .collect()
}

fn initiative_prompt(goal: &str, memories: &[MemoryRecord]) -> String {
    let mut prompt = format!(
        "You are a quantitative research analyst pursuing this goal:\n{goal}\n\n\
         Decide whether to propose a new unit of research work toward it right now.\n"
    );
    if !memories.is_empty() {
        prompt.push_str("\nWhat you have learned recently (most recent first):\n");
        for memory in memories {
            prompt.push_str(&format!("- ({}) {}\n", memory.kind.as_str(), memory.content));
        }
    }
    prompt.push_str(
        "\nReply with JSON only. To propose: \
         {\"should_propose\": true, \"title\": \"...\", \"reason\": \"...\", \
         \"steps\": [{\"order\": 1, \"title\": \"...\"}]}. \
         Otherwise: {\"should_propose\": false}",
    );
    prompt
}
