use pulse_completion::CompletionRequest;
use pulse_core::{MemoryRecord, Step, StepClaim};
use tracing::{debug, info, warn};

use crate::goal::ResolvedGoal;
use crate::{PipelineContext, StageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Idle,
    Completed { step_id: String, note: String },
    Superseded { step_id: String },
}

// Failures after the claim hand the step back in its observed state.
pub fn execute_next_step(
    ctx: &PipelineContext<'_>,
    goal: &ResolvedGoal,
    memories: &[MemoryRecord],
) -> Result<ExecuteOutcome, StageError> {
    let Some(step) = ctx.store.next_pending_step(ctx.config.claim_ttl_ms)? else {
        debug!("no pending step");
        return Ok(ExecuteOutcome::Idle);
    };
    if step.status.is_terminal() {
        return Err(StageError::Integrity(format!(
            "store offered finished step {} for execution",
            step.id
        )));
    }

    let claim = StepClaim::observed(&step);
    let Some(token) = ctx.store.claim_step(&claim, ctx.config.claim_ttl_ms)? else {
        info!(step_id = %step.id, "step claimed by another invocation");
        return Ok(ExecuteOutcome::Superseded { step_id: step.id });
    };
    debug!(step_id = %step.id, from = claim.expected_status.as_str(), "step claimed");

    match resolve_claimed(ctx, goal, memories, &step, &token) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            match ctx.store.release_step(&claim, &token) {
                Ok(true) => debug!(step_id = %step.id, "claim released"),
                Ok(false) => warn!(step_id = %step.id, "claim was already gone on release"),
                Err(release_err) => {
                    warn!(step_id = %step.id, error = %release_err, "failed to release claim")
                }
            }
            Err(err)
        }
    }
}

fn resolve_claimed(
    ctx: &PipelineContext<'_>,
    goal: &ResolvedGoal,
    memories: &[MemoryRecord],
    step: &Step,
    token: &str,
) -> Result<ExecuteOutcome, StageError> {
    let request = CompletionRequest::prompt(step_prompt(&goal.title, &step.title, memories))
        .with_max_output_tokens(ctx.config.step_note_max_tokens);
    let raw = ctx.completion.complete(&request)?;
    let note = raw.trim();
    if note.is_empty() {
        return Err(StageError::Content(format!(
            "empty resolution for step {}",
            step.id
        )));
    }

    if !ctx.store.complete_step(&step.id, token, note)? {
        info!(step_id = %step.id, "claim lost before completion, note dropped");
        return Ok(ExecuteOutcome::Superseded {
            step_id: step.id.clone(),
        });
    }
    info!(step_id = %step.id, proposal_id = %step.proposal_id, "step done");
    Ok(ExecuteOutcome::Completed {
        step_id: step.id.clone(),
        note: note.to_string(),
    })
}

fn step_prompt(goal: &str, step_title: &str, memories: &[MemoryRecord]) -> String {
    let mut prompt = format!(
        "Goal: {goal}\nStep: {step_title}\n\n\
         Write a concise technical resolution for this step: a code or procedure \
         sketch an engineer could act on directly.\n"
    );
    if !memories.is_empty() {
        prompt.push_str("\nRelevant notes:\n");
        for memory in memories {
            prompt.push_str(&format!("- {}\n", memory.content));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_combines_goal_and_step() {
        let prompt = step_prompt("find mean reversion edges", "fit an OU process", &[]);
        assert!(prompt.starts_with("Goal: find mean reversion edges\nStep: fit an OU process"));
        assert!(!prompt.contains("Relevant notes"));
    }
}
