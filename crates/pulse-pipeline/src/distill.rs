use pulse_completion::{CompletionRequest, decode_structured};
use pulse_core::{Event, MemoryKind, MemoryRecord, NewMemoryRecord};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{PipelineContext, StageError};

const DISTILLED_TAG: &str = "distilled";

#[derive(Debug, Clone, PartialEq)]
pub enum DistillOutcome {
    NoNewEvents,
    Committed(MemoryRecord),
    Discarded { confidence: f64 },
}

#[derive(Debug, Deserialize)]
struct DistilledInsight {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    content: String,
    confidence: f64,
}

pub fn cursor_name(conversation_kind: &str) -> String {
    format!("distill:{conversation_kind}")
}

// The cursor only moves once the completion has been parsed.
pub fn distill_memory(ctx: &PipelineContext<'_>) -> Result<DistillOutcome, StageError> {
    let config = ctx.config;
    let cursor = cursor_name(&config.conversation_kind);
    let after = ctx.store.cursor(&cursor)?;
    let events = ctx
        .store
        .recent_events(&config.conversation_kind, after, config.distill_window)?;
    let Some(newest_id) = events.iter().map(|event| event.id).max() else {
        debug!(kind = %config.conversation_kind, "no new dialogue to distill");
        return Ok(DistillOutcome::NoNewEvents);
    };

    let request = CompletionRequest::prompt(distillation_prompt(&events)).structured();
    let raw = ctx.completion.complete(&request)?;
    let insight: DistilledInsight = decode_structured(&raw)?;

    let content = insight.content.trim();
    if content.is_empty() {
        return Err(StageError::Content("distilled insight has no content".to_string()));
    }
    if !insight.confidence.is_finite() || !(0.0..=1.0).contains(&insight.confidence) {
        return Err(StageError::Content(format!(
            "confidence {} is outside [0, 1]",
            insight.confidence
        )));
    }

    let outcome = if insight.confidence >= config.confidence_threshold {
        let kind = insight
            .kind
            .as_deref()
            .map(MemoryKind::parse_lenient)
            .unwrap_or(MemoryKind::Insight);
        let record = ctx.store.insert_memory(&NewMemoryRecord {
            agent_id: ctx.agent_id.to_string(),
            kind,
            content: content.to_string(),
            confidence: insight.confidence,
            tags: vec![DISTILLED_TAG.to_string()],
        })?;
        info!(
            memory_id = record.id,
            kind = kind.as_str(),
            confidence = record.confidence,
            "memory committed"
        );
        DistillOutcome::Committed(record)
    } else {
        info!(
            confidence = insight.confidence,
            threshold = config.confidence_threshold,
            "insight below threshold, discarded"
        );
        DistillOutcome::Discarded {
            confidence: insight.confidence,
        }
    };

    ctx.store.advance_cursor(&cursor, newest_id)?;
    Ok(outcome)
}

fn distillation_prompt(events: &[Event]) -> String {
    let dialogue = events
        .iter()
        .map(|event| match &event.agent_id {
            Some(speaker) => format!("- [{speaker}] {}", event.summary.trim()),
            None => format!("- {}", event.summary.trim()),
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You distill memories for a quantitative research agent.\n\
         Read the dialogue below (most recent first) and extract exactly one durable \
         insight, strategy or lesson worth remembering.\n\
         Score how confident you are that it is correct and useful, from 0 to 1.\n\n\
         Dialogue:\n{dialogue}\n\n\
         Reply with JSON only: \
         {{\"type\": \"insight|strategy|lesson\", \"content\": \"...\", \"confidence\": 0.0}}"
    )
}
