#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use pulse_common::PipelineConfig;
use pulse_completion::{CompletionClient, CompletionError, CompletionRequest};
use pulse_core::{
    Event, Goal, MemoryRecord, NewEvent, NewMemoryRecord, NewProposal, NewStep, Proposal, Step,
    StepClaim,
};
use pulse_pipeline::PipelineContext;
use pulse_store::{MissionStore, SqliteStore};
use tempfile::{TempDir, tempdir};

pub const AGENT: &str = "analyst";

pub fn setup_store() -> (TempDir, SqliteStore) {
    let tmp = tempdir().expect("tempdir");
    let store = SqliteStore::open(&tmp.path().join("pulse.db")).expect("open store");
    (tmp, store)
}

pub fn say(store: &SqliteStore, speaker: &str, text: &str) -> Event {
    store
        .record_event(&NewEvent::new("conversation", text).with_agent(speaker))
        .expect("record event")
}

pub fn context<'a>(
    store: &'a dyn MissionStore,
    completion: &'a dyn CompletionClient,
    config: &'a PipelineConfig,
) -> PipelineContext<'a> {
    PipelineContext {
        store,
        completion,
        agent_id: AGENT,
        config,
    }
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub text: String,
    pub structured: bool,
    pub max_output_tokens: Option<u32>,
}

/// Replays canned replies in order and records what it was asked.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: RefCell<VecDeque<Result<String, CompletionError>>>,
    seen: RefCell<Vec<SeenRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.borrow_mut().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, err: CompletionError) -> Self {
        self.replies.borrow_mut().push_back(Err(err));
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.borrow().len()
    }
}

impl CompletionClient for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.seen.borrow_mut().push(SeenRequest {
            text: request.user_text(),
            structured: request.structured,
            max_output_tokens: request.max_output_tokens,
        });
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::Transport("script exhausted".to_string())))
    }
}

/// Delegates to a real store but can be told to fail selected operations.
pub struct FaultyStore<'a> {
    pub inner: &'a SqliteStore,
    pub fail_goal: bool,
    pub fail_proposal: bool,
    pub fail_memories: bool,
    pub fail_complete: bool,
}

impl<'a> FaultyStore<'a> {
    pub fn new(inner: &'a SqliteStore) -> Self {
        Self {
            inner,
            fail_goal: false,
            fail_proposal: false,
            fail_memories: false,
            fail_complete: false,
        }
    }
}

impl MissionStore for FaultyStore<'_> {
    fn recent_events(&self, kind: &str, after_id: Option<i64>, limit: usize) -> Result<Vec<Event>> {
        self.inner.recent_events(kind, after_id, limit)
    }

    fn record_event(&self, event: &NewEvent) -> Result<Event> {
        self.inner.record_event(event)
    }

    fn insert_memory(&self, record: &NewMemoryRecord) -> Result<MemoryRecord> {
        self.inner.insert_memory(record)
    }

    fn recent_memories(&self, agent_id: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        if self.fail_memories {
            return Err(anyhow!("memory table unreachable"));
        }
        self.inner.recent_memories(agent_id, limit)
    }

    fn top_active_goal(&self) -> Result<Option<Goal>> {
        if self.fail_goal {
            return Err(anyhow!("connection refused"));
        }
        self.inner.top_active_goal()
    }

    fn insert_proposal(&self, proposal: &NewProposal) -> Result<Proposal> {
        if self.fail_proposal {
            return Err(anyhow!("column \"summary\" does not exist"));
        }
        self.inner.insert_proposal(proposal)
    }

    fn insert_steps(&self, proposal_id: &str, steps: &[NewStep]) -> Result<Vec<Step>> {
        self.inner.insert_steps(proposal_id, steps)
    }

    fn next_pending_step(&self, claim_ttl_ms: u64) -> Result<Option<Step>> {
        self.inner.next_pending_step(claim_ttl_ms)
    }

    fn claim_step(&self, claim: &StepClaim, claim_ttl_ms: u64) -> Result<Option<String>> {
        self.inner.claim_step(claim, claim_ttl_ms)
    }

    fn complete_step(&self, step_id: &str, claim_token: &str, note: &str) -> Result<bool> {
        if self.fail_complete {
            return Err(anyhow!("database is locked"));
        }
        self.inner.complete_step(step_id, claim_token, note)
    }

    fn release_step(&self, claim: &StepClaim, claim_token: &str) -> Result<bool> {
        self.inner.release_step(claim, claim_token)
    }

    fn cursor(&self, name: &str) -> Result<Option<i64>> {
        self.inner.cursor(name)
    }

    fn advance_cursor(&self, name: &str, position: i64) -> Result<()> {
        self.inner.advance_cursor(name, position)
    }
}

/// Simulates an overlapping invocation that claims the selected step on its
/// own connection between our select and our claim.
pub struct RacingStore<'a> {
    pub inner: &'a SqliteStore,
    pub rival: &'a SqliteStore,
    pub rival_token: RefCell<Option<String>>,
}

impl MissionStore for RacingStore<'_> {
    fn recent_events(&self, kind: &str, after_id: Option<i64>, limit: usize) -> Result<Vec<Event>> {
        self.inner.recent_events(kind, after_id, limit)
    }

    fn record_event(&self, event: &NewEvent) -> Result<Event> {
        self.inner.record_event(event)
    }

    fn insert_memory(&self, record: &NewMemoryRecord) -> Result<MemoryRecord> {
        self.inner.insert_memory(record)
    }

    fn recent_memories(&self, agent_id: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        self.inner.recent_memories(agent_id, limit)
    }

    fn top_active_goal(&self) -> Result<Option<Goal>> {
        self.inner.top_active_goal()
    }

    fn insert_proposal(&self, proposal: &NewProposal) -> Result<Proposal> {
        self.inner.insert_proposal(proposal)
    }

    fn insert_steps(&self, proposal_id: &str, steps: &[NewStep]) -> Result<Vec<Step>> {
        self.inner.insert_steps(proposal_id, steps)
    }

    fn next_pending_step(&self, claim_ttl_ms: u64) -> Result<Option<Step>> {
        self.inner.next_pending_step(claim_ttl_ms)
    }

    fn claim_step(&self, claim: &StepClaim, claim_ttl_ms: u64) -> Result<Option<String>> {
        let rival = self.rival.claim_step(claim, claim_ttl_ms)?;
        *self.rival_token.borrow_mut() = rival;
        self.inner.claim_step(claim, claim_ttl_ms)
    }

    fn complete_step(&self, step_id: &str, claim_token: &str, note: &str) -> Result<bool> {
        self.inner.complete_step(step_id, claim_token, note)
    }

    fn release_step(&self, claim: &StepClaim, claim_token: &str) -> Result<bool> {
        self.inner.release_step(claim, claim_token)
    }

    fn cursor(&self, name: &str) -> Result<Option<i64>> {
        self.inner.cursor(name)
    }

    fn advance_cursor(&self, name: &str, position: i64) -> Result<()> {
        self.inner.advance_cursor(name, position)
    }
}
