use pulse_core::{
    Goal, MemoryKind, NewEvent, NewMemoryRecord, NewProposal, NewStep, StepClaim, StepStatus,
};
use pulse_store::{MissionStore, SqliteStore};
use tempfile::tempdir;

const CLAIM_TTL_MS: u64 = 60_000;

fn setup_store() -> (tempfile::TempDir, SqliteStore) {
    let tmp = tempdir().expect("tempdir");
    let store = SqliteStore::open(&tmp.path().join("pulse.db")).expect("open store");
    (tmp, store)
}

fn seed_proposal_with_steps(store: &SqliteStore, titles: &[&str]) -> (String, Vec<String>) {
    let proposal = store
        .insert_proposal(&NewProposal::initiative("analyst", "volatility study"))
        .expect("insert proposal");
    let steps: Vec<NewStep> = titles
        .iter()
        .enumerate()
        .map(|(idx, title)| NewStep::new(idx as i64 + 1, *title))
        .collect();
    let inserted = store
        .insert_steps(&proposal.id, &steps)
        .expect("insert steps");
    (
        proposal.id,
        inserted.into_iter().map(|step| step.id).collect(),
    )
}

#[test]
fn reopening_does_not_reapply_migrations() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("nested").join("pulse.db");
    let first = SqliteStore::open(&db).expect("first open");
    assert_eq!(first.schema_version().expect("version"), 2);
    drop(first);
    let second = SqliteStore::open(&db).expect("second open");
    assert_eq!(second.schema_version().expect("version"), 2);
}

#[test]
fn top_active_goal_prefers_lowest_priority_number() {
    let (_tmp, store) = setup_store();
    assert!(store.top_active_goal().expect("query").is_none());

    store
        .add_goal(&Goal::new("secondary research", 5))
        .expect("add goal");
    store
        .add_goal(&Goal::new("archived but urgent", 0).with_status("archived"))
        .expect("add goal");
    store
        .add_goal(&Goal::new("primary research", 1))
        .expect("add goal");

    let top = store
        .top_active_goal()
        .expect("query")
        .expect("active goal");
    assert_eq!(top.title, "primary research");
    assert_eq!(top.priority, 1);
}

#[test]
fn blank_titled_goal_is_passed_over() {
    let (_tmp, store) = setup_store();
    store.add_goal(&Goal::new("   ", 0)).expect("add goal");
    store
        .add_goal(&Goal::new("liquidity survey", 2))
        .expect("add goal");

    let top = store
        .top_active_goal()
        .expect("query")
        .expect("active goal");
    assert_eq!(top.title, "liquidity survey");
}

#[test]
fn recent_events_filters_kind_and_cursor_newest_first() {
    let (_tmp, store) = setup_store();
    let first = store
        .record_event(&NewEvent::new("conversation", "first turn"))
        .expect("record");
    store
        .record_event(&NewEvent::new("heartbeat_pulse", "pulse"))
        .expect("record");
    let second = store
        .record_event(&NewEvent::new("conversation", "second turn").with_agent("boss"))
        .expect("record");

    let events = store
        .recent_events("conversation", None, 10)
        .expect("events");
    let summaries: Vec<&str> = events.iter().map(|e| e.summary.as_str()).collect();
    assert_eq!(summaries, vec!["second turn", "first turn"]);

    let after = store
        .recent_events("conversation", Some(first.id), 10)
        .expect("events");
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, second.id);
    assert_eq!(after[0].agent_id.as_deref(), Some("boss"));
}

#[test]
fn memories_roundtrip_tags_most_recent_first() {
    let (_tmp, store) = setup_store();
    for (content, confidence) in [("older", 0.6), ("newer", 0.9)] {
        store
            .insert_memory(&NewMemoryRecord {
                agent_id: "analyst".to_string(),
                kind: MemoryKind::Lesson,
                content: content.to_string(),
                confidence,
                tags: vec!["distilled".to_string()],
            })
            .expect("insert memory");
    }
    let memories = store.recent_memories("analyst", 1).expect("memories");
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].content, "newer");
    assert_eq!(memories[0].kind, MemoryKind::Lesson);
    assert_eq!(memories[0].tags, vec!["distilled".to_string()]);
    assert!(store.recent_memories("boss", 5).expect("memories").is_empty());
}

#[test]
fn proposal_without_summary_is_stored_without_one() {
    let (_tmp, store) = setup_store();
    let bare = store
        .insert_proposal(&NewProposal::initiative("analyst", "no reason given"))
        .expect("insert");
    let with_reason = store
        .insert_proposal(
            &NewProposal::requested("boss", "explain drawdown")
                .with_summary(Some("risk review".to_string())),
        )
        .expect("insert");

    let stored = store
        .get_proposal(&bare.id)
        .expect("lookup")
        .expect("exists");
    assert!(stored.summary.is_none());
    assert!(stored.is_initiative);
    assert_eq!(stored.status, "pending");

    let stored = store
        .get_proposal(&with_reason.id)
        .expect("lookup")
        .expect("exists");
    assert_eq!(stored.summary.as_deref(), Some("risk review"));
    assert!(!stored.is_initiative);
}

#[test]
fn steps_for_unknown_proposal_are_rejected_as_a_batch() {
    let (_tmp, store) = setup_store();
    let err = store
        .insert_steps(
            "missing-proposal",
            &[NewStep::new(1, "a"), NewStep::new(2, "b")],
        )
        .expect_err("foreign key should reject orphan steps");
    assert!(err.to_string().contains("missing-proposal"));
    assert_eq!(store.count_steps().expect("count"), 0);
}

#[test]
fn pending_selection_follows_step_order_and_skips_done() {
    let (_tmp, store) = setup_store();
    let (proposal_id, step_ids) = seed_proposal_with_steps(&store, &["collect", "analyze"]);

    let first = store
        .next_pending_step(CLAIM_TTL_MS)
        .expect("select")
        .expect("pending step");
    assert_eq!(first.id, step_ids[0]);
    assert_eq!(first.status, StepStatus::Todo);

    let token = store
        .claim_step(&StepClaim::observed(&first), CLAIM_TTL_MS)
        .expect("claim")
        .expect("claim should win");
    assert!(store
        .complete_step(&first.id, &token, "pull OHLCV bars")
        .expect("complete"));

    let next = store
        .next_pending_step(CLAIM_TTL_MS)
        .expect("select")
        .expect("pending step");
    assert_eq!(next.id, step_ids[1]);

    let steps = store.list_steps(Some(&proposal_id)).expect("list");
    assert_eq!(steps[0].status, StepStatus::Done);
    assert_eq!(steps[0].technical_note.as_deref(), Some("pull OHLCV bars"));
    assert_eq!(steps[1].status, StepStatus::Todo);
}

#[test]
fn concurrent_claims_on_one_step_have_a_single_winner() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("pulse.db");
    let first_run = SqliteStore::open(&db).expect("open first connection");
    let second_run = SqliteStore::open(&db).expect("open second connection");
    seed_proposal_with_steps(&first_run, &["only step"]);

    let seen_by_first = first_run.next_pending_step(CLAIM_TTL_MS).expect("select").expect("step");
    let seen_by_second = second_run.next_pending_step(CLAIM_TTL_MS).expect("select").expect("step");
    assert_eq!(seen_by_first.id, seen_by_second.id);

    let winner = first_run
        .claim_step(&StepClaim::observed(&seen_by_first), CLAIM_TTL_MS)
        .expect("claim");
    let loser = second_run
        .claim_step(&StepClaim::observed(&seen_by_second), CLAIM_TTL_MS)
        .expect("claim");
    let token = winner.expect("first claim should win");
    assert!(loser.is_none());

    assert!(!second_run
        .complete_step(&seen_by_second.id, "forged-token", "late note")
        .expect("complete"));
    assert!(first_run
        .complete_step(&seen_by_first.id, &token, "winning note")
        .expect("complete"));

    let step = second_run
        .get_step(&seen_by_first.id)
        .expect("lookup")
        .expect("exists");
    assert_eq!(step.status, StepStatus::Done);
    assert_eq!(step.technical_note.as_deref(), Some("winning note"));
}

#[test]
fn released_claim_restores_observed_state() {
    let (_tmp, store) = setup_store();
    let proposal = store
        .insert_proposal(&NewProposal::requested("boss", "queued work"))
        .expect("insert");
    let steps = store
        .insert_steps(
            &proposal.id,
            &[NewStep::new(1, "queued step").with_status(StepStatus::Queued)],
        )
        .expect("insert steps");

    let claim = StepClaim::observed(&steps[0]);
    let token = store.claim_step(&claim, CLAIM_TTL_MS).expect("claim").expect("won");
    let claimed = store.get_step(&steps[0].id).expect("lookup").expect("exists");
    assert_eq!(claimed.status, StepStatus::Thinking);

    assert!(store.release_step(&claim, &token).expect("release"));
    let released = store.get_step(&steps[0].id).expect("lookup").expect("exists");
    assert_eq!(released.status, StepStatus::Queued);
    assert!(released.claim_token.is_none());
    assert!(released.technical_note.is_none());
}

#[test]
fn live_claim_is_neither_selected_nor_taken_over() {
    let tmp = tempdir().expect("tempdir");
    let db = tmp.path().join("pulse.db");
    let first_run = SqliteStore::open(&db).expect("open first connection");
    let second_run = SqliteStore::open(&db).expect("open second connection");
    seed_proposal_with_steps(&first_run, &["in flight"]);

    let step = first_run
        .next_pending_step(CLAIM_TTL_MS)
        .expect("select")
        .expect("step");
    first_run
        .claim_step(&StepClaim::observed(&step), CLAIM_TTL_MS)
        .expect("claim")
        .expect("won");

    assert!(second_run
        .next_pending_step(CLAIM_TTL_MS)
        .expect("select")
        .is_none());
    let claimed = second_run.get_step(&step.id).expect("lookup").expect("exists");
    assert_eq!(claimed.status, StepStatus::Thinking);
    let takeover = second_run
        .claim_step(&StepClaim::observed(&claimed), CLAIM_TTL_MS)
        .expect("claim");
    assert!(takeover.is_none());
}

#[test]
fn expired_claim_can_be_reclaimed_once() {
    let (_tmp, store) = setup_store();
    seed_proposal_with_steps(&store, &["abandoned"]);
    let step = store
        .next_pending_step(CLAIM_TTL_MS)
        .expect("select")
        .expect("step");
    let abandoned = store
        .claim_step(&StepClaim::observed(&step), CLAIM_TTL_MS)
        .expect("claim")
        .expect("won");

    // A zero ttl treats every claim as expired.
    let stale = store.next_pending_step(0).expect("select").expect("step");
    assert_eq!(stale.status, StepStatus::Thinking);
    assert_eq!(stale.claim_token.as_deref(), Some(abandoned.as_str()));
    let retaken = store
        .claim_step(&StepClaim::observed(&stale), 0)
        .expect("claim")
        .expect("expired claim should be retaken");
    assert_ne!(retaken, abandoned);

    // The observed token is gone, so a second takeover misses.
    assert!(store
        .claim_step(&StepClaim::observed(&stale), 0)
        .expect("claim")
        .is_none());
    assert!(!store
        .complete_step(&step.id, &abandoned, "late note")
        .expect("complete"));
    assert!(store
        .complete_step(&step.id, &retaken, "resumed note")
        .expect("complete"));
}

#[test]
fn cursor_never_moves_backwards() {
    let (_tmp, store) = setup_store();
    assert_eq!(store.cursor("distill:conversation").expect("cursor"), None);
    store
        .advance_cursor("distill:conversation", 7)
        .expect("advance");
    store
        .advance_cursor("distill:conversation", 3)
        .expect("advance");
    assert_eq!(store.cursor("distill:conversation").expect("cursor"), Some(7));
}
