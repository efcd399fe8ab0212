use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{TimeDelta, Utc};
use pulse_core::{
    Event, Goal, MemoryKind, MemoryRecord, NewEvent, NewMemoryRecord, NewProposal, NewStep,
    Proposal, Step, StepClaim, StepStatus,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

pub trait MissionStore {
    /// Newest first, only ids above `after_id`.
    fn recent_events(&self, kind: &str, after_id: Option<i64>, limit: usize)
    -> Result<Vec<Event>>;
    fn record_event(&self, event: &NewEvent) -> Result<Event>;

    fn insert_memory(&self, record: &NewMemoryRecord) -> Result<MemoryRecord>;
    fn recent_memories(&self, agent_id: &str, limit: usize) -> Result<Vec<MemoryRecord>>;

    fn top_active_goal(&self) -> Result<Option<Goal>>;

    fn insert_proposal(&self, proposal: &NewProposal) -> Result<Proposal>;
    fn insert_steps(&self, proposal_id: &str, steps: &[NewStep]) -> Result<Vec<Step>>;

    /// `thinking` steps only qualify once their claim is older than `claim_ttl_ms`.
    fn next_pending_step(&self, claim_ttl_ms: u64) -> Result<Option<Step>>;
    fn claim_step(&self, claim: &StepClaim, claim_ttl_ms: u64) -> Result<Option<String>>;
    fn complete_step(&self, step_id: &str, claim_token: &str, note: &str) -> Result<bool>;
    fn release_step(&self, claim: &StepClaim, claim_token: &str) -> Result<bool>;

    fn cursor(&self, name: &str) -> Result<Option<i64>>;
    fn advance_cursor(&self, name: &str, position: i64) -> Result<()>;
}

pub struct SqliteStore {
    conn: Connection,
    db_path: PathBuf,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create db directory {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn,
            db_path: db_path.to_path_buf(),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
              version INTEGER PRIMARY KEY,
              name TEXT NOT NULL,
              applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        self.apply_migration(
            1,
            "mission_tables",
            r#"
            CREATE TABLE IF NOT EXISTS agent_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              agent_id TEXT,
              kind TEXT NOT NULL,
              title TEXT,
              summary TEXT NOT NULL,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS agent_memory (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              agent_id TEXT NOT NULL,
              type TEXT NOT NULL,
              content TEXT NOT NULL,
              confidence REAL NOT NULL,
              tags TEXT NOT NULL DEFAULT '[]',
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS goals (
              id TEXT PRIMARY KEY,
              title TEXT NOT NULL,
              status TEXT NOT NULL,
              priority INTEGER NOT NULL,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mission_proposals (
              id TEXT PRIMARY KEY,
              agent_id TEXT NOT NULL,
              title TEXT NOT NULL,
              summary TEXT,
              status TEXT NOT NULL,
              is_initiative INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mission_steps (
              id TEXT PRIMARY KEY,
              proposal_id TEXT NOT NULL,
              step_order INTEGER NOT NULL,
              title TEXT NOT NULL,
              status TEXT NOT NULL,
              technical_note TEXT,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              FOREIGN KEY(proposal_id) REFERENCES mission_proposals(id)
            );
            "#,
        )?;

        self.apply_migration(
            2,
            "step_claims_and_cursors",
            r#"
            ALTER TABLE mission_steps ADD COLUMN claim_token TEXT;

            CREATE TABLE IF NOT EXISTS pipeline_cursors (
              name TEXT PRIMARY KEY,
              position INTEGER NOT NULL,
              updated_at TEXT NOT NULL
            );
            "#,
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_events_kind_created
             ON agent_events(kind, created_at)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_mission_steps_status
             ON mission_steps(status)",
            [],
        )?;

        Ok(())
    }

    fn apply_migration(&self, version: i64, name: &str, sql: &str) -> Result<()> {
        let already_applied = self
            .conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1 LIMIT 1",
                params![version],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if already_applied {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        for raw in sql.split(';') {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Err(err) = tx.execute(trimmed, []) {
                // Databases created by older builds may already carry the column.
                let message = err.to_string().to_lowercase();
                if !(message.contains("duplicate column") || message.contains("already exists")) {
                    return Err(err)
                        .with_context(|| format!("migration {version} ({name}) failed"));
                }
            }
        }
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        let version: Option<i64> = self.conn.query_row(
            "SELECT MAX(version) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;
        Ok(version.unwrap_or_default())
    }

    pub fn add_goal(&self, goal: &Goal) -> Result<()> {
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO goals (id, title, status, priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![goal.id, goal.title, goal.status, goal.priority, now],
        )?;
        Ok(())
    }

    pub fn set_goal_status(&self, goal_id: &str, status: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE goals SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status, now_timestamp(), goal_id],
        )?;
        Ok(changed > 0)
    }

    pub fn list_goals(&self, limit: usize) -> Result<Vec<Goal>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, status, priority
             FROM goals
             ORDER BY priority ASC, created_at ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], goal_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_proposals(&self, limit: usize) -> Result<Vec<Proposal>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, agent_id, title, summary, status, is_initiative
             FROM mission_proposals
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], proposal_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>> {
        let proposal = self
            .conn
            .query_row(
                "SELECT id, agent_id, title, summary, status, is_initiative
                 FROM mission_proposals
                 WHERE id = ?1",
                params![proposal_id],
                proposal_from_row,
            )
            .optional()?;
        Ok(proposal)
    }

    pub fn count_proposals(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(1) FROM mission_proposals", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn list_steps(&self, proposal_id: Option<&str>) -> Result<Vec<Step>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.proposal_id, s.step_order, s.title, s.status, s.technical_note, s.claim_token
             FROM mission_steps s
             JOIN mission_proposals p ON p.id = s.proposal_id
             WHERE ?1 IS NULL OR s.proposal_id = ?1
             ORDER BY p.created_at ASC, s.step_order ASC",
        )?;
        let rows = stmt.query_map(params![proposal_id], step_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_step(&self, step_id: &str) -> Result<Option<Step>> {
        let step = self
            .conn
            .query_row(
                "SELECT id, proposal_id, step_order, title, status, technical_note, claim_token
                 FROM mission_steps
                 WHERE id = ?1",
                params![step_id],
                step_from_row,
            )
            .optional()?;
        Ok(step)
    }

    pub fn count_steps(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(1) FROM mission_steps", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_memories(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(1) FROM agent_memory", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl MissionStore for SqliteStore {
    fn recent_events(
        &self,
        kind: &str,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, agent_id, kind, title, summary, created_at
             FROM agent_events
             WHERE kind = ?1 AND id > ?2
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![kind, after_id.unwrap_or(0), limit as i64],
            event_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record_event(&self, event: &NewEvent) -> Result<Event> {
        let created_at = now_timestamp();
        self.conn.execute(
            "INSERT INTO agent_events (agent_id, kind, title, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.agent_id,
                event.kind,
                event.title,
                event.summary,
                created_at
            ],
        )?;
        Ok(Event {
            id: self.conn.last_insert_rowid(),
            agent_id: event.agent_id.clone(),
            kind: event.kind.clone(),
            title: event.title.clone(),
            summary: event.summary.clone(),
            created_at,
        })
    }

    fn insert_memory(&self, record: &NewMemoryRecord) -> Result<MemoryRecord> {
        let tags = serde_json::to_string(&record.tags)?;
        self.conn.execute(
            "INSERT INTO agent_memory (agent_id, type, content, confidence, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.agent_id,
                record.kind.as_str(),
                record.content,
                record.confidence,
                tags,
                now_timestamp()
            ],
        )?;
        Ok(MemoryRecord {
            id: self.conn.last_insert_rowid(),
            agent_id: record.agent_id.clone(),
            kind: record.kind,
            content: record.content.clone(),
            confidence: record.confidence,
            tags: record.tags.clone(),
        })
    }

    fn recent_memories(&self, agent_id: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, agent_id, type, content, confidence, tags
             FROM agent_memory
             WHERE agent_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent_id, limit as i64], |row| {
            let tags: String = row.get(5)?;
            let kind: String = row.get(2)?;
            Ok((
                MemoryRecord {
                    id: row.get(0)?,
                    agent_id: row.get(1)?,
                    kind: MemoryKind::parse_lenient(&kind),
                    content: row.get(3)?,
                    confidence: row.get(4)?,
                    tags: Vec::new(),
                },
                tags,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (mut record, tags) = row?;
            record.tags = serde_json::from_str(&tags)
                .with_context(|| format!("memory {} has malformed tags", record.id))?;
            records.push(record);
        }
        Ok(records)
    }

    fn top_active_goal(&self) -> Result<Option<Goal>> {
        let goal = self
            .conn
            .query_row(
                "SELECT id, title, status, priority
                 FROM goals
                 WHERE status = 'active' AND trim(title) <> ''
                 ORDER BY priority ASC, created_at ASC
                 LIMIT 1",
                [],
                goal_from_row,
            )
            .optional()?;
        Ok(goal)
    }

    fn insert_proposal(&self, proposal: &NewProposal) -> Result<Proposal> {
        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        // An absent summary is left out of the column list rather than bound as NULL.
        match &proposal.summary {
            Some(summary) => self.conn.execute(
                "INSERT INTO mission_proposals
                 (id, agent_id, title, summary, status, is_initiative, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    proposal.agent_id,
                    proposal.title,
                    summary,
                    proposal.status.as_str(),
                    proposal.is_initiative,
                    now
                ],
            )?,
            None => self.conn.execute(
                "INSERT INTO mission_proposals
                 (id, agent_id, title, status, is_initiative, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    proposal.agent_id,
                    proposal.title,
                    proposal.status.as_str(),
                    proposal.is_initiative,
                    now
                ],
            )?,
        };
        Ok(Proposal {
            id,
            agent_id: proposal.agent_id.clone(),
            title: proposal.title.clone(),
            summary: proposal.summary.clone(),
            status: proposal.status.as_str().to_string(),
            is_initiative: proposal.is_initiative,
        })
    }

    fn insert_steps(&self, proposal_id: &str, steps: &[NewStep]) -> Result<Vec<Step>> {
        let now = now_timestamp();
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = Vec::with_capacity(steps.len());
        for step in steps {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO mission_steps
                 (id, proposal_id, step_order, title, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id,
                    proposal_id,
                    step.step_order,
                    step.title,
                    step.status.as_str(),
                    now
                ],
            )
            .with_context(|| format!("failed to insert step for proposal {proposal_id}"))?;
            inserted.push(Step {
                id,
                proposal_id: proposal_id.to_string(),
                step_order: step.step_order,
                title: step.title.clone(),
                status: step.status,
                technical_note: None,
                claim_token: None,
            });
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn next_pending_step(&self, claim_ttl_ms: u64) -> Result<Option<Step>> {
        // Oldest proposal first, then by step order.
        let step = self
            .conn
            .query_row(
                "SELECT s.id, s.proposal_id, s.step_order, s.title, s.status, s.technical_note, s.claim_token
                 FROM mission_steps s
                 JOIN mission_proposals p ON p.id = s.proposal_id
                 WHERE s.status IN ('todo', 'queued')
                    OR (s.status = 'thinking'
                        AND (s.claim_token IS NULL OR s.updated_at <= ?1))
                 ORDER BY p.created_at ASC, s.step_order ASC
                 LIMIT 1",
                params![claim_expiry_cutoff(claim_ttl_ms)],
                step_from_row,
            )
            .optional()?;
        Ok(step)
    }

    fn claim_step(&self, claim: &StepClaim, claim_ttl_ms: u64) -> Result<Option<String>> {
        if claim.expected_status.is_terminal() {
            return Err(anyhow!(
                "step {} cannot be claimed from terminal status {}",
                claim.step_id,
                claim.expected_status.as_str()
            ));
        }
        let token = Uuid::new_v4().to_string();
        // A live claim held by another run is never taken over.
        let changed = self.conn.execute(
            "UPDATE mission_steps
             SET status = 'thinking', claim_token = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4 AND claim_token IS ?5
               AND (status <> 'thinking' OR claim_token IS NULL OR updated_at <= ?6)",
            params![
                token,
                now_timestamp(),
                claim.step_id,
                claim.expected_status.as_str(),
                claim.expected_token,
                claim_expiry_cutoff(claim_ttl_ms)
            ],
        )?;
        Ok((changed > 0).then_some(token))
    }

    fn complete_step(&self, step_id: &str, claim_token: &str, note: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE mission_steps
             SET technical_note = ?1, status = 'done', updated_at = ?2
             WHERE id = ?3 AND claim_token = ?4 AND status = 'thinking'",
            params![note, now_timestamp(), step_id, claim_token],
        )?;
        Ok(changed > 0)
    }

    fn release_step(&self, claim: &StepClaim, claim_token: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE mission_steps
             SET status = ?1, claim_token = ?2, updated_at = ?3
             WHERE id = ?4 AND claim_token = ?5 AND status = 'thinking'",
            params![
                claim.expected_status.as_str(),
                claim.expected_token,
                now_timestamp(),
                claim.step_id,
                claim_token
            ],
        )?;
        Ok(changed > 0)
    }

    fn cursor(&self, name: &str) -> Result<Option<i64>> {
        let position = self
            .conn
            .query_row(
                "SELECT position FROM pipeline_cursors WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(position)
    }

    fn advance_cursor(&self, name: &str, position: i64) -> Result<()> {
        // MAX keeps the cursor monotonic when overlapping runs race.
        self.conn.execute(
            "INSERT INTO pipeline_cursors (name, position, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE
             SET position = MAX(position, excluded.position), updated_at = excluded.updated_at",
            params![name, position, now_timestamp()],
        )?;
        Ok(())
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

// Claims last touched at or before this instant have expired.
fn claim_expiry_cutoff(claim_ttl_ms: u64) -> String {
    i64::try_from(claim_ttl_ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        .map(|cutoff| cutoff.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn goal_from_row(row: &Row<'_>) -> rusqlite::Result<Goal> {
    Ok(Goal {
        id: row.get(0)?,
        title: row.get(1)?,
        status: row.get(2)?,
        priority: row.get(3)?,
    })
}

fn proposal_from_row(row: &Row<'_>) -> rusqlite::Result<Proposal> {
    Ok(Proposal {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        status: row.get(4)?,
        is_initiative: row.get(5)?,
    })
}

fn step_from_row(row: &Row<'_>) -> rusqlite::Result<Step> {
    let raw_status: String = row.get(4)?;
    let status = StepStatus::parse(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown step status '{raw_status}'").into(),
        )
    })?;
    Ok(Step {
        id: row.get(0)?,
        proposal_id: row.get(1)?,
        step_order: row.get(2)?,
        title: row.get(3)?,
        status,
        technical_note: row.get(5)?,
        claim_token: row.get(6)?,
    })
}
