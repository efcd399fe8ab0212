use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: i64,
    pub agent_id: Option<String>,
    pub kind: String,
    pub title: Option<String>,
    pub summary: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub agent_id: Option<String>,
    pub kind: String,
    pub title: Option<String>,
    pub summary: String,
}

impl NewEvent {
    pub fn new(kind: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            kind: kind.into(),
            title: None,
            summary: summary.into(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title.filter(|value| !value.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Insight,
    Strategy,
    Lesson,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insight => "insight",
            Self::Strategy => "strategy",
            Self::Lesson => "lesson",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "insight" => Some(Self::Insight),
            "strategy" => Some(Self::Strategy),
            "lesson" => Some(Self::Lesson),
            _ => None,
        }
    }

    // "strategy/lesson" resolves to its first recognized part.
    pub fn parse_lenient(value: &str) -> Self {
        value
            .split(['/', '|', ','])
            .find_map(Self::parse)
            .unwrap_or(Self::Insight)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub id: i64,
    pub agent_id: String,
    pub kind: MemoryKind,
    pub content: String,
    pub confidence: f64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMemoryRecord {
    pub agent_id: String,
    pub kind: MemoryKind,
    pub content: String,
    pub confidence: f64,
    pub tags: Vec<String>,
}

pub const GOAL_STATUS_ACTIVE: &str = "active";

#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    pub id: String,
    pub title: String,
    pub status: String,
    pub priority: i64,
}

impl Goal {
    pub fn new(title: impl Into<String>, priority: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            status: GOAL_STATUS_ACTIVE.to_string(),
            priority,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == GOAL_STATUS_ACTIVE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub id: String,
    pub agent_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub status: String,
    pub is_initiative: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProposal {
    pub agent_id: String,
    pub title: String,
    pub summary: Option<String>,
    pub status: ProposalStatus,
    pub is_initiative: bool,
}

impl NewProposal {
    pub fn initiative(agent_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            title: title.into(),
            summary: None,
            status: ProposalStatus::Pending,
            is_initiative: true,
        }
    }

    pub fn requested(agent_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            is_initiative: false,
            ..Self::initiative(agent_id, title)
        }
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Todo,
    Queued,
    Thinking,
    Done,
}

impl StepStatus {
    pub const PENDING: [StepStatus; 3] = [Self::Todo, Self::Queued, Self::Thinking];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Queued => "queued",
            Self::Thinking => "thinking",
            Self::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "todo" => Some(Self::Todo),
            "queued" => Some(Self::Queued),
            "thinking" => Some(Self::Thinking),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub proposal_id: String,
    pub step_order: i64,
    pub title: String,
    pub status: StepStatus,
    pub technical_note: Option<String>,
    pub claim_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStep {
    pub step_order: i64,
    pub title: String,
    pub status: StepStatus,
}

impl NewStep {
    pub fn new(step_order: i64, title: impl Into<String>) -> Self {
        Self {
            step_order,
            title: title.into(),
            status: StepStatus::Todo,
        }
    }

    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }
}

// Claims only succeed while the row still matches this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepClaim {
    pub step_id: String,
    pub expected_status: StepStatus,
    pub expected_token: Option<String>,
}

impl StepClaim {
    pub fn observed(step: &Step) -> Self {
        Self {
            step_id: step.id.clone(),
            expected_status: step.status,
            expected_token: step.claim_token.clone(),
        }
    }
}
