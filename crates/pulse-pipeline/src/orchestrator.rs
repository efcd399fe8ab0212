use std::fmt;

use pulse_common::PipelineConfig;
use pulse_completion::CompletionClient;
use pulse_core::MemoryRecord;
use pulse_store::MissionStore;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::distill::{DistillOutcome, distill_memory};
use crate::executor::{ExecuteOutcome, execute_next_step};
use crate::goal::resolve_goal;
use crate::initiative::{PlanOutcome, plan_initiative};
use crate::{PipelineContext, StageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Distill,
    ResolveGoal,
    PlanInitiative,
    ExecuteStep,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [
        Self::Distill,
        Self::ResolveGoal,
        Self::PlanInitiative,
        Self::ExecuteStep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distill => "distill",
            Self::ResolveGoal => "resolve_goal",
            Self::PlanInitiative => "plan_initiative",
            Self::ExecuteStep => "execute_step",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed(String),
    Skipped(String),
    Failed(String),
}

impl StageOutcome {
    fn from_error(err: &StageError) -> Self {
        if err.is_content() {
            Self::Skipped(err.to_string())
        } else {
            Self::Failed(err.to_string())
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Completed(detail) | Self::Skipped(detail) | Self::Failed(detail) => detail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self
            .stages
            .iter()
            .any(|report| matches!(report.outcome, StageOutcome::Failed(_)))
    }

    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|report| report.stage == stage)
            .map(|report| &report.outcome)
    }

    pub fn summary(&self) -> String {
        self.stages
            .iter()
            .map(|report| format!("{}={}", report.stage, report.outcome.label()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn push(&mut self, stage: Stage, outcome: StageOutcome) {
        match &outcome {
            StageOutcome::Completed(detail) => info!(stage = %stage, %detail, "stage completed"),
            StageOutcome::Skipped(reason) => warn!(stage = %stage, %reason, "stage skipped"),
            StageOutcome::Failed(err) => error!(stage = %stage, error = %err, "stage failed"),
        }
        self.stages.push(StageReport { stage, outcome });
    }
}

// A failing stage is reported without stopping the rest.
pub struct HeartbeatPipeline<'a> {
    ctx: PipelineContext<'a>,
}

impl<'a> HeartbeatPipeline<'a> {
    pub fn new(
        store: &'a dyn MissionStore,
        completion: &'a dyn CompletionClient,
        agent_id: &'a str,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            ctx: PipelineContext {
                store,
                completion,
                agent_id,
                config,
            },
        }
    }

    pub fn context(&self) -> PipelineContext<'a> {
        self.ctx
    }

    pub fn run(&self) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("heartbeat", run_id = %run_id, agent = %self.ctx.agent_id);
        let _guard = span.enter();
        let mut report = RunReport {
            run_id,
            stages: Vec::with_capacity(Stage::ORDER.len()),
        };

        let distilled = match distill_memory(&self.ctx) {
            Ok(DistillOutcome::NoNewEvents) => StageOutcome::Skipped("no new dialogue".to_string()),
            Ok(DistillOutcome::Committed(record)) => StageOutcome::Completed(format!(
                "stored {} memory {} (confidence {:.2})",
                record.kind.as_str(),
                record.id,
                record.confidence
            )),
            Ok(DistillOutcome::Discarded { confidence }) => StageOutcome::Completed(format!(
                "discarded insight (confidence {confidence:.2} below {:.2})",
                self.ctx.config.confidence_threshold
            )),
            Err(err) => StageOutcome::from_error(&err),
        };
        report.push(Stage::Distill, distilled);

        let memories = self.memory_context();

        let goal = match resolve_goal(&self.ctx) {
            Ok(goal) => {
                let detail = if goal.is_fallback() {
                    format!("fallback goal: {}", goal.title)
                } else {
                    goal.title.clone()
                };
                report.push(Stage::ResolveGoal, StageOutcome::Completed(detail));
                goal
            }
            Err(err) => {
                report.push(Stage::ResolveGoal, StageOutcome::from_error(&err));
                let reason = "no goal resolved this run".to_string();
                report.push(Stage::PlanInitiative, StageOutcome::Skipped(reason.clone()));
                report.push(Stage::ExecuteStep, StageOutcome::Skipped(reason));
                return report;
            }
        };

        let planned = match plan_initiative(&self.ctx, &goal, &memories) {
            Ok(PlanOutcome::Declined) => StageOutcome::Completed("declined to propose".to_string()),
            Ok(PlanOutcome::Proposed { proposal, steps }) => StageOutcome::Completed(format!(
                "proposed {} with {} step(s)",
                proposal.id,
                steps.len()
            )),
            Err(err) => StageOutcome::from_error(&err),
        };
        report.push(Stage::PlanInitiative, planned);

        let executed = match execute_next_step(&self.ctx, &goal, &memories) {
            Ok(ExecuteOutcome::Idle) => StageOutcome::Skipped("no pending step".to_string()),
            Ok(ExecuteOutcome::Completed { step_id, .. }) => {
                StageOutcome::Completed(format!("resolved step {step_id}"))
            }
            Ok(ExecuteOutcome::Superseded { step_id }) => {
                StageOutcome::Skipped(format!("step {step_id} taken by another run"))
            }
            Err(err) => StageOutcome::from_error(&err),
        };
        report.push(Stage::ExecuteStep, executed);

        report
    }

    fn memory_context(&self) -> Vec<MemoryRecord> {
        if self.ctx.config.memory_context == 0 {
            return Vec::new();
        }
        self.ctx
            .store
            .recent_memories(self.ctx.agent_id, self.ctx.config.memory_context)
            .unwrap_or_else(|err| {
                warn!(error = %err, "memory context unavailable, continuing without it");
                Vec::new()
            })
    }
}
