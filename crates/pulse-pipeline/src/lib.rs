pub mod distill;
pub mod error;
pub mod executor;
pub mod goal;
pub mod initiative;
pub mod orchestrator;

use pulse_common::PipelineConfig;
use pulse_completion::CompletionClient;
use pulse_store::MissionStore;

pub use distill::{DistillOutcome, distill_memory};
pub use error::StageError;
pub use executor::{ExecuteOutcome, execute_next_step};
pub use goal::{ResolvedGoal, resolve_goal};
pub use initiative::{PlanOutcome, plan_initiative};
pub use orchestrator::{HeartbeatPipeline, RunReport, Stage, StageOutcome, StageReport};

#[derive(Clone, Copy)]
pub struct PipelineContext<'a> {
    pub store: &'a dyn MissionStore,
    pub completion: &'a dyn CompletionClient,
    pub agent_id: &'a str,
    pub config: &'a PipelineConfig,
}
