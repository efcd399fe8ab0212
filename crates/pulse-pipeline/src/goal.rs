use tracing::debug;

use crate::{PipelineContext, StageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGoal {
    pub title: String,
    pub goal_id: Option<String>,
}

impl ResolvedGoal {
    pub fn is_fallback(&self) -> bool {
        self.goal_id.is_none()
    }
}

// An unreachable store is not "no active goal".
pub fn resolve_goal(ctx: &PipelineContext<'_>) -> Result<ResolvedGoal, StageError> {
    match ctx.store.top_active_goal()? {
        Some(goal) if !goal.title.trim().is_empty() => Ok(ResolvedGoal {
            title: goal.title.trim().to_string(),
            goal_id: Some(goal.id),
        }),
        _ => {
            debug!("no usable active goal, using fallback");
            Ok(ResolvedGoal {
                title: ctx.config.fallback_goal.clone(),
                goal_id: None,
            })
        }
    }
}
