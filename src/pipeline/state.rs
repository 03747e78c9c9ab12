use std::fmt;

use crate::storage::RunStatus;

/// Execution state of one pipeline run.
///
/// `Pending → Stage(0) → … → Stage(n-1) → Completed`, with a single forward
/// transition on success and a jump to `Aborted` on permanent failure. The
/// executor pairs each transition with a checkpoint write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Stage(usize),
    Completed,
    Aborted,
}

impl PipelineState {
    /// Transition taken when the current step succeeds.
    pub fn on_success(self, stage_count: usize) -> Self {
        match self {
            PipelineState::Pending if stage_count == 0 => PipelineState::Completed,
            PipelineState::Pending => PipelineState::Stage(0),
            PipelineState::Stage(k) if k + 1 < stage_count => PipelineState::Stage(k + 1),
            PipelineState::Stage(_) => PipelineState::Completed,
            terminal => terminal,
        }
    }

    /// Transition taken on a permanent failure.
    pub fn on_failure(self) -> Self {
        match self {
            PipelineState::Completed => PipelineState::Completed,
            _ => PipelineState::Aborted,
        }
    }

    /// Whether no further transitions happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Aborted)
    }

    /// Persisted status corresponding to this state.
    pub fn run_status(&self) -> RunStatus {
        match self {
            PipelineState::Pending => RunStatus::Pending,
            PipelineState::Stage(_) => RunStatus::Running,
            PipelineState::Completed => RunStatus::Completed,
            PipelineState::Aborted => RunStatus::Aborted,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Pending => write!(f, "pending"),
            PipelineState::Stage(k) => write!(f, "stage_{}", k),
            PipelineState::Completed => write!(f, "completed"),
            PipelineState::Aborted => write!(f, "aborted"),
        }
    }
}
