//! Per-stage task state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one stage task within a run.
///
/// `Created -> Running -> {Completed | Cancelled | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Adapter exists but the task has not been spawned.
    #[default]
    Created,
    /// Task spawned and processing.
    Running,
    /// Input exhausted (or all items produced) and no error returned.
    Completed,
    /// Stopped by the cancellation signal or aborted after the grace period.
    Cancelled,
    /// Returned a stage error or panicked.
    Failed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageState {
    /// Returns true if the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Returns true if the stage finished normally.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Checks whether moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Created => matches!(next, Self::Running),
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Cancelled | Self::Failed => false,
        }
    }
}
