//! Outcome of one pipeline run.

use super::StageState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How one stage finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Stage name.
    pub name: String,
    /// Terminal state reached by the stage task.
    pub state: StageState,
    /// Envelopes the stage handed to its output stream.
    pub items_emitted: u64,
    /// Error message if the stage failed or was cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageOutcome {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StageState::Created,
            items_emitted: 0,
            error: None,
        }
    }

    /// Moves to `next` if the lifecycle allows it. Returns false otherwise.
    pub(crate) fn advance(&mut self, next: StageState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }
}

/// Result of a fully drained pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Pipeline name.
    pub pipeline: String,
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
    /// Envelopes read from the final stream.
    pub drained_items: u64,
    /// Per-stage outcomes in pipeline order.
    pub stages: Vec<StageOutcome>,
}

impl ExecutionSummary {
    /// Returns true if every stage completed normally.
    #[must_use]
    pub fn all_completed(&self) -> bool {
        self.stages.iter().all(|s| s.state.is_success())
    }

    /// Looks up a stage outcome by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Outcomes of stages that failed or were cancelled.
    pub fn failures(&self) -> impl Iterator<Item = &StageOutcome> {
        self.stages.iter().filter(|s| !s.state.is_success())
    }

    /// Renders the summary as one line of JSON, for logs.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(states: &[StageState]) -> ExecutionSummary {
        ExecutionSummary {
            pipeline: "test".to_string(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 1.0,
            drained_items: 0,
            stages: states
                .iter()
                .enumerate()
                .map(|(i, state)| StageOutcome {
                    state: *state,
                    ..StageOutcome::new(format!("stage{i}"))
                })
                .collect(),
        }
    }

    #[test]
    fn test_all_completed() {
        assert!(summary(&[StageState::Completed, StageState::Completed]).all_completed());
        let mixed = summary(&[StageState::Completed, StageState::Failed]);
        assert!(!mixed.all_completed());
        assert_eq!(mixed.failures().count(), 1);
        assert_eq!(mixed.stage("stage1").unwrap().state, StageState::Failed);
    }

    #[test]
    fn test_outcome_follows_lifecycle() {
        let mut outcome = StageOutcome::new("parse");
        assert!(!outcome.advance(StageState::Completed));
        assert_eq!(outcome.state, StageState::Created);

        assert!(outcome.advance(StageState::Running));
        assert!(outcome.advance(StageState::Failed));
        assert!(!outcome.advance(StageState::Completed));
        assert_eq!(outcome.state, StageState::Failed);
    }

    #[test]
    fn test_summary_serializes() {
        let value = serde_json::to_value(summary(&[StageState::Completed])).unwrap();
        assert_eq!(value["pipeline"], "test");
        assert_eq!(value["stages"][0]["state"], "completed");
        assert!(value["stages"][0].get("error").is_none());
    }
}
