//! Core data model: envelopes, stage states and run summaries.

mod envelope;
mod status;
mod summary;

pub use envelope::{wrap, ResultEnvelope};
pub use status::StageState;
pub use summary::{ExecutionSummary, StageOutcome};
