//! Cooperative cancellation shared by every stage of a run.

mod token;

pub use token::{CancelCallback, ChildToken, CancellationToken};
