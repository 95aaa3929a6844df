//! Testing utilities for stagechain pipelines.
//!
//! Reusable stages with predictable behaviour: fixed and endless sources,
//! stages that fail, stall, or stop reading early.

mod mocks;

pub use mocks::{EndlessSource, FailingStage, StallingStage, TakeStage, VecSource};
