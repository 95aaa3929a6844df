//! Pipeline building and execution.
//!
//! This module provides:
//! - The type-checked, append-only [`PipelineBuilder`]
//! - Type-erased stage adapters holding heterogeneous stages in one list
//! - The [`Pipeline`] executor with its terminal drain
//! - Execution configuration

mod adapter;
mod builder;
mod config;
mod executor;

pub use adapter::TypeDescriptor;
pub use builder::PipelineBuilder;
pub use config::{
    ErrorPolicy, PipelineConfig, ENV_BUFFER_SIZE, ENV_DEADLINE_MS, ENV_ERROR_POLICY,
};
pub use executor::Pipeline;
