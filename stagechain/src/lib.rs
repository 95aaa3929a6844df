//! # Stagechain
//!
//! Linear, typed, concurrent stream pipelines.
//!
//! A pipeline is an ordered chain of stages. Each stage runs as its own
//! task, reading envelopes from its predecessor's bounded stream and writing
//! to its own. Stagechain provides:
//!
//! - **Typed chaining**: a stage can only follow one whose output type matches its input
//! - **Backpressure**: every link between stages is a bounded channel
//! - **Cooperative cancellation**: one token per run, honoured by every stream operation
//! - **Failure policy**: surface the first stage failure or record it and carry on
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use stagechain::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PipelineError> {
//! let pipeline = PipelineBuilder::new(FnSource::new("words", |_: &()| {
//!         vec!["a.txt".to_string(), "b.rs".to_string()]
//!     }))
//!     .append(FilterStage::new("txt", |name: &String, _: &()| name.ends_with(".txt")))
//!     .append(MapStage::new("upper", |name: String, _: &()| name.to_uppercase()))
//!     .build();
//!
//! let items = pipeline
//!     .collect(&CancellationToken::new(), &Arc::new(()))
//!     .await?;
//! assert_eq!(items[0].item, "A.TXT");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod stream;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{wrap, ExecutionSummary, ResultEnvelope, StageOutcome, StageState};
    pub use crate::errors::{ContractErrorInfo, PipelineError, StageError};
    pub use crate::pipeline::{ErrorPolicy, Pipeline, PipelineBuilder, PipelineConfig, TypeDescriptor};
    pub use crate::stages::{CollectSink, FilterStage, FnSource, MapStage, Source, Stage};
    pub use crate::stream::{StageReceiver, StageSender};
}
