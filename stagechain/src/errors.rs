//! Error types for the stagechain engine.
//!
//! Two layers: [`PipelineError`] is what callers of the builder and executor
//! see, [`StageError`] is what a stage returns from `process` and what an
//! envelope may carry downstream.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by pipeline construction and execution.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage was appended whose input type differs from the previous output type.
    #[error("Stage '{stage}' expects input `{expected}` but the previous stage produces `{found}`")]
    TypeMismatch {
        /// The stage being appended.
        stage: String,
        /// The input type the stage declares.
        expected: &'static str,
        /// The output type of the previous stage.
        found: &'static str,
    },

    /// A stage could not be wired to its upstream stream during execution.
    #[error("Wiring failed at stage '{stage}': {message}")]
    Wiring {
        /// The stage being wired.
        stage: String,
        /// What went wrong.
        message: String,
    },

    /// The last stream did not carry the pipeline's declared output type.
    #[error("Unexpected final output type: expected `{expected}`, found `{found}`")]
    FinalType {
        /// The declared output type.
        expected: &'static str,
        /// The type actually carried by the final stream.
        found: &'static str,
    },

    /// A stage failed while running.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        /// The failing stage.
        stage: String,
        /// The stage's own error.
        #[source]
        source: StageError,
    },

    /// The run was cancelled by the caller or by its deadline.
    #[error("Pipeline cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason (first one wins).
        reason: String,
    },

    /// The pipeline configuration is invalid.
    #[error("Invalid pipeline configuration: {0}")]
    Config(String),
}

impl PipelineError {
    /// Returns contract diagnostics for structural errors.
    ///
    /// Runtime failures (stage errors, cancellation) carry no contract info.
    #[must_use]
    pub fn error_info(&self) -> Option<ContractErrorInfo> {
        match self {
            Self::TypeMismatch { stage, expected, found } => Some(
                ContractErrorInfo::new(
                    "PIPELINE-001-TYPE_MISMATCH",
                    format!("Stage '{stage}' cannot consume `{found}`"),
                )
                .with_fix_hint(format!(
                    "Insert a stage converting `{found}` into `{expected}`, or change the input type of '{stage}'."
                ))
                .with_context_entry("stage", stage.clone()),
            ),
            Self::Wiring { stage, .. } => Some(
                ContractErrorInfo::new(
                    "PIPELINE-002-WIRING",
                    format!("Stage '{stage}' received an incompatible upstream stream"),
                )
                .with_context_entry("stage", stage.clone()),
            ),
            Self::FinalType { expected, .. } => Some(
                ContractErrorInfo::new(
                    "PIPELINE-003-FINAL_TYPE",
                    format!("Final stream does not carry `{expected}`"),
                ),
            ),
            Self::Config(message) => Some(
                ContractErrorInfo::new("PIPELINE-004-CONFIG", message.clone())
                    .with_fix_hint("Check buffer_size and the STAGECHAIN_* environment variables."),
            ),
            Self::Stage { .. } | Self::Cancelled { .. } => None,
        }
    }

    /// Returns true for errors raised before or while wiring, never by a running stage.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::TypeMismatch { .. } | Self::Wiring { .. } | Self::FinalType { .. } | Self::Config(_)
        )
    }
}

/// Errors returned by a stage's `process` or carried in an envelope.
#[derive(Debug, Error)]
pub enum StageError {
    /// The cancellation signal fired while the stage was waiting on a stream.
    #[error("Stage cancelled: {0}")]
    Cancelled(String),

    /// The downstream stage stopped reading and dropped its input.
    #[error("Downstream stage closed its input")]
    DownstreamClosed,

    /// A stage-local domain failure.
    #[error("{0}")]
    Failed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    /// Creates a domain failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true if this error was caused by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if the stage stopped only because its consumer went away.
    #[must_use]
    pub fn is_downstream_closed(&self) -> bool {
        matches!(self, Self::DownstreamClosed)
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-001-TYPE_MISMATCH").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_message_and_info() {
        let err = PipelineError::TypeMismatch {
            stage: "count".to_string(),
            expected: "u64",
            found: "alloc::string::String",
        };

        assert!(err.to_string().contains("'count'"));
        assert!(err.is_structural());

        let info = err.error_info().unwrap();
        assert_eq!(info.code, "PIPELINE-001-TYPE_MISMATCH");
        assert_eq!(info.context.get("stage"), Some(&"count".to_string()));
        assert!(info.fix_hint.unwrap().contains("u64"));
    }

    #[test]
    fn test_runtime_errors_have_no_contract_info() {
        let err = PipelineError::Stage {
            stage: "parse".to_string(),
            source: StageError::failed("bad row"),
        };
        assert!(err.error_info().is_none());
        assert!(!err.is_structural());
        assert_eq!(err.to_string(), "Stage 'parse' failed: bad row");

        let cancelled = PipelineError::Cancelled { reason: "deadline".to_string() };
        assert!(cancelled.error_info().is_none());
    }

    #[test]
    fn test_stage_error_classification() {
        assert!(StageError::Cancelled("stop".to_string()).is_cancelled());
        assert!(StageError::DownstreamClosed.is_downstream_closed());
        assert!(!StageError::failed("x").is_cancelled());

        let io: StageError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(io.to_string().starts_with("IO error"));
    }

    #[test]
    fn test_contract_error_info_serializes() {
        let info = ContractErrorInfo::new("PIPELINE-003-FINAL_TYPE", "bad final")
            .with_fix_hint("fix it");
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["code"], "PIPELINE-003-FINAL_TYPE");
        assert_eq!(value["fix_hint"], "fix it");
    }
}
