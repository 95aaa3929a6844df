//! The result envelope carried between stages.

use crate::errors::StageError;

/// One produced item plus its out-of-band signals.
///
/// A consumer must check [`error`](Self::error) and
/// [`should_exit`](Self::should_exit) before trusting [`item`](Self::item).
/// A skipped envelope carries no meaningful payload.
#[derive(Debug)]
pub struct ResultEnvelope<T> {
    /// The payload.
    pub item: T,
    /// Whether the payload should be ignored.
    pub is_skipped: bool,
    /// An error raised while producing the payload.
    pub error: Option<StageError>,
    /// Whether consumers should stop after this envelope.
    pub should_exit: bool,
    /// Why consumers should stop. Empty unless `should_exit` is set.
    pub exit_reason: String,
}

impl<T> ResultEnvelope<T> {
    /// Wraps an item with every signal at its default.
    #[must_use]
    pub fn new(item: T) -> Self {
        Self {
            item,
            is_skipped: false,
            error: None,
            should_exit: false,
            exit_reason: String::new(),
        }
    }

    /// Creates an envelope whose payload is marked as meaningless.
    #[must_use]
    pub fn skipped(item: T) -> Self {
        Self {
            is_skipped: true,
            ..Self::new(item)
        }
    }

    /// Creates an envelope carrying an error alongside its payload.
    #[must_use]
    pub fn failed(item: T, error: StageError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(item)
        }
    }

    /// Creates an envelope asking consumers to stop.
    #[must_use]
    pub fn exit(item: T, reason: impl Into<String>) -> Self {
        Self {
            should_exit: true,
            exit_reason: reason.into(),
            ..Self::new(item)
        }
    }

    /// Returns true when no signal is set and the payload can be trusted.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && !self.is_skipped && !self.should_exit
    }

    /// Returns true if an error is attached.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Consumes the envelope and returns the payload, ignoring signals.
    #[must_use]
    pub fn into_item(self) -> T {
        self.item
    }

    /// Returns the payload, or the attached error.
    pub fn into_result(self) -> Result<T, StageError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.item),
        }
    }

    /// Transforms the payload while keeping every signal.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResultEnvelope<U> {
        ResultEnvelope {
            item: f(self.item),
            is_skipped: self.is_skipped,
            error: self.error,
            should_exit: self.should_exit,
            exit_reason: self.exit_reason,
        }
    }
}

/// Wraps an item into an envelope with default signals.
#[must_use]
pub fn wrap<T>(item: T) -> ResultEnvelope<T> {
    ResultEnvelope::new(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_defaults() {
        let env = wrap("hello");
        assert_eq!(env.item, "hello");
        assert!(!env.is_skipped);
        assert!(env.error.is_none());
        assert!(!env.should_exit);
        assert!(env.exit_reason.is_empty());
        assert!(env.is_ok());
    }

    #[test]
    fn test_signal_constructors() {
        assert!(!ResultEnvelope::skipped(1).is_ok());

        let failed = ResultEnvelope::failed(2, StageError::failed("boom"));
        assert!(failed.has_error());
        assert_eq!(failed.into_result().unwrap_err().to_string(), "boom");

        let exit = ResultEnvelope::exit(3, "enough");
        assert!(exit.should_exit);
        assert_eq!(exit.exit_reason, "enough");
        assert!(!exit.is_ok());
    }

    #[test]
    fn test_map_keeps_signals() {
        let mapped = ResultEnvelope::exit(21, "stop").map(|n| n * 2);
        assert_eq!(mapped.item, 42);
        assert!(mapped.should_exit);
        assert_eq!(mapped.exit_reason, "stop");

        let mapped = ResultEnvelope::failed("x", StageError::failed("bad")).map(str::len);
        assert_eq!(mapped.item, 1);
        assert!(mapped.has_error());
    }

    #[test]
    fn test_into_result_ok() {
        assert_eq!(wrap(7).into_result().unwrap(), 7);
        assert_eq!(wrap(8).into_item(), 8);
    }
}
