//! Execution configuration.

use crate::errors::PipelineError;
use crate::stream::DEFAULT_BUFFER_SIZE;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding [`PipelineConfig::buffer_size`].
pub const ENV_BUFFER_SIZE: &str = "STAGECHAIN_BUFFER_SIZE";
/// Environment variable setting [`PipelineConfig::deadline`] in milliseconds.
pub const ENV_DEADLINE_MS: &str = "STAGECHAIN_DEADLINE_MS";
/// Environment variable overriding [`PipelineConfig::error_policy`].
pub const ENV_ERROR_POLICY: &str = "STAGECHAIN_ERROR_POLICY";

/// What `execute` does with errors returned by running stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Cancel the run on the first stage failure and return it (default).
    #[default]
    Surface,
    /// Log and record stage failures; return `Ok` once the streams drain.
    Swallow,
}

impl ErrorPolicy {
    /// Returns true if a stage failure cancels the rest of the run.
    #[must_use]
    pub fn is_fail_fast(&self) -> bool {
        matches!(self, Self::Surface)
    }
}

impl FromStr for ErrorPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surface" => Ok(Self::Surface),
            "swallow" => Ok(Self::Swallow),
            other => Err(PipelineError::Config(format!(
                "unknown error policy '{other}', expected 'surface' or 'swallow'"
            ))),
        }
    }
}

/// Configuration applied to every run of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each queue between adjacent stages.
    pub buffer_size: usize,
    /// Cancel the run automatically after this long.
    #[serde(with = "duration_ms_opt")]
    pub deadline: Option<Duration>,
    /// How long stages get to stop after cancellation before being aborted.
    #[serde(with = "duration_ms")]
    pub shutdown_grace: Duration,
    /// What to do with stage errors.
    pub error_policy: ErrorPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            deadline: None,
            shutdown_grace: Duration::from_secs(1),
            error_policy: ErrorPolicy::Surface,
        }
    }
}

impl PipelineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `STAGECHAIN_*` environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_BUFFER_SIZE) {
            config.buffer_size = raw.trim().parse().map_err(|_| {
                PipelineError::Config(format!(
                    "{ENV_BUFFER_SIZE} must be a positive integer, got '{raw}'"
                ))
            })?;
        }
        if let Some(raw) = lookup(ENV_DEADLINE_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                PipelineError::Config(format!(
                    "{ENV_DEADLINE_MS} must be milliseconds, got '{raw}'"
                ))
            })?;
            config.deadline = Some(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup(ENV_ERROR_POLICY) {
            config.error_policy = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the queue capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the error policy.
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Checks the configuration is usable.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.buffer_size == 0 {
            return Err(PipelineError::Config(
                "buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => {
                let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
                serializer.serialize_some(&ms)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
