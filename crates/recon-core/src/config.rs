//! Reconciliation configuration
//!
//! Loaded from TOML or built in code:
//!
//! ```toml
//! chunk_size = 50
//! failure_policy = "abort"
//! preserved_params = ["throttle", "exceptions_list"]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;

/// Records reconciled concurrently per chunk unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// What the scheduler does with later chunks once a chunk had a failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Finish the failing chunk, then schedule nothing else
    #[default]
    Abort,
    /// Run every chunk regardless of failures
    Continue,
}

impl std::str::FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "continue" => Ok(Self::Continue),
            other => Err(ConfigError::InvalidValue {
                field: "failure_policy",
                message: format!("expected \"abort\" or \"continue\", got {other:?}"),
            }),
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Maximum records in flight at once
    pub chunk_size: NonZeroUsize,
    /// Behaviour after a failed chunk
    pub failure_policy: FailurePolicy,
    /// Param keys kept from the stored record, in addition to enabled/actions
    pub preserved_params: Vec<String>,
}

impl ReconcileConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With chunk size
    ///
    /// # Errors
    /// `ConfigError::InvalidValue` if `size` is zero
    pub fn with_chunk_size(mut self, size: usize) -> Result<Self, ConfigError> {
        self.chunk_size = NonZeroUsize::new(size).ok_or(ConfigError::InvalidValue {
            field: "chunk_size",
            message: "must be at least 1".to_string(),
        })?;
        Ok(self)
    }

    /// With failure policy
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// With extra preserved param keys
    #[inline]
    #[must_use]
    pub fn with_preserved_params<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preserved_params = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML, unknown keys or a zero chunk size
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as `from_toml_str`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), chunk_size = config.chunk_size.get(), "loaded config");
        Ok(config)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            failure_policy: FailurePolicy::Abort,
            preserved_params: Vec::new(),
        }
    }
}
