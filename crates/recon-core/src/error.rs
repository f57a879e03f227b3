//! Error types for reconciliation
//!
//! Provides error handling for:
//! - Record store operations
//! - Per-record reconciliation failures
//! - Configuration loading

use crate::types::{RecordId, StoreId};
use std::path::PathBuf;

/// Record store operation, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// Read by record id
    Read,
    /// Create a new object
    Create,
    /// Patch an object in place
    Patch,
    /// Delete an object
    Delete,
}

impl StoreOp {
    /// Lowercase operation name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for StoreOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a record store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Object id does not exist
    #[error("object not found: {0}")]
    NotFound(StoreId),

    /// Write conflicts with stored state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store refused the payload
    #[error("rejected: {0}")]
    Rejected(String),

    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store call timed out
    #[error("store call timed out after {elapsed_ms}ms")]
    Timeout {
        /// Time spent before giving up
        elapsed_ms: u64,
    },
}

impl StoreError {
    /// Check if a caller retry could succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

/// Per-record reconciliation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    /// Desired record has no stored counterpart
    #[error("failed to find record {record_id}")]
    NotFound {
        /// Record that was looked up
        record_id: RecordId,
    },

    /// Install target is already stored
    #[error("record {record_id} already exists as {id}")]
    AlreadyExists {
        /// Record being installed
        record_id: RecordId,
        /// Object already holding the record id
        id: StoreId,
    },

    /// Record id listed more than once in one batch
    #[error("record {record_id} appears {occurrences} times in the batch")]
    DuplicateRecord {
        /// Repeated record id
        record_id: RecordId,
        /// Number of desired records carrying it
        occurrences: usize,
    },

    /// A store call failed
    #[error("{op} failed for record {record_id}: {source}")]
    Store {
        /// Record being reconciled
        record_id: RecordId,
        /// Store call that failed
        op: StoreOp,
        /// Error returned by the store
        #[source]
        source: StoreError,
    },

    /// Replace deleted the old object but could not create the new one
    #[error("replace of record {record_id} deleted {deleted} but create failed: {source}")]
    ReplaceIncomplete {
        /// Record being replaced
        record_id: RecordId,
        /// Object removed before the create failed
        deleted: StoreId,
        /// Error returned by the create
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    /// Create store error
    #[inline]
    pub fn store(record_id: RecordId, op: StoreOp, source: StoreError) -> Self {
        Self::Store {
            record_id,
            op,
            source,
        }
    }

    /// Record the error belongs to
    #[must_use]
    pub fn record_id(&self) -> &RecordId {
        match self {
            Self::NotFound { record_id }
            | Self::AlreadyExists { record_id, .. }
            | Self::DuplicateRecord { record_id, .. }
            | Self::Store { record_id, .. }
            | Self::ReplaceIncomplete { record_id, .. } => record_id,
        }
    }

    /// Check if a caller retry could succeed
    ///
    /// An incomplete replace is never retryable as an update: the record is
    /// gone, so the caller has to install it instead.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store { source, .. } if source.is_transient())
    }

    /// Check if the store was left missing the record
    #[inline]
    #[must_use]
    pub fn lost_record(&self) -> bool {
        matches!(self, Self::ReplaceIncomplete { .. })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Config is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
