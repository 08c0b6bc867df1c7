//! Storage Error Taxonomy

use std::fmt;
use thiserror::Error;

/// Gateway operation, used to tag errors, logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    Put,
    Get,
    List,
    Delete,
    Check,
}

impl StorageOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOp::Put => "put",
            StorageOp::Get => "get",
            StorageOp::List => "list",
            StorageOp::Delete => "delete",
            StorageOp::Check => "check",
        }
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage failure as triaged by the gateway.
///
/// Upper layers never re-classify these: a `Transient` error seen above the
/// gateway has already exhausted its retry budget.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{op} '{key}' failed after {attempts} attempt(s): {reason}")]
    Transient {
        op: StorageOp,
        key: String,
        attempts: u32,
        reason: String,
    },
    #[error("{op} '{key}': object not found")]
    NotFound { op: StorageOp, key: String },
    #[error("{op} '{key}' failed: {reason}")]
    Fatal {
        op: StorageOp,
        key: String,
        reason: String,
    },
}

impl StorageError {
    pub fn op(&self) -> StorageOp {
        match self {
            StorageError::Transient { op, .. }
            | StorageError::NotFound { op, .. }
            | StorageError::Fatal { op, .. } => *op,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::Transient { .. } => "transient",
            StorageError::NotFound { .. } => "not_found",
            StorageError::Fatal { .. } => "fatal",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
