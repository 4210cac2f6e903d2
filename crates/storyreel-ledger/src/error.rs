//! Ledger error types.

use std::path::PathBuf;

use storyreel_models::{BatchId, TransitionError, WorkItemId};
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors raised by ledger operations.
///
/// Every variant halts the run: correctness depends on the ledger reflecting
/// the last acknowledged state.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger at {path} is unreadable: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported ledger version {found} (expected <= {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Work item not found: {0}")]
    ItemNotFound(WorkItemId),

    #[error("Batch job not found: {0}")]
    BatchNotFound(BatchId),

    #[error("Rejected transition for {record}: {source}")]
    Transition {
        record: String,
        #[source]
        source: TransitionError,
    },
}

impl LedgerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn transition(record: impl ToString, source: TransitionError) -> Self {
        Self::Transition {
            record: record.to_string(),
            source,
        }
    }

    /// Storage itself failed, as opposed to a rejected mutation.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            LedgerError::Io { .. } | LedgerError::Corrupt { .. } | LedgerError::Serialization(_)
        )
    }
}
