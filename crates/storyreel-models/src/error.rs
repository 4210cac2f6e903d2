//! Errors raised by illegal lifecycle transitions.

use thiserror::Error;

use crate::{BatchJobState, ItemStatus, Phase};

pub type TransitionResult<T> = Result<T, TransitionError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("Phase regression from {from} to {to}")]
    Regression { from: Phase, to: Phase },

    #[error("Phase {0} has no work to submit")]
    NotPending(Phase),

    #[error("Cannot {action} an item in status {status} at phase {phase}")]
    InvalidStatus {
        action: &'static str,
        status: ItemStatus,
        phase: Phase,
    },

    #[error("Retry budget exhausted ({retry_count}/{max_retries})")]
    RetriesExhausted { retry_count: u32, max_retries: u32 },

    #[error("Batch is already closed ({0})")]
    BatchClosed(BatchJobState),
}

impl TransitionError {
    pub fn invalid_status(action: &'static str, status: ItemStatus, phase: Phase) -> Self {
        Self::InvalidStatus {
            action,
            status,
            phase,
        }
    }
}
