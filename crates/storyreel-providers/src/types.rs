//! Provider request/response types.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One text-generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Correlation id; batch adapters expect `<tag>_<index>`.
    pub custom_id: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(
        custom_id: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            custom_id: custom_id.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature,
        }
    }

    /// Slot index encoded in the trailing `_<index>` of the custom id.
    pub fn slot_index(custom_id: &str) -> Option<usize> {
        custom_id.rsplit_once('_').and_then(|(_, idx)| idx.parse().ok())
    }
}

/// Generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub text: String,
}

impl GenerationOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Failure of one slot inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotError {
    pub message: String,
    #[serde(default)]
    pub status: Option<u16>,
    pub retryable: bool,
}

impl SlotError {
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        let retryable = match status {
            Some(400 | 401 | 403 | 404 | 422) => false,
            _ => true,
        };
        Self {
            message: message.into(),
            status,
            retryable,
        }
    }
}

/// Per-index outcome of a batch.
pub type BatchResults = BTreeMap<usize, Result<GenerationOutput, SlotError>>;

/// Remote state of a batch as seen by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    /// Nothing new is available yet.
    Pending,
    /// These indices have results that can be fetched; others are still running.
    PartiallyDone(BTreeSet<usize>),
    /// Every index has a result (success or per-index failure).
    Done,
    /// The batch as a whole failed, expired or was cancelled.
    Failed(String),
}
