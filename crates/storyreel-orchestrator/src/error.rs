//! Orchestrator error types.

use std::path::PathBuf;

use storyreel_ledger::LedgerError;
use storyreel_models::{ArtifactKind, Phase, WorkItemId};
use storyreel_providers::ProviderError;
use thiserror::Error;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration:\n  - {}", .0.join("\n  - "))]
    InvalidConfig(Vec<String>),

    /// Persistence failure. Always halts the run.
    #[error("Ledger failure while {context}: {source}")]
    Ledger {
        context: String,
        #[source]
        source: LedgerError,
    },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Metrics exporter error: {0}")]
    Metrics(String),

    #[error("IO error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<LedgerError> for OrchestratorError {
    fn from(source: LedgerError) -> Self {
        Self::Ledger {
            context: "updating the ledger".to_string(),
            source,
        }
    }
}

impl OrchestratorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap a ledger error with the item and phase being worked on.
    pub fn ledger_at(item: &WorkItemId, phase: Phase) -> impl FnOnce(LedgerError) -> Self {
        let context = format!("processing item {} at {}", item, phase);
        move |source| Self::Ledger { context, source }
    }

    pub fn ledger_context(context: impl Into<String>) -> impl FnOnce(LedgerError) -> Self {
        let context = context.into();
        move |source| Self::Ledger { context, source }
    }

    pub fn io_context(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| Self::Io { context, source }
    }

    /// Errors that must stop the run immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Ledger { .. }
                | OrchestratorError::Config(_)
                | OrchestratorError::InvalidConfig(_)
        )
    }
}

/// Output materializer failure.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Item {item} has no {kind} artifact")]
    MissingArtifact { item: WorkItemId, kind: ArtifactKind },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_lists_every_problem() {
        let err = OrchestratorError::InvalidConfig(vec![
            "OPENAI_API_KEY is not set".into(),
            "title prompt file not found".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("- OPENAI_API_KEY is not set"));
        assert!(msg.contains("- title prompt file not found"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_ledger_errors_are_fatal() {
        let id = WorkItemId::from_string("item-1");
        let err = OrchestratorError::ledger_at(&id, Phase::AudioPending)(LedgerError::ItemNotFound(
            id.clone(),
        ));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("item-1 at audio_pending"));
        assert!(!OrchestratorError::Provider(ProviderError::RateLimited("slow down".into())).is_fatal());
    }

    #[test]
    fn test_io_errors_carry_context() {
        let source = std::io::Error::new(std::io::ErrorKind::AlreadyExists, "File exists");
        let err = OrchestratorError::io_context("writing the title of item-1")(source);
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "IO error while writing the title of item-1: File exists");
    }
}
