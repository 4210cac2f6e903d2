//! Structured item logging utilities.
//!
//! Provides consistent, structured logging for per-item phase work with
//! tracing spans and contextual information.

use storyreel_models::{Stage, WorkItemId};
use tracing::{error, info, warn, Span};

/// Item logger for structured logging with consistent formatting.
///
/// Every event carries the item ID and the stage being executed.
#[derive(Debug, Clone)]
pub struct ItemLogger {
    item_id: String,
    stage: &'static str,
}

impl ItemLogger {
    pub fn new(item_id: &WorkItemId, stage: Stage) -> Self {
        Self {
            item_id: item_id.to_string(),
            stage: stage.as_str(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            item_id = %self.item_id,
            stage = self.stage,
            "Stage started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            item_id = %self.item_id,
            stage = self.stage,
            "Stage progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            item_id = %self.item_id,
            stage = self.stage,
            "Stage warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            item_id = %self.item_id,
            stage = self.stage,
            "Stage error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            item_id = %self.item_id,
            stage = self.stage,
            "Stage completed: {}", message
        );
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn stage(&self) -> &str {
        self.stage
    }

    /// Create a tracing span for this item and stage.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("item", item_id = %self.item_id, stage = self.stage)
    }
}
