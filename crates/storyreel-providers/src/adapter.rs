//! Provider capability traits and the adapter union the scheduler dispatches on.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use storyreel_models::BatchId;

use crate::error::ProviderResult;
use crate::types::{BatchResults, BatchStatus, GenerationOutput, GenerationRequest};

/// Provider answering one request per awaited call.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    /// Short name recorded in provider refs and logs.
    fn name(&self) -> &str;

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<GenerationOutput>;
}

/// Provider processing many requests asynchronously.
///
/// Result indices refer to positions in the slice passed to `submit_batch`.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn submit_batch(&self, requests: &[GenerationRequest]) -> ProviderResult<BatchId>;

    async fn poll_batch(&self, batch_id: &BatchId) -> ProviderResult<BatchStatus>;

    /// Results available so far. Only valid after a poll reported
    /// `PartiallyDone` or `Done`.
    async fn fetch_results(&self, batch_id: &BatchId) -> ProviderResult<BatchResults>;
}

/// The configured text provider, selected once at start.
#[derive(Clone)]
pub enum ProviderAdapter {
    Sync(Arc<dyn SyncProvider>),
    Batch(Arc<dyn BatchProvider>),
}

impl ProviderAdapter {
    pub fn name(&self) -> &str {
        match self {
            ProviderAdapter::Sync(p) => p.name(),
            ProviderAdapter::Batch(p) => p.name(),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, ProviderAdapter::Batch(_))
    }
}

impl fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderAdapter::Sync(p) => write!(f, "ProviderAdapter::Sync({})", p.name()),
            ProviderAdapter::Batch(p) => write!(f, "ProviderAdapter::Batch({})", p.name()),
        }
    }
}
