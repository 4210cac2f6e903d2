//! AI text provider adapters.
//!
//! Providers expose one of two capability shapes:
//! - [`SyncProvider`]: one request, one awaited response
//! - [`BatchProvider`]: submit many requests, poll, then fetch per-index results
//!
//! The scheduler only ever dispatches on [`ProviderAdapter`], never on a
//! provider name.

pub mod adapter;
pub mod batch;
pub mod error;
pub mod fallback;
pub mod openai;
pub mod types;

pub use adapter::{BatchProvider, ProviderAdapter, SyncProvider};
pub use batch::OpenAiBatchProvider;
pub use error::{ProviderError, ProviderResult};
pub use fallback::FallbackProvider;
pub use openai::{OpenAiChatConfig, OpenAiChatProvider};
pub use types::{BatchResults, BatchStatus, GenerationOutput, GenerationRequest, SlotError};
