//! Shared data models for the StoryReel pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Work items and their per-phase lifecycle
//! - The fixed phase sequence (title → story → audio → video → subtitles)
//! - Outstanding asynchronous batch submissions
//! - Failure records persisted for inspection and resume

pub mod batch;
pub mod error;
pub mod item;
pub mod phase;

// Re-export common types
pub use batch::{BatchId, BatchJob, BatchJobState};
pub use error::{TransitionError, TransitionResult};
pub use item::{
    ArtifactKind, FailureKind, FailureRecord, ItemStatus, ProviderRef, WorkItem, WorkItemId,
};
pub use phase::{Phase, Stage};
