//! Work item definitions: one story's end-to-end progress record.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TransitionError, TransitionResult};
use crate::{BatchId, Phase};

/// Unique identifier for a work item.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct WorkItemId(pub String);

impl WorkItemId {
    /// Generate a new random item ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Processing status within the current phase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Eligible for submission once prerequisites exist
    #[default]
    Pending,
    /// Submitted; awaiting a synchronous response or a batch slot
    InFlight,
    /// Phase output is available
    Ready,
    /// Last attempt failed (may be retried)
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InFlight => "in_flight",
            ItemStatus::Ready => "ready",
            ItemStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Correlates an in-flight item with the call or batch slot serving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderRef {
    /// A single blocking call (AI provider or local collaborator).
    Sync { provider: String, request_id: String },
    /// A slot inside an asynchronous batch submission.
    Batch {
        provider: String,
        batch_id: BatchId,
        index: usize,
    },
}

impl ProviderRef {
    pub fn sync(provider: impl Into<String>) -> Self {
        Self::Sync {
            provider: provider.into(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn batch(provider: impl Into<String>, batch_id: BatchId, index: usize) -> Self {
        Self::Batch {
            provider: provider.into(),
            batch_id,
            index,
        }
    }

    pub fn batch_id(&self) -> Option<&BatchId> {
        match self {
            ProviderRef::Batch { batch_id, .. } => Some(batch_id),
            ProviderRef::Sync { .. } => None,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderRef::Sync { provider, .. } | ProviderRef::Batch { provider, .. } => provider,
        }
    }
}

/// Kind of artifact produced by a phase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    TitleText,
    StoryText,
    Audio,
    Video,
    Subtitle,
    SubtitleAss,
    /// Materialized per-story output directory
    Output,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::TitleText => "title-text",
            ArtifactKind::StoryText => "story-text",
            ArtifactKind::Audio => "audio",
            ArtifactKind::Video => "video",
            ArtifactKind::Subtitle => "subtitle",
            ArtifactKind::SubtitleAss => "subtitle-ass",
            ArtifactKind::Output => "output",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// AI provider call failed
    Provider,
    /// Owning batch exceeded its age ceiling before resolving the slot
    BatchTimeout,
    /// Owning batch was rejected or failed as a whole
    BatchRejected,
    /// Slot failed inside an otherwise healthy batch
    PartialBatch,
    Synthesis,
    Assembly,
    Subtitle,
    Materialize,
    /// A prerequisite artifact was missing or unreadable
    MissingInput,
    /// Writing an intermediate artifact failed
    Artifact,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Provider => "provider",
            FailureKind::BatchTimeout => "batch_timeout",
            FailureKind::BatchRejected => "batch_rejected",
            FailureKind::PartialBatch => "partial_batch",
            FailureKind::Synthesis => "synthesis",
            FailureKind::Assembly => "assembly",
            FailureKind::Subtitle => "subtitle",
            FailureKind::Materialize => "materialize",
            FailureKind::MissingInput => "missing_input",
            FailureKind::Artifact => "artifact",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Last failure recorded against an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FailureRecord {
    /// Phase the failure happened in
    pub phase: Phase,
    pub kind: FailureKind,
    pub message: String,
    /// Whether the retry policy may re-enter the phase
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(phase: Phase, kind: FailureKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            phase,
            kind,
            message: message.into(),
            retryable,
            at: Utc::now(),
        }
    }
}

/// One story's lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkItem {
    /// Unique item ID
    pub id: WorkItemId,

    /// Creation order within the run
    pub seq: u32,

    /// Story title (empty until the title phase completes)
    #[serde(default)]
    pub title: String,

    pub phase: Phase,

    #[serde(default)]
    pub status: ItemStatus,

    /// Correlation handle while in flight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ref: Option<ProviderRef>,

    /// Number of times a failed phase was re-entered
    #[serde(default)]
    pub retry_count: u32,

    /// Maximum re-entries allowed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Artifact locations, populated as phases complete
    #[serde(default)]
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureRecord>,

    /// Narration length in seconds, recorded by the audio phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,

    /// Playback speed applied during video assembly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_factor: Option<f64>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

fn default_max_retries() -> u32 {
    3
}

impl WorkItem {
    /// Create a new item at the start of the phase sequence.
    pub fn new(seq: u32, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: WorkItemId::new(),
            seq,
            title: String::new(),
            phase: Phase::TitlePending,
            status: ItemStatus::Pending,
            provider_ref: None,
            retry_count: 0,
            max_retries,
            artifacts: BTreeMap::new(),
            last_failure: None,
            audio_duration: None,
            speed_factor: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an item whose title was supplied up front.
    ///
    /// The title artifact must already exist at `title_path`.
    pub fn with_title(seq: u32, max_retries: u32, title: impl Into<String>, title_path: PathBuf) -> Self {
        let mut item = Self::new(seq, max_retries);
        item.title = title.into();
        item.phase = Phase::TitleReady;
        item.status = ItemStatus::Ready;
        item.artifacts.insert(ArtifactKind::TitleText, title_path);
        item
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&PathBuf> {
        self.artifacts.get(&kind)
    }

    /// Item reached the terminal success phase.
    pub fn is_done(&self) -> bool {
        self.phase.is_done()
    }

    /// Check if a failed item can re-enter its phase.
    pub fn can_retry(&self) -> bool {
        self.status == ItemStatus::Failed
            && self.retry_count < self.max_retries
            && self.last_failure.as_ref().map(|f| f.retryable).unwrap_or(false)
    }

    /// Failed with no retry left; excluded from scheduling.
    pub fn is_terminally_failed(&self) -> bool {
        self.status == ItemStatus::Failed && !self.can_retry()
    }

    /// No further work will ever be scheduled for this item.
    pub fn is_terminal(&self) -> bool {
        self.is_done() || self.is_terminally_failed()
    }

    /// Whether the item is currently owned by the given batch.
    pub fn belongs_to_batch(&self, batch_id: &BatchId) -> bool {
        self.status == ItemStatus::InFlight
            && self
                .provider_ref
                .as_ref()
                .and_then(|r| r.batch_id())
                .map(|b| b == batch_id)
                .unwrap_or(false)
    }

    /// Record that work for the current phase has been submitted.
    pub fn mark_in_flight(&mut self, provider_ref: ProviderRef) -> TransitionResult<()> {
        self.ensure_pending_phase()?;
        if self.status != ItemStatus::Pending {
            return Err(TransitionError::invalid_status("submit", self.status, self.phase));
        }
        self.status = ItemStatus::InFlight;
        self.provider_ref = Some(provider_ref);
        self.touch();
        Ok(())
    }

    /// Complete the current `*Pending` phase, recording its artifact.
    pub fn complete_phase(&mut self, kind: ArtifactKind, path: PathBuf) -> TransitionResult<()> {
        let ready = self.ensure_pending_phase()?;
        if !matches!(self.status, ItemStatus::Pending | ItemStatus::InFlight) {
            return Err(TransitionError::invalid_status("complete", self.status, self.phase));
        }
        self.artifacts.insert(kind, path);
        self.phase = ready;
        self.status = ItemStatus::Ready;
        self.provider_ref = None;
        self.last_failure = None;
        self.touch();
        Ok(())
    }

    /// Mark the current phase as failed.
    pub fn fail(&mut self, failure: FailureRecord) -> TransitionResult<()> {
        self.ensure_pending_phase()?;
        if !matches!(self.status, ItemStatus::Pending | ItemStatus::InFlight) {
            return Err(TransitionError::invalid_status("fail", self.status, self.phase));
        }
        self.status = ItemStatus::Failed;
        self.provider_ref = None;
        self.last_failure = Some(failure);
        self.touch();
        Ok(())
    }

    /// Re-enter the failed phase, consuming one retry.
    pub fn retry(&mut self) -> TransitionResult<()> {
        if self.status != ItemStatus::Failed {
            return Err(TransitionError::invalid_status("retry", self.status, self.phase));
        }
        if !self.can_retry() {
            return Err(TransitionError::RetriesExhausted {
                retry_count: self.retry_count,
                max_retries: self.max_retries,
            });
        }
        self.retry_count += 1;
        self.status = ItemStatus::Pending;
        self.touch();
        Ok(())
    }

    /// Drop an in-flight marker whose call can no longer deliver a result.
    ///
    /// Does not consume a retry.
    pub fn release(&mut self) -> TransitionResult<()> {
        if self.status != ItemStatus::InFlight {
            return Err(TransitionError::invalid_status("release", self.status, self.phase));
        }
        self.status = ItemStatus::Pending;
        self.provider_ref = None;
        self.touch();
        Ok(())
    }

    /// Move a `Ready` item forward to `next`.
    pub fn advance(&mut self, next: Phase) -> TransitionResult<()> {
        if self.status != ItemStatus::Ready {
            return Err(TransitionError::invalid_status("advance", self.status, self.phase));
        }
        if next <= self.phase {
            return Err(TransitionError::Regression {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.status = if next.is_done() {
            ItemStatus::Ready
        } else {
            ItemStatus::Pending
        };
        self.touch();
        Ok(())
    }

    fn ensure_pending_phase(&self) -> TransitionResult<Phase> {
        self.phase
            .ready_phase()
            .ok_or(TransitionError::NotPending(self.phase))
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
