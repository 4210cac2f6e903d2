//! Batch job records: one asynchronous multi-item provider submission.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{TransitionError, TransitionResult};
use crate::{Phase, WorkItemId};

/// Provider-assigned batch identifier.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a batch submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobState {
    #[default]
    Submitted,
    Polling,
    PartiallyComplete,
    Complete,
    TimedOut,
    Failed,
}

impl BatchJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchJobState::Submitted => "submitted",
            BatchJobState::Polling => "polling",
            BatchJobState::PartiallyComplete => "partially_complete",
            BatchJobState::Complete => "complete",
            BatchJobState::TimedOut => "timed_out",
            BatchJobState::Failed => "failed",
        }
    }

    /// Still awaiting provider results.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            BatchJobState::Submitted | BatchJobState::Polling | BatchJobState::PartiallyComplete
        )
    }
}

impl fmt::Display for BatchJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tracking record for one batch submission.
///
/// `item_ids[i]` is the item served by result slot `i`. `resolved` holds the
/// slot indices whose outcome has already been applied to the ledger, which
/// keeps reconciliation idempotent across repeated polls and restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchJob {
    pub batch_id: BatchId,
    pub provider: String,
    /// `*Pending` phase the batch serves
    pub phase: Phase,
    pub item_ids: Vec<WorkItemId>,
    #[serde(default)]
    pub state: BatchJobState,
    #[serde(default)]
    pub resolved: BTreeSet<usize>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub poll_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(
        batch_id: BatchId,
        provider: impl Into<String>,
        phase: Phase,
        item_ids: Vec<WorkItemId>,
    ) -> Self {
        Self {
            batch_id,
            provider: provider.into(),
            phase,
            item_ids,
            state: BatchJobState::Submitted,
            resolved: BTreeSet::new(),
            submitted_at: Utc::now(),
            last_polled_at: None,
            poll_count: 0,
            failure_reason: None,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    /// Slot index serving the given item.
    pub fn index_of(&self, id: &WorkItemId) -> Option<usize> {
        self.item_ids.iter().position(|i| i == id)
    }

    /// Age ceiling exceeded.
    pub fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.submitted_at >= timeout
    }

    /// Whether the batch should be polled at `now` given the poll interval.
    pub fn is_due(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        match self.last_polled_at {
            Some(last) => now - last >= interval,
            None => true,
        }
    }

    /// Slot indices not yet applied, in ascending order.
    pub fn unresolved_indices(&self) -> Vec<usize> {
        (0..self.item_ids.len())
            .filter(|i| !self.resolved.contains(i))
            .collect()
    }

    pub fn all_resolved(&self) -> bool {
        self.resolved.len() >= self.item_ids.len()
    }

    /// Record that a slot's outcome was applied. Returns false if already resolved.
    pub fn mark_resolved(&mut self, index: usize) -> bool {
        self.resolved.insert(index)
    }

    /// Record a poll round trip and move the state forward.
    pub fn record_poll(&mut self, state: BatchJobState) -> TransitionResult<()> {
        if !self.is_open() {
            return Err(TransitionError::BatchClosed(self.state));
        }
        self.state = state;
        self.last_polled_at = Some(Utc::now());
        self.poll_count += 1;
        Ok(())
    }

    /// Move to a terminal state.
    pub fn close(&mut self, state: BatchJobState, reason: Option<String>) -> TransitionResult<()> {
        if !self.is_open() {
            return Err(TransitionError::BatchClosed(self.state));
        }
        self.state = state;
        self.failure_reason = reason;
        self.closed_at = Some(Utc::now());
        Ok(())
    }
}
