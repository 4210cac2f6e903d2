//! Batch job lifecycle: submit, poll, reconcile, time out.
//!
//! Every step is a short, resumable operation against the ledger. A poll
//! never blocks for the lifetime of the batch; the driver calls
//! [`BatchCoordinator::poll_due`] once per tick and the ledger records where
//! each batch stands, so a restarted process continues polling without
//! re-submitting anything.
//!
//! Reconciliation is idempotent. Slot outcomes are applied in index order and
//! each applied index is recorded in [`BatchJob::resolved`]; an item whose
//! provider ref no longer points at the batch is left untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use storyreel_ledger::Ledger;
use storyreel_models::{
    BatchId, BatchJob, BatchJobState, FailureKind, FailureRecord, Phase, ProviderRef, WorkItemId,
};
use storyreel_providers::{
    BatchProvider, BatchStatus, GenerationOutput, GenerationRequest, ProviderError, SlotError,
};
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactStore;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;
use crate::transitions::{complete_text, fail_item};

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

/// Drives batch jobs recorded in the ledger.
pub struct BatchCoordinator {
    ledger: Arc<Ledger>,
    store: ArtifactStore,
    poll_interval: chrono::Duration,
    timeout: chrono::Duration,
}

impl BatchCoordinator {
    pub fn new(
        ledger: Arc<Ledger>,
        store: ArtifactStore,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            poll_interval: to_chrono(poll_interval),
            timeout: to_chrono(timeout),
        }
    }

    /// Submit one batch for items sitting in `phase`.
    ///
    /// `slots[i]` becomes result index `i`. The batch is recorded before any
    /// item is linked to it; a crash in between is repaired on resume.
    /// Provider failures are returned as [`OrchestratorError::Provider`] with
    /// no item touched.
    pub async fn submit(
        &self,
        provider: &Arc<dyn BatchProvider>,
        phase: Phase,
        slots: Vec<(WorkItemId, GenerationRequest)>,
    ) -> OrchestratorResult<BatchJob> {
        let (item_ids, requests): (Vec<_>, Vec<_>) = slots.into_iter().unzip();
        let batch_id = provider.submit_batch(&requests).await?;

        let job = BatchJob::new(batch_id.clone(), provider.name(), phase, item_ids.clone());
        self.ledger
            .record_batch_job(job.clone())
            .await
            .map_err(OrchestratorError::ledger_context(format!("recording batch {}", batch_id)))?;

        for (index, id) in item_ids.iter().enumerate() {
            let slot = ProviderRef::batch(provider.name(), batch_id.clone(), index);
            self.ledger
                .update_item(id, |item| item.mark_in_flight(slot))
                .await
                .map_err(OrchestratorError::ledger_at(id, phase))?;
        }

        metrics::record_batch_submitted(provider.name());
        info!(
            batch_id = %batch_id,
            provider = provider.name(),
            phase = %phase,
            items = item_ids.len(),
            "Batch submitted"
        );
        Ok(job)
    }

    /// Poll every open batch whose poll interval has elapsed.
    ///
    /// Returns the number of batches polled.
    pub async fn poll_due(
        &self,
        provider: &Arc<dyn BatchProvider>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<usize> {
        let mut polled = 0;
        for job in self.ledger.open_batch_jobs().await {
            if job.is_due(self.poll_interval, now) || job.is_expired(self.timeout, now) {
                self.poll_once(provider, &job).await?;
                polled += 1;
            }
        }
        Ok(polled)
    }

    /// Time until the next open batch is due for a poll.
    pub async fn next_poll_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.ledger
            .open_batch_jobs()
            .await
            .iter()
            .map(|job| match job.last_polled_at {
                Some(last) => (last + self.poll_interval - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO),
                None => Duration::ZERO,
            })
            .min()
    }

    /// One poll round trip for `job`.
    ///
    /// Applies whatever results are available, closes the batch once every
    /// slot is resolved, and times it out when it outlives the age ceiling.
    /// Polling a closed batch is a no-op.
    pub async fn poll_once(
        &self,
        provider: &Arc<dyn BatchProvider>,
        job: &BatchJob,
    ) -> OrchestratorResult<BatchJob> {
        let batch_id = job.batch_id.clone();
        let batch = self.get_batch(&batch_id).await?;
        if !batch.is_open() {
            debug!(batch_id = %batch_id, state = %batch.state, "Batch already closed");
            return Ok(batch);
        }
        let now = Utc::now();

        match provider.poll_batch(&batch_id).await {
            Ok(BatchStatus::Pending) => {
                let state = match batch.state {
                    BatchJobState::PartiallyComplete => BatchJobState::PartiallyComplete,
                    _ => BatchJobState::Polling,
                };
                self.record_poll(&batch_id, state).await?;
                metrics::record_batch_poll("pending");
                debug!(batch_id = %batch_id, polls = batch.poll_count + 1, "Batch still pending");
            }
            Ok(BatchStatus::PartiallyDone(indices)) => {
                self.record_poll(&batch_id, BatchJobState::PartiallyComplete).await?;
                metrics::record_batch_poll("partial");
                debug!(batch_id = %batch_id, available = indices.len(), "Batch partially done");
                self.reconcile(provider, &batch_id, false).await?;
            }
            Ok(BatchStatus::Done) => {
                self.record_poll(&batch_id, BatchJobState::PartiallyComplete).await?;
                metrics::record_batch_poll("done");
                self.reconcile(provider, &batch_id, true).await?;
            }
            Ok(BatchStatus::Failed(reason)) => {
                self.record_poll(&batch_id, BatchJobState::Polling).await?;
                metrics::record_batch_poll("failed");
                self.abandon(&batch_id, BatchJobState::Failed, FailureKind::BatchRejected, reason)
                    .await?;
            }
            Err(e) => {
                self.record_poll(&batch_id, batch.state).await?;
                metrics::record_batch_poll("error");
                warn!(batch_id = %batch_id, error = %e, "Batch poll failed");
                if !e.is_retryable() {
                    self.abandon(
                        &batch_id,
                        BatchJobState::Failed,
                        FailureKind::BatchRejected,
                        e.to_string(),
                    )
                    .await?;
                }
            }
        }

        let batch = self.get_batch(&batch_id).await?;
        if batch.is_open() && batch.is_expired(self.timeout, now) {
            let reason = format!(
                "batch exceeded its {}s age ceiling without completing",
                self.timeout.num_seconds()
            );
            metrics::record_batch_poll("timed_out");
            self.abandon(&batch_id, BatchJobState::TimedOut, FailureKind::BatchTimeout, reason)
                .await?;
        }

        self.get_batch(&batch_id).await
    }

    async fn reconcile(
        &self,
        provider: &Arc<dyn BatchProvider>,
        batch_id: &BatchId,
        done: bool,
    ) -> OrchestratorResult<()> {
        let results = match provider.fetch_results(batch_id).await {
            Ok(results) => results,
            Err(e) => {
                // Results are fetched again on the next poll.
                warn!(batch_id = %batch_id, error = %e, "Fetching batch results failed");
                return Ok(());
            }
        };

        let batch = self.get_batch(batch_id).await?;
        let mut applied = 0;
        for (index, result) in results {
            if index >= batch.len() || batch.resolved.contains(&index) {
                continue;
            }
            self.apply_slot(&batch, index, result).await?;
            applied += 1;
        }

        if done {
            let batch = self.get_batch(batch_id).await?;
            for index in batch.unresolved_indices() {
                let missing: Result<GenerationOutput, SlotError> =
                    Err(SlotError::new("provider returned no result for this request", None));
                self.apply_slot(&batch, index, missing).await?;
            }
            self.close(batch_id, BatchJobState::Complete, None).await?;
            info!(batch_id = %batch_id, items = batch.len(), "Batch complete");
        } else {
            info!(batch_id = %batch_id, applied, "Applied partial batch results");
        }
        Ok(())
    }

    /// Apply one slot outcome and mark the index resolved.
    async fn apply_slot(
        &self,
        batch: &BatchJob,
        index: usize,
        result: Result<GenerationOutput, SlotError>,
    ) -> OrchestratorResult<()> {
        let id = &batch.item_ids[index];
        let item = self.ledger.get(id).await.map_err(OrchestratorError::ledger_at(id, batch.phase))?;

        if item.belongs_to_batch(&batch.batch_id) {
            match result {
                Ok(output) => {
                    complete_text(&self.ledger, &self.store, id, batch.phase, &output.text).await?;
                }
                Err(slot) => {
                    let failure = FailureRecord::new(
                        batch.phase,
                        FailureKind::PartialBatch,
                        slot.message,
                        slot.retryable,
                    );
                    fail_item(&self.ledger, id, failure).await?;
                }
            }
        } else {
            debug!(batch_id = %batch.batch_id, index, item_id = %id, "Slot no longer owned by batch");
        }

        self.ledger
            .update_batch_job(&batch.batch_id, |b| {
                b.mark_resolved(index);
                Ok(())
            })
            .await
            .map_err(OrchestratorError::ledger_context(format!("resolving slot {} of {}", index, batch.batch_id)))?;
        Ok(())
    }

    /// Fail every unresolved slot, then close the batch.
    async fn abandon(
        &self,
        batch_id: &BatchId,
        state: BatchJobState,
        kind: FailureKind,
        reason: String,
    ) -> OrchestratorResult<()> {
        let batch = self.get_batch(batch_id).await?;
        let mut failed = 0;
        for index in batch.unresolved_indices() {
            let id = &batch.item_ids[index];
            let item = self.ledger.get(id).await.map_err(OrchestratorError::ledger_at(id, batch.phase))?;
            if item.belongs_to_batch(batch_id) {
                let failure = FailureRecord::new(batch.phase, kind, reason.clone(), true);
                fail_item(&self.ledger, id, failure).await?;
                failed += 1;
            }
        }
        self.close(batch_id, state, Some(reason.clone())).await?;
        warn!(batch_id = %batch_id, state = %state, failed, "Batch closed: {}", reason);
        Ok(())
    }

    async fn record_poll(&self, batch_id: &BatchId, state: BatchJobState) -> OrchestratorResult<()> {
        self.ledger
            .update_batch_job(batch_id, |b| b.record_poll(state))
            .await
            .map_err(OrchestratorError::ledger_context(format!("recording poll of {}", batch_id)))
    }

    async fn close(
        &self,
        batch_id: &BatchId,
        state: BatchJobState,
        reason: Option<String>,
    ) -> OrchestratorResult<()> {
        self.ledger
            .update_batch_job(batch_id, |b| b.close(state, reason))
            .await
            .map_err(OrchestratorError::ledger_context(format!("closing batch {}", batch_id)))
    }

    async fn get_batch(&self, batch_id: &BatchId) -> OrchestratorResult<BatchJob> {
        self.ledger
            .get_batch(batch_id)
            .await
            .map_err(OrchestratorError::ledger_context(format!("loading batch {}", batch_id)))
    }
}

/// Failure recorded against items whose batch submission was refused.
pub(crate) fn submission_failure(phase: Phase, error: &ProviderError) -> FailureRecord {
    FailureRecord::new(phase, FailureKind::Provider, error.to_string(), error.is_retryable())
}
