//! Pipeline driver: the single control loop of a run.
//!
//! Each tick retries due failures, promotes ready items, polls due batches
//! and runs one wave. When nothing moved, the loop sleeps until the next
//! batch poll or retry is due. A stop request is observed between these
//! steps only, so every item is left in a state a later run can resume.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use storyreel_ledger::Ledger;
use storyreel_models::{ArtifactKind, WorkItem, WorkItemId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::artifacts::clean_title;
use crate::config::{DriveMode, PipelineConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::scheduler::PhaseScheduler;
use crate::summary::RunSummary;

const MIN_IDLE_WAIT: Duration = Duration::from_millis(10);

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every item is terminal; the ledger was archived.
    Completed {
        summary: RunSummary,
        archive: Option<PathBuf>,
    },
    /// Stopped on request; the ledger is left in place for resume.
    Stopped { summary: RunSummary },
    /// Items remain but none can make progress in this process.
    Stalled { summary: RunSummary },
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            RunOutcome::Completed { summary, .. }
            | RunOutcome::Stopped { summary }
            | RunOutcome::Stalled { summary } => summary,
        }
    }
}

pub struct PipelineDriver {
    config: PipelineConfig,
    ledger: Arc<Ledger>,
    scheduler: PhaseScheduler,
    shutdown: watch::Receiver<bool>,
}

impl PipelineDriver {
    pub fn new(
        config: PipelineConfig,
        ledger: Arc<Ledger>,
        scheduler: PhaseScheduler,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            ledger,
            scheduler,
            shutdown,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub async fn summary(&self) -> RunSummary {
        RunSummary::from_document(&self.ledger.snapshot().await)
    }

    /// Create the run's items when the ledger is empty.
    ///
    /// Custom titles become items that start at `TitleReady`; the rest start
    /// at `TitlePending`. Returns the number of items created.
    pub async fn seed(&self) -> OrchestratorResult<usize> {
        if !self.ledger.items().await.is_empty() {
            info!("Ledger already holds items, resuming");
            return Ok(0);
        }

        let total = self.config.total_stories() as usize;
        let max_retries = self.config.max_retries;
        let store = self.scheduler.store();
        let mut created = 0;

        let titles = self
            .config
            .custom_titles
            .iter()
            .map(|t| clean_title(t))
            .filter(|t| !t.is_empty());
        for title in titles.take(total) {
            let id = WorkItemId::new();
            let path = store
                .write_text(&id, ArtifactKind::TitleText, &title)
                .await
                .map_err(OrchestratorError::io_context(format!("writing custom title {:?}", title)))?;
            let mut item = WorkItem::with_title(self.ledger.next_seq().await, max_retries, title, path);
            item.id = id;
            self.upsert(item).await?;
            created += 1;
        }
        while created < total {
            self.upsert(WorkItem::new(self.ledger.next_seq().await, max_retries))
                .await?;
            created += 1;
        }

        info!(items = created, "Seeded run");
        Ok(created)
    }

    async fn upsert(&self, item: WorkItem) -> OrchestratorResult<()> {
        self.ledger
            .upsert(item)
            .await
            .map_err(OrchestratorError::ledger_context("seeding items"))
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Legacy mode works on the oldest unfinished item only.
    async fn focus(&self, mode: DriveMode) -> Option<WorkItemId> {
        match mode {
            DriveMode::Bulk => None,
            DriveMode::Legacy => self
                .ledger
                .items()
                .await
                .into_iter()
                .find(|item| !item.is_terminal())
                .map(|item| item.id),
        }
    }

    pub async fn run(&mut self) -> OrchestratorResult<RunOutcome> {
        let mode = self.config.drive_mode();
        self.ledger
            .repair_for_resume()
            .await
            .map_err(OrchestratorError::ledger_context("repairing in-flight state"))?;
        self.scheduler.ensure_open_batches_pollable().await?;

        let open_batches = self.ledger.open_batch_jobs().await.len();
        info!(
            mode = %mode,
            items = self.ledger.items().await.len(),
            open_batches,
            "Pipeline started"
        );

        loop {
            if self.stop_requested() {
                return Ok(self.stopped().await);
            }

            let now = Utc::now();
            let focus = self.focus(mode).await;
            let focus = focus.as_ref();

            let mut progressed = self.scheduler.retry_due(focus, now).await?;
            progressed += self.scheduler.promote_ready(focus).await?;
            progressed += self.scheduler.poll_batches(now).await?;
            if self.stop_requested() {
                return Ok(self.stopped().await);
            }
            progressed += self.scheduler.run_wave(focus).await?;
            progressed += self.scheduler.finalize_outputs().await?;

            if self.ledger.is_complete().await {
                return self.completed().await;
            }
            if progressed > 0 {
                continue;
            }

            let now = Utc::now();
            let next_poll = self.scheduler.next_poll_in(now).await;
            let next_retry = self.scheduler.next_retry_in(focus, now).await;
            let Some(wait) = next_poll.into_iter().chain(next_retry).min() else {
                warn!("No item can make progress");
                let summary = self.summary().await;
                summary.log();
                return Ok(RunOutcome::Stalled { summary });
            };

            let wait = wait.max(MIN_IDLE_WAIT);
            debug!(wait_ms = wait.as_millis() as u64, "Idle until next poll or retry");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                Ok(()) = self.shutdown.changed() => {}
            }
        }
    }

    async fn stopped(&self) -> RunOutcome {
        let summary = self.summary().await;
        info!(
            open_batches = summary.open_batches,
            "Stop requested, ledger kept for resume"
        );
        summary.log();
        RunOutcome::Stopped { summary }
    }

    async fn completed(&self) -> OrchestratorResult<RunOutcome> {
        let summary = self.summary().await;
        summary.log();
        let archive = self
            .ledger
            .archive(&self.config.archive_dir)
            .await
            .map_err(OrchestratorError::ledger_context("archiving the ledger"))?;
        Ok(RunOutcome::Completed { summary, archive })
    }
}
