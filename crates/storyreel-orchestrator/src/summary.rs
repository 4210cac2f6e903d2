//! End-of-run report.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use storyreel_ledger::LedgerDocument;
use storyreel_models::{FailureKind, ItemStatus, Phase, WorkItemId};
use tracing::{error, info};

/// A failed item that will not be retried.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalFailure {
    pub item_id: WorkItemId,
    pub title: String,
    pub phase: Phase,
    pub kind: FailureKind,
    pub message: String,
    pub retries_used: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total: usize,
    pub done: usize,
    /// Items with work left
    pub in_progress: usize,
    pub by_phase: BTreeMap<Phase, BTreeMap<ItemStatus, usize>>,
    pub failures: Vec<TerminalFailure>,
    pub open_batches: usize,
}

impl RunSummary {
    pub fn from_document(doc: &LedgerDocument) -> Self {
        let mut by_phase: BTreeMap<Phase, BTreeMap<ItemStatus, usize>> = BTreeMap::new();
        let mut failures = Vec::new();
        let mut done = 0;
        let mut in_progress = 0;

        for item in doc.items_in_order() {
            *by_phase
                .entry(item.phase)
                .or_default()
                .entry(item.status)
                .or_default() += 1;

            if item.is_done() {
                done += 1;
            } else if item.is_terminally_failed() {
                let (kind, message) = item
                    .last_failure
                    .as_ref()
                    .map(|f| (f.kind, f.message.clone()))
                    .unwrap_or((FailureKind::Provider, String::new()));
                failures.push(TerminalFailure {
                    item_id: item.id.clone(),
                    title: item.title.clone(),
                    phase: item.phase,
                    kind,
                    message,
                    retries_used: item.retry_count,
                });
            } else {
                in_progress += 1;
            }
        }

        Self {
            run_id: doc.run_id.clone(),
            total: doc.items.len(),
            done,
            in_progress,
            by_phase,
            failures,
            open_batches: doc.open_batches().len(),
        }
    }

    /// Every item finished successfully.
    pub fn is_clean(&self) -> bool {
        self.total > 0 && self.done == self.total
    }

    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            total = self.total,
            done = self.done,
            failed = self.failures.len(),
            in_progress = self.in_progress,
            open_batches = self.open_batches,
            "Run summary"
        );
        for failure in &self.failures {
            error!(
                item_id = %failure.item_id,
                title = %failure.title,
                phase = %failure.phase,
                kind = %failure.kind,
                retries_used = failure.retries_used,
                "Item failed: {}", failure.message
            );
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;
        writeln!(
            f,
            "  {} items: {} done, {} failed, {} in progress, {} open batches",
            self.total,
            self.done,
            self.failures.len(),
            self.in_progress,
            self.open_batches
        )?;
        for (phase, statuses) in &self.by_phase {
            let counts = statuses
                .iter()
                .map(|(status, n)| format!("{}={}", status, n))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "  {:<16} {}", phase.as_str(), counts)?;
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failed items:")?;
            for failure in &self.failures {
                let title = if failure.title.is_empty() {
                    "(untitled)"
                } else {
                    failure.title.as_str()
                };
                writeln!(
                    f,
                    "  {} {:?} at {} [{}] after {} retries: {}",
                    failure.item_id,
                    title,
                    failure.phase,
                    failure.kind,
                    failure.retries_used,
                    failure.message
                )?;
            }
        }
        Ok(())
    }
}
