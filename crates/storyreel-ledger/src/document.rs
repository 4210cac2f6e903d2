//! The persisted ledger document and its pure (I/O free) operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storyreel_models::{
    BatchId, BatchJob, ItemStatus, Phase, ProviderRef, WorkItem, WorkItemId,
};
use uuid::Uuid;

/// Current on-disk format version.
pub const LEDGER_VERSION: u32 = 1;

/// Whole-run state as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub version: u32,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: BTreeMap<WorkItemId, WorkItem>,
    #[serde(default)]
    pub batches: BTreeMap<BatchId, BatchJob>,
}

/// What [`LedgerDocument::repair`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// In-flight items whose call could no longer deliver, reset to pending.
    pub released: Vec<WorkItemId>,
    /// Items re-linked to the open batch slot that serves them.
    pub relinked: Vec<WorkItemId>,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.relinked.is_empty()
    }
}

impl LedgerDocument {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: LEDGER_VERSION,
            run_id: Uuid::new_v4().simple().to_string(),
            created_at: now,
            updated_at: now,
            items: BTreeMap::new(),
            batches: BTreeMap::new(),
        }
    }

    /// Items ordered by creation sequence.
    pub fn items_in_order(&self) -> Vec<&WorkItem> {
        let mut items: Vec<&WorkItem> = self.items.values().collect();
        items.sort_by_key(|i| i.seq);
        items
    }

    pub fn list_by_phase(&self, phase: Phase, status: Option<ItemStatus>) -> Vec<WorkItem> {
        self.items_in_order()
            .into_iter()
            .filter(|i| i.phase == phase && status.map_or(true, |s| i.status == s))
            .cloned()
            .collect()
    }

    pub fn open_batches(&self) -> Vec<BatchJob> {
        let mut open: Vec<BatchJob> = self
            .batches
            .values()
            .filter(|b| b.is_open())
            .cloned()
            .collect();
        open.sort_by_key(|b| b.submitted_at);
        open
    }

    /// Every item is `Done` or terminally failed.
    pub fn all_terminal(&self) -> bool {
        !self.items.is_empty() && self.items.values().all(|i| i.is_terminal())
    }

    pub fn next_seq(&self) -> u32 {
        self.items.values().map(|i| i.seq + 1).max().unwrap_or(0)
    }

    /// Bring in-flight markers back in line with what can still deliver.
    ///
    /// Run once after loading a ledger left behind by a previous process:
    /// - a synchronous call that was in flight died with the process, so the
    ///   item returns to `Pending` in the same phase;
    /// - an item pointing at a batch that is missing or closed is released the
    ///   same way;
    /// - an unresolved slot of an open batch whose item was never linked
    ///   (crash between recording the batch and linking its items) is linked.
    ///
    /// None of these consume a retry.
    pub fn repair(&mut self) -> RepairReport {
        let mut report = RepairReport::default();

        for item in self.items.values_mut() {
            if item.status != ItemStatus::InFlight {
                continue;
            }
            let still_owned = match &item.provider_ref {
                Some(ProviderRef::Batch { batch_id, .. }) => self
                    .batches
                    .get(batch_id)
                    .map(|b| b.is_open() && b.index_of(&item.id).is_some())
                    .unwrap_or(false),
                _ => false,
            };
            if !still_owned && item.release().is_ok() {
                report.released.push(item.id.clone());
            }
        }

        for batch in self.batches.values().filter(|b| b.is_open()) {
            for index in batch.unresolved_indices() {
                let Some(item) = self.items.get_mut(&batch.item_ids[index]) else {
                    continue;
                };
                if item.phase != batch.phase
                    || item.status != ItemStatus::Pending
                    || item.provider_ref.is_some()
                {
                    continue;
                }
                let slot = ProviderRef::batch(batch.provider.clone(), batch.batch_id.clone(), index);
                if item.mark_in_flight(slot).is_ok() {
                    report.relinked.push(item.id.clone());
                }
            }
        }

        report
    }
}

impl Default for LedgerDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use storyreel_models::{ArtifactKind, BatchJobState};

    fn doc_with_items(n: u32) -> LedgerDocument {
        let mut doc = LedgerDocument::new();
        for seq in 0..n {
            let item = WorkItem::new(seq, 2);
            doc.items.insert(item.id.clone(), item);
        }
        doc
    }

    #[test]
    fn test_repair_releases_sync_in_flight() {
        let mut doc = doc_with_items(1);
        let id = doc.items.keys().next().unwrap().clone();
        doc.items
            .get_mut(&id)
            .unwrap()
            .mark_in_flight(ProviderRef::sync("openai"))
            .unwrap();

        let report = doc.repair();
        assert_eq!(report.released, vec![id.clone()]);
        let item = &doc.items[&id];
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.phase, Phase::TitlePending);
        assert_eq!(item.retry_count, 0);
    }

    #[test]
    fn test_repair_keeps_open_batch_slots() {
        let mut doc = doc_with_items(2);
        let ids: Vec<_> = doc.items_in_order().iter().map(|i| i.id.clone()).collect();
        let batch = BatchJob::new(
            BatchId::from_string("b1"),
            "openai-batch",
            Phase::TitlePending,
            ids.clone(),
        );
        // Only the first slot was linked before the crash.
        doc.items
            .get_mut(&ids[0])
            .unwrap()
            .mark_in_flight(ProviderRef::batch("openai-batch", batch.batch_id.clone(), 0))
            .unwrap();
        doc.batches.insert(batch.batch_id.clone(), batch);

        let report = doc.repair();
        assert!(report.released.is_empty());
        assert_eq!(report.relinked, vec![ids[1].clone()]);
        assert!(doc.items[&ids[1]].belongs_to_batch(&BatchId::from_string("b1")));
    }

    #[test]
    fn test_repair_releases_items_of_closed_batch() {
        let mut doc = doc_with_items(1);
        let id = doc.items.keys().next().unwrap().clone();
        let mut batch = BatchJob::new(
            BatchId::from_string("b1"),
            "openai-batch",
            Phase::TitlePending,
            vec![id.clone()],
        );
        doc.items
            .get_mut(&id)
            .unwrap()
            .mark_in_flight(ProviderRef::batch("openai-batch", batch.batch_id.clone(), 0))
            .unwrap();
        batch.close(BatchJobState::Failed, Some("cancelled".into())).unwrap();
        doc.batches.insert(batch.batch_id.clone(), batch);

        let report = doc.repair();
        assert_eq!(report.released, vec![id.clone()]);
        // Closed batches never re-link.
        assert!(report.relinked.is_empty());
    }

    #[test]
    fn test_all_terminal() {
        let mut doc = doc_with_items(1);
        assert!(!doc.all_terminal());
        let item = doc.items.values_mut().next().unwrap();
        item.phase = Phase::SubtitlePending;
        item.complete_phase(ArtifactKind::Subtitle, PathBuf::from("s.srt"))
            .unwrap();
        assert!(doc.all_terminal());
        assert!(!LedgerDocument::new().all_terminal());
    }
}
