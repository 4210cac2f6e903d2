//! Write-through ledger handle shared by every pipeline component.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use storyreel_models::{
    BatchId, BatchJob, ItemStatus, Phase, TransitionResult, WorkItem, WorkItemId,
};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::document::{LedgerDocument, RepairReport, LEDGER_VERSION};
use crate::error::{LedgerError, LedgerResult};

/// Durable store of all work item and batch state.
///
/// A single async mutex serialises writers, so every read-modify-write of a
/// record runs without interleaving. Each mutation is applied to a copy,
/// persisted, and only then committed in memory: a failed write leaves both
/// the file and the in-memory view at the last acknowledged state.
pub struct Ledger {
    inner: Mutex<Inner>,
}

struct Inner {
    /// `None` for ephemeral or archived ledgers.
    path: Option<PathBuf>,
    doc: LedgerDocument,
}

impl Ledger {
    /// Load the ledger at `path`, or create an empty one there.
    pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let path = path.into();
        let doc = if path.exists() {
            let doc = read_document(&path)?;
            info!(
                path = %path.display(),
                run_id = %doc.run_id,
                items = doc.items.len(),
                open_batches = doc.open_batches().len(),
                "Loaded existing ledger"
            );
            doc
        } else {
            let doc = LedgerDocument::new();
            write_document(&path, &doc)?;
            info!(path = %path.display(), run_id = %doc.run_id, "Created new ledger");
            doc
        };

        Ok(Self::with_path(Some(path), doc))
    }

    /// Load an existing ledger without creating one.
    pub fn load(path: impl Into<PathBuf>) -> LedgerResult<Option<Self>> {
        let path = path.into();
        if !path.exists() {
            return Ok(None);
        }
        let doc = read_document(&path)?;
        Ok(Some(Self::with_path(Some(path), doc)))
    }

    /// Memory-only ledger. Nothing is written to disk.
    pub fn ephemeral() -> Self {
        Self::with_path(None, LedgerDocument::new())
    }

    fn with_path(path: Option<PathBuf>, doc: LedgerDocument) -> Self {
        Self {
            inner: Mutex::new(Inner { path, doc }),
        }
    }

    /// Backing file, if the ledger is persisted.
    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn run_id(&self) -> String {
        self.inner.lock().await.doc.run_id.clone()
    }

    /// Copy of the whole document.
    pub async fn snapshot(&self) -> LedgerDocument {
        self.inner.lock().await.doc.clone()
    }

    pub async fn get(&self, id: &WorkItemId) -> LedgerResult<WorkItem> {
        self.inner
            .lock()
            .await
            .doc
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::ItemNotFound(id.clone()))
    }

    /// Insert or overwrite an item by id.
    pub async fn upsert(&self, item: WorkItem) -> LedgerResult<()> {
        self.commit(|doc| {
            doc.items.insert(item.id.clone(), item);
            Ok(())
        })
        .await
    }

    /// Apply a transition to one item atomically.
    ///
    /// A rejected transition leaves the item untouched.
    pub async fn update_item<T, F>(&self, id: &WorkItemId, mutator: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut WorkItem) -> TransitionResult<T>,
    {
        self.commit(|doc| {
            let item = doc
                .items
                .get_mut(id)
                .ok_or_else(|| LedgerError::ItemNotFound(id.clone()))?;
            mutator(item).map_err(|e| LedgerError::transition(id, e))
        })
        .await
    }

    /// All items, in creation order.
    pub async fn items(&self) -> Vec<WorkItem> {
        self.inner
            .lock()
            .await
            .doc
            .items_in_order()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Items at `phase`, optionally restricted to one status.
    pub async fn list_by_phase(&self, phase: Phase, status: Option<ItemStatus>) -> Vec<WorkItem> {
        self.inner.lock().await.doc.list_by_phase(phase, status)
    }

    pub async fn next_seq(&self) -> u32 {
        self.inner.lock().await.doc.next_seq()
    }

    pub async fn open_batch_jobs(&self) -> Vec<BatchJob> {
        self.inner.lock().await.doc.open_batches()
    }

    pub async fn get_batch(&self, batch_id: &BatchId) -> LedgerResult<BatchJob> {
        self.inner
            .lock()
            .await
            .doc
            .batches
            .get(batch_id)
            .cloned()
            .ok_or_else(|| LedgerError::BatchNotFound(batch_id.clone()))
    }

    pub async fn record_batch_job(&self, batch: BatchJob) -> LedgerResult<()> {
        self.commit(|doc| {
            doc.batches.insert(batch.batch_id.clone(), batch);
            Ok(())
        })
        .await
    }

    /// Apply a transition to one batch job atomically.
    pub async fn update_batch_job<T, F>(&self, batch_id: &BatchId, mutator: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut BatchJob) -> TransitionResult<T>,
    {
        self.commit(|doc| {
            let batch = doc
                .batches
                .get_mut(batch_id)
                .ok_or_else(|| LedgerError::BatchNotFound(batch_id.clone()))?;
            mutator(batch).map_err(|e| LedgerError::transition(batch_id, e))
        })
        .await
    }

    /// Reconcile in-flight markers after a restart. See [`LedgerDocument::repair`].
    pub async fn repair_for_resume(&self) -> LedgerResult<RepairReport> {
        let report = self.commit(|doc| Ok(doc.repair())).await?;
        if !report.is_empty() {
            warn!(
                released = report.released.len(),
                relinked = report.relinked.len(),
                "Repaired in-flight state left by previous run"
            );
        }
        Ok(report)
    }

    /// Whether every item is `Done` or terminally failed.
    pub async fn is_complete(&self) -> bool {
        self.inner.lock().await.doc.all_terminal()
    }

    /// Move the ledger file into `archive_dir`.
    ///
    /// The in-memory view stays usable; later mutations are not persisted.
    pub async fn archive(&self, archive_dir: &Path) -> LedgerResult<Option<PathBuf>> {
        let mut inner = self.inner.lock().await;
        let Some(path) = inner.path.clone() else {
            return Ok(None);
        };
        let doc = &inner.doc;
        fs::create_dir_all(archive_dir).map_err(|e| LedgerError::io(archive_dir, e))?;
        let target = archive_dir.join(format!(
            "ledger-{}-{}.json",
            doc.run_id,
            Utc::now().format("%Y%m%dT%H%M%S")
        ));
        if let Err(e) = fs::rename(&path, &target) {
            // Cross-device moves fall back to copy + remove.
            debug!(error = %e, "Rename failed, copying ledger into archive");
            fs::copy(&path, &target).map_err(|e| LedgerError::io(&target, e))?;
            fs::remove_file(&path).map_err(|e| LedgerError::io(&path, e))?;
        }
        info!(run_id = %doc.run_id, archive = %target.display(), "Archived ledger");
        inner.path = None;
        Ok(Some(target))
    }

    async fn commit<T, F>(&self, mutator: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut LedgerDocument) -> LedgerResult<T>,
    {
        let mut inner = self.inner.lock().await;
        let mut next = inner.doc.clone();
        let out = mutator(&mut next)?;
        next.updated_at = Utc::now();
        if let Some(path) = &inner.path {
            write_document(path, &next)?;
        }
        inner.doc = next;
        Ok(out)
    }
}

fn read_document(path: &Path) -> LedgerResult<LedgerDocument> {
    let raw = fs::read(path).map_err(|e| LedgerError::io(path, e))?;
    let doc: LedgerDocument = serde_json::from_slice(&raw).map_err(|source| LedgerError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    if doc.version > LEDGER_VERSION {
        return Err(LedgerError::UnsupportedVersion {
            found: doc.version,
            supported: LEDGER_VERSION,
        });
    }
    Ok(doc)
}

/// Replace the file at `path` atomically: write a sibling temp file, fsync,
/// then rename over the target.
fn write_document(path: &Path, doc: &LedgerDocument) -> LedgerResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| LedgerError::io(&dir, e))?;

    let bytes = serde_json::to_vec_pretty(doc)?;
    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| LedgerError::io(&dir, e))?;
    tmp.write_all(&bytes).map_err(|e| LedgerError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| LedgerError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| LedgerError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use storyreel_models::{ArtifactKind, BatchJobState, ProviderRef, TransitionError};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("ledger.json");
        let ledger = Ledger::open(&path).unwrap();
        assert!(path.exists());
        assert!(ledger.items().await.is_empty());
    }

    #[tokio::test]
    async fn test_mutations_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");

        let ledger = Ledger::open(&path).unwrap();
        let item = WorkItem::new(0, 3);
        let id = item.id.clone();
        ledger.upsert(item).await.unwrap();
        ledger
            .update_item(&id, |i| i.mark_in_flight(ProviderRef::sync("openai")))
            .await
            .unwrap();
        ledger
            .update_item(&id, |i| {
                i.complete_phase(ArtifactKind::TitleText, PathBuf::from("t.txt"))
            })
            .await
            .unwrap();
        let run_id = ledger.run_id().await;
        drop(ledger);

        let reloaded = Ledger::open(&path).unwrap();
        assert_eq!(reloaded.run_id().await, run_id);
        let item = reloaded.get(&id).await.unwrap();
        assert_eq!(item.phase, Phase::TitleReady);
        assert_eq!(item.status, ItemStatus::Ready);
    }

    #[tokio::test]
    async fn test_rejected_transition_is_not_applied() {
        let ledger = Ledger::ephemeral();
        let item = WorkItem::new(0, 3);
        let id = item.id.clone();
        ledger.upsert(item).await.unwrap();

        let err = ledger
            .update_item(&id, |i| i.advance(Phase::StoryPending))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Transition {
                source: TransitionError::InvalidStatus { .. },
                ..
            }
        ));
        assert!(!err.is_storage_failure());
        assert_eq!(ledger.get(&id).await.unwrap().phase, Phase::TitlePending);
    }

    #[tokio::test]
    async fn test_list_by_phase_and_batches() {
        let ledger = Ledger::ephemeral();
        let mut ids = Vec::new();
        for seq in 0..3 {
            let item = WorkItem::new(seq, 3);
            ids.push(item.id.clone());
            ledger.upsert(item).await.unwrap();
        }

        let pending = ledger
            .list_by_phase(Phase::TitlePending, Some(ItemStatus::Pending))
            .await;
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[0].seq, 0);

        let batch = BatchJob::new(
            BatchId::from_string("b1"),
            "openai-batch",
            Phase::TitlePending,
            ids.clone(),
        );
        ledger.record_batch_job(batch).await.unwrap();
        assert_eq!(ledger.open_batch_jobs().await.len(), 1);

        ledger
            .update_batch_job(&BatchId::from_string("b1"), |b| {
                b.close(BatchJobState::Complete, None)
            })
            .await
            .unwrap();
        assert!(ledger.open_batch_jobs().await.is_empty());

        let missing = ledger
            .update_batch_job(&BatchId::from_string("nope"), |b| {
                b.record_poll(BatchJobState::Polling)
            })
            .await;
        assert!(matches!(missing, Err(LedgerError::BatchNotFound(_))));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, b"{ not json").unwrap();
        let err = Ledger::open(&path).err().unwrap();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
        assert!(err.is_storage_failure());
    }

    #[tokio::test]
    async fn test_archive_moves_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = Ledger::open(&path).unwrap();

        let archived = ledger
            .archive(&dir.path().join("archive"))
            .await
            .unwrap()
            .unwrap();
        assert!(!path.exists());
        assert!(archived.exists());
        assert!(ledger.path().await.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        assert!(Ledger::load(dir.path().join("absent.json")).unwrap().is_none());
    }
}
