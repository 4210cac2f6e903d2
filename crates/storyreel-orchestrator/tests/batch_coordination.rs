//! Batch submission, polling and reconciliation against a scripted provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{scripted, Harness, PollStep, ScriptedBatch};
use storyreel_models::{ArtifactKind, BatchJobState, FailureKind, ItemStatus, Phase, Stage};
use storyreel_providers::{BatchProvider, ProviderAdapter};
use tokio_test::assert_ok;

#[tokio::test]
async fn test_five_items_complete_over_two_polls() {
    let h = Harness::new();
    h.seed_items(5).await;
    let (provider, adapter) = scripted([PollStep::Partial(vec![0, 1, 2]), PollStep::Done]);
    let scheduler = h.scheduler(adapter);

    let wave = h.ledger.items().await;
    assert_eq!(assert_ok!(scheduler.run_stage(Stage::Title, wave).await), 5);
    assert_eq!(provider.submits(), 1);

    let jobs = h.ledger.open_batch_jobs().await;
    assert_eq!(jobs.len(), 1);
    let job = jobs[0].clone();
    assert_eq!(job.state, BatchJobState::Submitted);
    assert!(h
        .ledger
        .items()
        .await
        .iter()
        .all(|i| i.status == ItemStatus::InFlight));

    let batch: Arc<dyn BatchProvider> = provider.clone();
    let job = assert_ok!(scheduler.coordinator().poll_once(&batch, &job).await);
    assert_eq!(job.state, BatchJobState::PartiallyComplete);

    let items = h.ledger.items().await;
    for item in &items[..3] {
        assert_eq!(item.phase, Phase::TitleReady);
        assert_eq!(item.status, ItemStatus::Ready);
    }
    for item in &items[3..] {
        assert_eq!(item.phase, Phase::TitlePending);
        assert_eq!(item.status, ItemStatus::InFlight);
    }

    let job = assert_ok!(scheduler.coordinator().poll_once(&batch, &job).await);
    assert_eq!(job.state, BatchJobState::Complete);
    assert!(h.ledger.open_batch_jobs().await.is_empty());

    for (i, item) in h.ledger.items().await.iter().enumerate() {
        assert_eq!(item.phase, Phase::TitleReady, "item {}", i);
        assert_eq!(item.title, format!("Tale title_{}", i));
        assert_eq!(item.retry_count, 0);
        let path = item.artifact(ArtifactKind::TitleText).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), item.title);
    }
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let h = Harness::new();
    h.seed_items(3).await;
    let (provider, adapter) = scripted([PollStep::Done]);
    let scheduler = h.scheduler(adapter);
    scheduler
        .run_stage(Stage::Title, h.ledger.items().await)
        .await
        .unwrap();

    let batch: Arc<dyn BatchProvider> = provider.clone();
    let job = h.ledger.open_batch_jobs().await.remove(0);
    let closed = scheduler.coordinator().poll_once(&batch, &job).await.unwrap();
    assert_eq!(closed.state, BatchJobState::Complete);
    let after_first = h.ledger.items().await;

    // Re-applying the same job must not touch items or poll the provider again.
    let polls = provider.poll_calls.load(std::sync::atomic::Ordering::SeqCst);
    let again = scheduler.coordinator().poll_once(&batch, &job).await.unwrap();
    assert_eq!(again.state, BatchJobState::Complete);
    assert_eq!(provider.poll_calls.load(std::sync::atomic::Ordering::SeqCst), polls);
    assert_eq!(h.ledger.items().await, after_first);
}

#[tokio::test]
async fn test_rejected_batch_fails_items_retryably() {
    let h = Harness::new();
    h.seed_items(2).await;
    let (provider, adapter) = scripted([PollStep::Failed("validation failed".into())]);
    let scheduler = h.scheduler(adapter);
    scheduler
        .run_stage(Stage::Title, h.ledger.items().await)
        .await
        .unwrap();

    let batch: Arc<dyn BatchProvider> = provider.clone();
    let job = h.ledger.open_batch_jobs().await.remove(0);
    let job = scheduler.coordinator().poll_once(&batch, &job).await.unwrap();
    assert_eq!(job.state, BatchJobState::Failed);
    assert_eq!(job.failure_reason.as_deref(), Some("validation failed"));

    for item in h.ledger.items().await {
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.phase, Phase::TitlePending);
        let failure = item.last_failure.unwrap();
        assert_eq!(failure.kind, FailureKind::BatchRejected);
        assert!(failure.retryable);
    }
}

#[tokio::test]
async fn test_batch_timeout_degrades_to_item_retry() {
    let mut h = Harness::new();
    h.config.batch_timeout = Duration::ZERO;
    h.seed_items(2).await;
    let (provider, adapter) = scripted([PollStep::Pending, PollStep::Pending]);
    let scheduler = h.scheduler(adapter);
    scheduler
        .run_stage(Stage::Title, h.ledger.items().await)
        .await
        .unwrap();

    let batch: Arc<dyn BatchProvider> = provider.clone();
    let job = h.ledger.open_batch_jobs().await.remove(0);
    let job = scheduler.coordinator().poll_once(&batch, &job).await.unwrap();
    assert_eq!(job.state, BatchJobState::TimedOut);
    assert!(h.ledger.open_batch_jobs().await.is_empty());

    for item in h.ledger.items().await {
        let failure = item.last_failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::BatchTimeout);
        assert!(item.can_retry());
    }

    // The next wave resubmits the items in a fresh batch.
    let retried = scheduler.retry_due(None, chrono::Utc::now()).await.unwrap();
    assert_eq!(retried, 2);
    scheduler.run_wave(None).await.unwrap();
    assert_eq!(provider.submits(), 2);
    assert!(h
        .ledger
        .items()
        .await
        .iter()
        .all(|i| i.status == ItemStatus::InFlight && i.retry_count == 1));
}

#[tokio::test]
async fn test_waves_respect_max_batch_size() {
    let mut h = Harness::new();
    h.config.max_batch_size = 2;
    h.seed_items(5).await;
    let (provider, adapter) = scripted([PollStep::Done]);
    let scheduler = h.scheduler(adapter);

    scheduler.run_wave(None).await.unwrap();

    assert_eq!(provider.submits(), 3);
    let mut sizes: Vec<usize> = h
        .ledger
        .open_batch_jobs()
        .await
        .iter()
        .map(|b| b.len())
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2, 2]);
}

#[tokio::test]
async fn test_failed_slots_do_not_affect_siblings() {
    let h = Harness::new();
    h.seed_items(5).await;
    let provider = Arc::new(ScriptedBatch::with_script([PollStep::Done]).with_failing_slots([1, 3]));
    let scheduler = h.scheduler(ProviderAdapter::Batch(provider.clone()));
    scheduler
        .run_stage(Stage::Title, h.ledger.items().await)
        .await
        .unwrap();

    let batch: Arc<dyn BatchProvider> = provider.clone();
    let job = h.ledger.open_batch_jobs().await.remove(0);
    let job = scheduler.coordinator().poll_once(&batch, &job).await.unwrap();
    assert_eq!(job.state, BatchJobState::Complete);

    for (i, item) in h.ledger.items().await.iter().enumerate() {
        if i == 1 || i == 3 {
            assert_eq!(item.status, ItemStatus::Failed, "item {}", i);
            assert_eq!(item.phase, Phase::TitlePending);
            let failure = item.last_failure.as_ref().unwrap();
            assert_eq!(failure.kind, FailureKind::PartialBatch);
            assert!(item.can_retry());
        } else {
            assert_eq!(item.status, ItemStatus::Ready, "item {}", i);
            assert_eq!(item.phase, Phase::TitleReady);
        }
    }
}
