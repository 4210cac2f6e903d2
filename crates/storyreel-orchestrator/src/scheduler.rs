//! Phase scheduler.
//!
//! Decides which items are eligible for which phase and executes one step of
//! work at a time against the ledger:
//! - failed items whose backoff elapsed re-enter their phase
//! - `*Ready` items advance to the next `*Pending` phase
//! - the earliest `*Pending` phase with waiting items runs as one wave
//!
//! The scheduler only ever dispatches on the provider's capability shape
//! ([`ProviderAdapter::Sync`] or [`ProviderAdapter::Batch`]), never on its
//! name. Restricting a step to one item (`focus`) gives legacy mode; without a
//! focus every eligible item moves together (bulk mode).

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use storyreel_ledger::Ledger;
use storyreel_media::{
    AudioArtifact, BackgroundSelection, SpeechSynthesizer, SubtitleMode, SubtitleStyle, Subtitler,
    VideoAssembler, VoiceReference,
};
use storyreel_models::{
    ArtifactKind, FailureKind, FailureRecord, ItemStatus, Phase, ProviderRef, Stage, WorkItem,
    WorkItemId,
};
use storyreel_providers::{BatchProvider, ProviderAdapter, SyncProvider};
use tracing::{debug, error, info, Instrument};

use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::coordinator::{submission_failure, BatchCoordinator};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::logging::ItemLogger;
use crate::materializer::Materializer;
use crate::metrics;
use crate::prompts::Prompts;
use crate::retry::RetryPolicy;
use crate::transitions::{artifact_failure, complete_text, fail_item};

/// Non-AI collaborators used by the media phases.
#[derive(Clone)]
pub struct Collaborators {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub assembler: Arc<dyn VideoAssembler>,
    pub subtitler: Arc<dyn Subtitler>,
    pub materializer: Arc<dyn Materializer>,
}

/// Fixed inputs for the media phases.
#[derive(Debug, Clone)]
pub struct MediaInputs {
    pub voice: VoiceReference,
    pub background: BackgroundSelection,
    /// `None` skips the subtitle phase
    pub subtitles: Option<SubtitleStyle>,
}

impl MediaInputs {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            voice: config.voice_reference(),
            background: config.background(),
            subtitles: config.subtitle_style(),
        }
    }
}

/// Outcome of running one stage for one item.
enum StageOutcome {
    Completed,
    Failed(FailureRecord),
}

pub struct PhaseScheduler {
    ledger: Arc<Ledger>,
    provider: ProviderAdapter,
    coordinator: BatchCoordinator,
    collaborators: Collaborators,
    prompts: Prompts,
    media: MediaInputs,
    store: ArtifactStore,
    retry: RetryPolicy,
    max_batch_size: usize,
    max_concurrency: usize,
    /// Items whose output was attempted during this process lifetime.
    finalize_attempted: Mutex<HashSet<WorkItemId>>,
}

impl PhaseScheduler {
    pub fn new(
        config: &PipelineConfig,
        ledger: Arc<Ledger>,
        provider: ProviderAdapter,
        collaborators: Collaborators,
        prompts: Prompts,
    ) -> Self {
        let store = ArtifactStore::new(&config.work_dir);
        let coordinator = BatchCoordinator::new(
            ledger.clone(),
            store.clone(),
            config.poll_interval,
            config.batch_timeout,
        );
        Self {
            ledger,
            provider,
            coordinator,
            collaborators,
            prompts,
            media: MediaInputs::from_config(config),
            store,
            retry: config.retry_policy(),
            max_batch_size: config.max_batch_size.max(1),
            max_concurrency: config.max_concurrency.max(1),
            finalize_attempted: Mutex::new(HashSet::new()),
        }
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    async fn candidates(&self, focus: Option<&WorkItemId>) -> Vec<WorkItem> {
        let items = self.ledger.items().await;
        match focus {
            Some(id) => items.into_iter().filter(|i| &i.id == id).collect(),
            None => items,
        }
    }

    /// Re-enter the phase of every failed item whose backoff has elapsed.
    pub async fn retry_due(
        &self,
        focus: Option<&WorkItemId>,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<usize> {
        let mut retried = 0;
        for item in self.candidates(focus).await {
            if item.status != ItemStatus::Failed || !self.retry.is_due(&item, now) {
                continue;
            }
            let attempt = self
                .ledger
                .update_item(&item.id, |i| {
                    i.retry()?;
                    Ok(i.retry_count)
                })
                .await
                .map_err(OrchestratorError::ledger_at(&item.id, item.phase))?;
            info!(
                item_id = %item.id,
                phase = %item.phase,
                attempt,
                max_retries = item.max_retries,
                "Retrying item"
            );
            retried += 1;
        }
        Ok(retried)
    }

    /// Time until the next failed item becomes due for a retry.
    pub async fn next_retry_in(
        &self,
        focus: Option<&WorkItemId>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        self.candidates(focus)
            .await
            .iter()
            .filter_map(|item| self.retry.remaining_wait(item, now))
            .min()
    }

    /// Advance every `*Ready` item to its next `*Pending` phase.
    ///
    /// `VideoReady` goes straight to `Done` when subtitles are disabled.
    pub async fn promote_ready(&self, focus: Option<&WorkItemId>) -> OrchestratorResult<usize> {
        let mut promoted = 0;
        for item in self.candidates(focus).await {
            if item.status != ItemStatus::Ready || item.is_done() {
                continue;
            }
            let next = match item.phase {
                Phase::VideoReady if self.media.subtitles.is_none() => Some(Phase::Done),
                phase => phase.next_pending(),
            };
            let Some(next) = next else {
                continue;
            };
            self.ledger
                .update_item(&item.id, |i| i.advance(next))
                .await
                .map_err(OrchestratorError::ledger_at(&item.id, item.phase))?;
            debug!(item_id = %item.id, from = %item.phase, to = %next, "Item advanced");
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Poll open batches that are due. No-op for synchronous providers.
    pub async fn poll_batches(&self, now: DateTime<Utc>) -> OrchestratorResult<usize> {
        match &self.provider {
            ProviderAdapter::Batch(provider) => self.coordinator.poll_due(provider, now).await,
            ProviderAdapter::Sync(_) => Ok(0),
        }
    }

    /// Fail fast when the ledger holds open batches this provider cannot poll.
    pub async fn ensure_open_batches_pollable(&self) -> OrchestratorResult<()> {
        if self.provider.is_batch() {
            return Ok(());
        }
        let open = self.ledger.open_batch_jobs().await;
        if open.is_empty() {
            return Ok(());
        }
        let mut submitted_via: Vec<&str> = open.iter().map(|b| b.provider.as_str()).collect();
        submitted_via.sort_unstable();
        submitted_via.dedup();
        Err(OrchestratorError::config(format!(
            "ledger has {} open batch(es) submitted via {}, which {} cannot poll; \
             resume with that batch provider (e.g. --provider openai-batch)",
            open.len(),
            submitted_via.join(", "),
            self.provider.name()
        )))
    }

    /// Time until the next open batch is due. `None` for synchronous providers.
    pub async fn next_poll_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        match &self.provider {
            ProviderAdapter::Batch(_) => self.coordinator.next_poll_in(now).await,
            ProviderAdapter::Sync(_) => None,
        }
    }

    /// Run the earliest `*Pending` phase that has waiting items.
    ///
    /// Returns the number of items the wave touched.
    pub async fn run_wave(&self, focus: Option<&WorkItemId>) -> OrchestratorResult<usize> {
        let waiting: Vec<WorkItem> = self
            .candidates(focus)
            .await
            .into_iter()
            .filter(|i| i.status == ItemStatus::Pending && i.phase.is_pending())
            .collect();
        let Some(phase) = waiting.iter().map(|i| i.phase).min() else {
            return Ok(0);
        };
        let Some(stage) = phase.stage() else {
            return Ok(0);
        };
        let wave: Vec<WorkItem> = waiting.into_iter().filter(|i| i.phase == phase).collect();
        info!(phase = %phase, items = wave.len(), "Running wave");
        self.run_stage(stage, wave).await
    }

    /// Execute `stage` for `items`, which must all sit in its pending phase.
    pub async fn run_stage(&self, stage: Stage, items: Vec<WorkItem>) -> OrchestratorResult<usize> {
        let count = items.len();
        if stage.is_text() {
            if let ProviderAdapter::Batch(provider) = &self.provider {
                self.submit_batches(provider, stage, items).await?;
                return Ok(count);
            }
        }

        let results: Vec<OrchestratorResult<()>> = stream::iter(items)
            .map(|item| self.run_item(stage, item))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        for result in results {
            result?;
        }
        Ok(count)
    }

    async fn run_item(&self, stage: Stage, item: WorkItem) -> OrchestratorResult<()> {
        let logger = ItemLogger::new(&item.id, stage);
        let span = logger.create_span();
        async {
            if let Some(failure) = self.check_prerequisites(stage, &item) {
                return fail_item(&self.ledger, &item.id, failure).await;
            }
            let result = match &self.provider {
                ProviderAdapter::Sync(provider) if stage.is_text() => {
                    self.run_sync_text(provider, stage, &item, &logger).await
                }
                _ => self.run_media(stage, &item, &logger).await,
            };
            match result {
                Err(e) if !e.is_fatal() => {
                    logger.log_error(&e.to_string());
                    let (kind, retryable) = match &e {
                        OrchestratorError::Provider(p) => (FailureKind::Provider, p.is_retryable()),
                        _ => (FailureKind::Artifact, true),
                    };
                    let failure = FailureRecord::new(item.phase, kind, e.to_string(), retryable);
                    fail_item(&self.ledger, &item.id, failure).await
                }
                other => other,
            }
        }
        .instrument(span)
        .await
    }

    /// Inputs a stage needs before it can be submitted.
    fn check_prerequisites(&self, stage: Stage, item: &WorkItem) -> Option<FailureRecord> {
        let required = match stage {
            Stage::Title => None,
            Stage::Story => Some(ArtifactKind::TitleText),
            Stage::Audio => Some(ArtifactKind::StoryText),
            Stage::Video => Some(ArtifactKind::Audio),
            Stage::Subtitle => Some(ArtifactKind::Video),
        }?;
        let present = item.artifact(required).map(|p| p.exists()).unwrap_or(false);
        let missing_title = stage == Stage::Story && item.title.trim().is_empty();
        if present && !missing_title {
            return None;
        }
        Some(FailureRecord::new(
            item.phase,
            FailureKind::MissingInput,
            format!("{} artifact is missing", required),
            false,
        ))
    }

    async fn submit_batches(
        &self,
        provider: &Arc<dyn BatchProvider>,
        stage: Stage,
        items: Vec<WorkItem>,
    ) -> OrchestratorResult<()> {
        let phase = stage.pending_phase();
        let mut eligible = Vec::with_capacity(items.len());
        for item in items {
            match self.check_prerequisites(stage, &item) {
                Some(failure) => fail_item(&self.ledger, &item.id, failure).await?,
                None => eligible.push(item),
            }
        }

        for chunk in eligible.chunks(self.max_batch_size) {
            let slots: Vec<_> = chunk
                .iter()
                .enumerate()
                .filter_map(|(index, item)| {
                    self.prompts
                        .request(stage, index, item)
                        .map(|request| (item.id.clone(), request))
                })
                .collect();
            for _ in &slots {
                metrics::record_phase_attempt(phase);
            }

            match self.coordinator.submit(provider, phase, slots).await {
                Ok(_) => {}
                Err(OrchestratorError::Provider(e)) => {
                    error!(phase = %phase, items = chunk.len(), error = %e, "Batch submission failed");
                    for item in chunk {
                        fail_item(&self.ledger, &item.id, submission_failure(phase, &e)).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn run_sync_text(
        &self,
        provider: &Arc<dyn SyncProvider>,
        stage: Stage,
        item: &WorkItem,
        logger: &ItemLogger,
    ) -> OrchestratorResult<()> {
        let phase = item.phase;
        let Some(request) = self.prompts.request(stage, 0, item) else {
            return Ok(());
        };
        self.mark_in_flight(item, provider.name()).await?;
        logger.log_start(provider.name());
        metrics::record_phase_attempt(phase);
        let started = Instant::now();

        match provider.submit(&request).await {
            Ok(output) => {
                if complete_text(&self.ledger, &self.store, &item.id, phase, &output.text).await? {
                    logger.log_completion(provider.name());
                }
            }
            Err(e) => {
                logger.log_warning(&e.to_string());
                let failure =
                    FailureRecord::new(phase, FailureKind::Provider, e.to_string(), e.is_retryable());
                fail_item(&self.ledger, &item.id, failure).await?;
            }
        }
        metrics::record_phase_duration(phase, started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn run_media(
        &self,
        stage: Stage,
        item: &WorkItem,
        logger: &ItemLogger,
    ) -> OrchestratorResult<()> {
        let phase = item.phase;
        let collaborator = match stage {
            Stage::Audio => "tts",
            Stage::Video => "assembler",
            Stage::Subtitle => "subtitler",
            Stage::Title | Stage::Story => {
                return Err(OrchestratorError::config(format!(
                    "{} stage needs a text provider",
                    stage
                )))
            }
        };
        self.mark_in_flight(item, collaborator).await?;
        logger.log_start(collaborator);
        metrics::record_phase_attempt(phase);
        let started = Instant::now();
        let dir = match self.store.ensure_item_dir(&item.id).await {
            Ok(dir) => dir,
            Err(e) => {
                let failure = artifact_failure(phase, produced_artifact(stage), &e);
                logger.log_warning(&failure.message);
                return fail_item(&self.ledger, &item.id, failure).await;
            }
        };

        let outcome = match stage {
            Stage::Audio => self.synthesize(item, &dir).await?,
            Stage::Video => self.assemble(item, &dir).await?,
            _ => self.subtitle(item, &dir).await?,
        };
        metrics::record_phase_duration(phase, started.elapsed().as_secs_f64());

        match outcome {
            StageOutcome::Completed => logger.log_completion(collaborator),
            StageOutcome::Failed(failure) => {
                logger.log_warning(&failure.message);
                fail_item(&self.ledger, &item.id, failure).await?;
            }
        }
        Ok(())
    }

    async fn synthesize(&self, item: &WorkItem, dir: &Path) -> OrchestratorResult<StageOutcome> {
        let phase = item.phase;
        let story = match item.artifact(ArtifactKind::StoryText) {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(text) => text,
                Err(e) => return Ok(missing_input(phase, format!("cannot read story: {}", e))),
            },
            None => return Ok(missing_input(phase, "story artifact is missing")),
        };

        match self
            .collaborators
            .synthesizer
            .synthesize(&story, &self.media.voice, dir)
            .await
        {
            Ok(audio) => {
                self.ledger
                    .update_item(&item.id, |i| {
                        i.audio_duration = Some(audio.duration);
                        i.complete_phase(ArtifactKind::Audio, audio.path)
                    })
                    .await
                    .map_err(OrchestratorError::ledger_at(&item.id, phase))?;
                Ok(StageOutcome::Completed)
            }
            Err(e) => Ok(StageOutcome::Failed(FailureRecord::new(
                phase,
                FailureKind::Synthesis,
                e.to_string(),
                e.is_retryable(),
            ))),
        }
    }

    async fn assemble(&self, item: &WorkItem, dir: &Path) -> OrchestratorResult<StageOutcome> {
        let phase = item.phase;
        let (Some(path), Some(duration)) = (item.artifact(ArtifactKind::Audio), item.audio_duration)
        else {
            return Ok(missing_input(phase, "audio artifact or duration is missing"));
        };
        let audio = AudioArtifact {
            path: path.clone(),
            duration,
        };

        match self
            .collaborators
            .assembler
            .assemble(&audio, &self.media.background, dir)
            .await
        {
            Ok(video) => {
                self.ledger
                    .update_item(&item.id, |i| {
                        i.speed_factor = Some(video.speed_factor);
                        i.complete_phase(ArtifactKind::Video, video.path)
                    })
                    .await
                    .map_err(OrchestratorError::ledger_at(&item.id, phase))?;
                Ok(StageOutcome::Completed)
            }
            Err(e) => Ok(StageOutcome::Failed(FailureRecord::new(
                phase,
                FailureKind::Assembly,
                e.to_string(),
                e.is_retryable(),
            ))),
        }
    }

    async fn subtitle(&self, item: &WorkItem, dir: &Path) -> OrchestratorResult<StageOutcome> {
        let phase = item.phase;
        let Some(video) = item.artifact(ArtifactKind::Video) else {
            return Ok(missing_input(phase, "video artifact is missing"));
        };
        // Items resumed after subtitles were switched off still finish with a sidecar file.
        let style = self
            .media
            .subtitles
            .clone()
            .unwrap_or_else(|| SubtitleStyle::new(SubtitleMode::Srt));

        match self
            .collaborators
            .subtitler
            .generate(video, &item.title, &style, dir)
            .await
        {
            Ok(subtitles) => {
                self.ledger
                    .update_item(&item.id, |i| {
                        if let Some(ass) = subtitles.ass {
                            i.artifacts.insert(ArtifactKind::SubtitleAss, ass);
                        }
                        i.complete_phase(ArtifactKind::Subtitle, subtitles.srt)
                    })
                    .await
                    .map_err(OrchestratorError::ledger_at(&item.id, phase))?;
                Ok(StageOutcome::Completed)
            }
            Err(e) => Ok(StageOutcome::Failed(FailureRecord::new(
                phase,
                FailureKind::Subtitle,
                e.to_string(),
                e.is_retryable(),
            ))),
        }
    }

    /// Persist the in-flight marker before any external call starts.
    async fn mark_in_flight(&self, item: &WorkItem, provider: &str) -> OrchestratorResult<()> {
        self.ledger
            .update_item(&item.id, |i| i.mark_in_flight(ProviderRef::sync(provider)))
            .await
            .map_err(OrchestratorError::ledger_at(&item.id, item.phase))
    }

    /// Write the output directory of finished items.
    ///
    /// Each item is attempted once per process; a failure is recorded on the
    /// item and retried by the next run.
    pub async fn finalize_outputs(&self) -> OrchestratorResult<usize> {
        let mut finalized = 0;
        for item in self.ledger.items().await {
            if !item.is_done() || item.artifact(ArtifactKind::Output).is_some() {
                continue;
            }
            let first_attempt = match self.finalize_attempted.lock() {
                Ok(mut attempted) => attempted.insert(item.id.clone()),
                Err(poisoned) => poisoned.into_inner().insert(item.id.clone()),
            };
            if !first_attempt {
                continue;
            }

            match self.collaborators.materializer.finalize(&item).await {
                Ok(dir) => {
                    self.ledger
                        .update_item(&item.id, |i| {
                            i.artifacts.insert(ArtifactKind::Output, dir.clone());
                            i.last_failure = None;
                            Ok(())
                        })
                        .await
                        .map_err(OrchestratorError::ledger_at(&item.id, item.phase))?;
                    metrics::record_item_finished("done");
                    info!(
                        item_id = %item.id,
                        title = %item.title,
                        retries_used = item.retry_count,
                        output = %dir.display(),
                        "Story finished"
                    );
                    finalized += 1;
                }
                Err(e) => {
                    error!(item_id = %item.id, error = %e, "Writing output failed");
                    metrics::record_item_failure(item.phase, FailureKind::Materialize);
                    let failure =
                        FailureRecord::new(item.phase, FailureKind::Materialize, e.to_string(), true);
                    self.ledger
                        .update_item(&item.id, |i| {
                            i.last_failure = Some(failure);
                            Ok(())
                        })
                        .await
                        .map_err(OrchestratorError::ledger_at(&item.id, item.phase))?;
                }
            }
        }
        Ok(finalized)
    }
}

fn produced_artifact(stage: Stage) -> ArtifactKind {
    match stage {
        Stage::Title => ArtifactKind::TitleText,
        Stage::Story => ArtifactKind::StoryText,
        Stage::Audio => ArtifactKind::Audio,
        Stage::Video => ArtifactKind::Video,
        Stage::Subtitle => ArtifactKind::Subtitle,
    }
}

fn missing_input(phase: Phase, message: impl Into<String>) -> StageOutcome {
    StageOutcome::Failed(FailureRecord::new(phase, FailureKind::MissingInput, message, false))
}
