//! In-process fakes shared by the orchestrator integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use storyreel_ledger::Ledger;
use storyreel_media::{
    AssemblyError, AudioArtifact, BackgroundSelection, SpeechSynthesizer, SubtitleArtifacts,
    SubtitleError, SubtitleStyle, Subtitler, SynthesisError, VideoArtifact, VideoAssembler,
    VoiceReference,
};
use storyreel_models::{BatchId, WorkItem};
use storyreel_orchestrator::{
    Collaborators, LocalMaterializer, PhaseScheduler, PipelineConfig, PipelineDriver, Prompts,
};
use storyreel_providers::{
    BatchProvider, BatchResults, BatchStatus, GenerationOutput, GenerationRequest, ProviderAdapter,
    ProviderError, ProviderResult, SlotError, SyncProvider,
};
use tempfile::TempDir;
use tokio::sync::watch;

/// Text a fake provider returns for `request`.
pub fn generated_text(request: &GenerationRequest) -> String {
    if request.custom_id.starts_with("title") {
        format!("\"Tale {}\"", request.custom_id)
    } else {
        format!("Once upon a time, {}.", request.user_prompt)
    }
}

/// Synchronous provider that answers every request.
#[derive(Default)]
pub struct EchoProvider {
    pub calls: AtomicUsize,
}

#[async_trait]
impl SyncProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<GenerationOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GenerationOutput::new(generated_text(request)))
    }
}

/// One scripted answer to `poll_batch`.
#[derive(Debug, Clone)]
pub enum PollStep {
    Pending,
    /// These indices become available
    Partial(Vec<usize>),
    Done,
    Failed(String),
}

#[derive(Default)]
struct SubmittedBatch {
    requests: Vec<GenerationRequest>,
    available: BTreeSet<usize>,
}

/// Batch provider driven by a queue of poll answers.
///
/// Once the script is exhausted every poll reports `Done`.
#[derive(Default)]
pub struct ScriptedBatch {
    script: Mutex<VecDeque<PollStep>>,
    batches: Mutex<BTreeMap<BatchId, SubmittedBatch>>,
    failing_slots: BTreeSet<usize>,
    pub submit_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
}

impl ScriptedBatch {
    pub fn with_script(steps: impl IntoIterator<Item = PollStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Slots at these indices resolve to an error in every batch.
    pub fn with_failing_slots(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.failing_slots = indices.into_iter().collect();
        self
    }

    pub fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchProvider for ScriptedBatch {
    fn name(&self) -> &str {
        "scripted-batch"
    }

    async fn submit_batch(&self, requests: &[GenerationRequest]) -> ProviderResult<BatchId> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let id = BatchId::from_string(format!("batch_{}", n));
        self.batches.lock().unwrap().insert(
            id.clone(),
            SubmittedBatch {
                requests: requests.to_vec(),
                available: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    async fn poll_batch(&self, batch_id: &BatchId) -> ProviderResult<BatchStatus> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front().unwrap_or(PollStep::Done);
        let mut batches = self.batches.lock().unwrap();
        let batch = batches
            .get_mut(batch_id)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unknown batch {}", batch_id)))?;
        Ok(match step {
            PollStep::Pending => BatchStatus::Pending,
            PollStep::Partial(indices) => {
                batch.available.extend(indices);
                BatchStatus::PartiallyDone(batch.available.clone())
            }
            PollStep::Done => {
                batch.available.extend(0..batch.requests.len());
                BatchStatus::Done
            }
            PollStep::Failed(reason) => BatchStatus::Failed(reason),
        })
    }

    async fn fetch_results(&self, batch_id: &BatchId) -> ProviderResult<BatchResults> {
        let batches = self.batches.lock().unwrap();
        let batch = batches
            .get(batch_id)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unknown batch {}", batch_id)))?;
        Ok(batch
            .available
            .iter()
            .map(|&i| {
                let result = if self.failing_slots.contains(&i) {
                    Err(SlotError::new("model refused the request", Some(500)))
                } else {
                    Ok(GenerationOutput::new(generated_text(&batch.requests[i])))
                };
                (i, result)
            })
            .collect())
    }
}

/// Writes a placeholder wav. Stories containing "poison" fail terminally.
#[derive(Default)]
pub struct FakeSynthesizer {
    failures: Mutex<VecDeque<SynthesisError>>,
    pub calls: AtomicUsize,
}

impl FakeSynthesizer {
    /// Fail the next `n` calls with a retryable error.
    pub fn failing(n: usize) -> Self {
        let failures = (0..n)
            .map(|_| SynthesisError::NoOutput("/tmp/f5-tts".into()))
            .collect();
        Self {
            failures: Mutex::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceReference,
        out_dir: &Path,
    ) -> Result<AudioArtifact, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if text.contains("poison") {
            return Err(SynthesisError::EmptyText);
        }
        let path = out_dir.join("gene_audio.wav");
        tokio::fs::write(&path, text).await.map_err(|e| SynthesisError::Media(e.into()))?;
        Ok(AudioArtifact {
            path,
            duration: 42.0,
        })
    }
}

#[derive(Default)]
pub struct FakeAssembler;

#[async_trait]
impl VideoAssembler for FakeAssembler {
    async fn assemble(
        &self,
        audio: &AudioArtifact,
        _background: &BackgroundSelection,
        out_dir: &Path,
    ) -> Result<VideoArtifact, AssemblyError> {
        let path = out_dir.join("gene_video.mp4");
        tokio::fs::write(&path, b"video").await.map_err(|e| AssemblyError::Media(e.into()))?;
        Ok(VideoArtifact {
            path,
            speed_factor: 1.0,
            duration: audio.duration,
        })
    }
}

#[derive(Default)]
pub struct FakeSubtitler;

#[async_trait]
impl Subtitler for FakeSubtitler {
    async fn generate(
        &self,
        _media: &Path,
        title: &str,
        _style: &SubtitleStyle,
        out_dir: &Path,
    ) -> Result<SubtitleArtifacts, SubtitleError> {
        let srt = out_dir.join("subtitles.srt");
        let cue = format!("1\n00:00:00,000 --> 00:00:03,000\n{}\n", title);
        tokio::fs::write(&srt, cue).await.map_err(|e| SubtitleError::Media(e.into()))?;
        Ok(SubtitleArtifacts {
            srt,
            ass: None,
            burned: false,
        })
    }
}

/// Temporary run directory, config and fake collaborators.
pub struct Harness {
    pub dir: TempDir,
    pub config: PipelineConfig,
    pub ledger: Arc<Ledger>,
    pub synthesizer: Arc<FakeSynthesizer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_synthesizer(FakeSynthesizer::default())
    }

    pub fn with_synthesizer(synthesizer: FakeSynthesizer) -> Self {
        let dir = TempDir::new().unwrap();
        let work_dir = dir.path().join("work");
        let config = PipelineConfig {
            story_count: 3,
            max_retries: 3,
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
            poll_interval: Duration::ZERO,
            ledger_path: work_dir.join("ledger.json"),
            archive_dir: work_dir.join("archive"),
            work_dir,
            output_dir: dir.path().join("output"),
            ..PipelineConfig::default()
        };
        let ledger = Arc::new(Ledger::open(&config.ledger_path).unwrap());
        Self {
            dir,
            config,
            ledger,
            synthesizer: Arc::new(synthesizer),
        }
    }

    /// Drop the in-memory ledger and load it back from disk.
    pub fn reopen(&mut self) {
        self.ledger = Arc::new(Ledger::open(&self.config.ledger_path).unwrap());
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            synthesizer: self.synthesizer.clone(),
            assembler: Arc::new(FakeAssembler),
            subtitler: Arc::new(FakeSubtitler),
            materializer: Arc::new(LocalMaterializer::new(&self.config.output_dir)),
        }
    }

    pub fn scheduler(&self, provider: ProviderAdapter) -> PhaseScheduler {
        PhaseScheduler::new(
            &self.config,
            self.ledger.clone(),
            provider,
            self.collaborators(),
            Prompts::new("Write a title.", "Write a story."),
        )
    }

    pub fn driver(&self, provider: ProviderAdapter) -> (PipelineDriver, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let driver = PipelineDriver::new(
            self.config.clone(),
            self.ledger.clone(),
            self.scheduler(provider),
            rx,
        );
        (driver, tx)
    }

    /// Insert `n` fresh items at `TitlePending`.
    pub async fn seed_items(&self, n: u32) -> Vec<WorkItem> {
        let mut items = Vec::new();
        for seq in 0..n {
            let item = WorkItem::new(seq, self.config.max_retries);
            self.ledger.upsert(item.clone()).await.unwrap();
            items.push(item);
        }
        items
    }
}

pub fn echo() -> (Arc<EchoProvider>, ProviderAdapter) {
    let provider = Arc::new(EchoProvider::default());
    (provider.clone(), ProviderAdapter::Sync(provider))
}

pub fn scripted(steps: impl IntoIterator<Item = PollStep>) -> (Arc<ScriptedBatch>, ProviderAdapter) {
    let provider = Arc::new(ScriptedBatch::with_script(steps));
    (provider.clone(), ProviderAdapter::Batch(provider))
}
