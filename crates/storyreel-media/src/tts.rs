//! Narration synthesis with F5-TTS.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::ToolRunner;
use crate::error::SynthesisError;
use crate::probe::probe_duration;

pub const AUDIO_FILE_NAME: &str = "gene_audio.wav";

/// Reference recording used for voice cloning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceReference {
    /// Reference audio clip
    pub audio: PathBuf,
    /// File holding the transcript of the reference clip
    pub transcript: PathBuf,
}

/// Synthesized narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
    /// Duration in seconds
    pub duration: f64,
}

/// Text-to-speech collaborator.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` into `out_dir`.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceReference,
        out_dir: &Path,
    ) -> Result<AudioArtifact, SynthesisError>;
}

/// Runs `f5-tts_infer-cli`.
#[derive(Debug, Clone)]
pub struct F5TtsSynthesizer {
    program: String,
    model: String,
    runner: ToolRunner,
}

impl Default for F5TtsSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl F5TtsSynthesizer {
    pub fn new() -> Self {
        Self {
            program: "f5-tts_infer-cli".to_string(),
            model: "F5TTS_v1_Base".to_string(),
            runner: ToolRunner::new().with_timeout(Duration::from_secs(30 * 60)),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_runner(mut self, runner: ToolRunner) -> Self {
        self.runner = runner;
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for F5TtsSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceReference,
        out_dir: &Path,
    ) -> Result<AudioArtifact, SynthesisError> {
        let text = clean_text(text);
        if text.is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        for file in [&voice.audio, &voice.transcript] {
            if !file.exists() {
                return Err(SynthesisError::MissingReference(file.clone()));
            }
        }
        let ref_text = tokio::fs::read_to_string(&voice.transcript).await?;

        // The CLI writes into a scratch dir; only the final wav is kept.
        let scratch = out_dir.join(".tts");
        if scratch.exists() {
            tokio::fs::remove_dir_all(&scratch).await?;
        }
        tokio::fs::create_dir_all(&scratch).await?;

        let args: Vec<std::ffi::OsString> = vec![
            "--model".into(),
            self.model.clone().into(),
            "--ref_audio".into(),
            voice.audio.clone().into(),
            "--ref_text".into(),
            ref_text.trim().to_string().into(),
            "--gen_text".into(),
            text.into(),
            "--output_dir".into(),
            scratch.clone().into(),
        ];
        self.runner.run(&self.program, args, Some(out_dir)).await?;

        let produced = find_wav(&scratch)
            .await?
            .ok_or_else(|| SynthesisError::NoOutput(scratch.clone()))?;
        let target = out_dir.join(AUDIO_FILE_NAME);
        tokio::fs::rename(&produced, &target).await?;
        tokio::fs::remove_dir_all(&scratch).await?;

        let duration = probe_duration(&target).await?;
        info!(path = %target.display(), duration_secs = duration, "Narration synthesized");
        Ok(AudioArtifact {
            path: target,
            duration,
        })
    }
}

/// Normalise whitespace and drop characters the CLI mis-parses.
fn clean_text(text: &str) -> String {
    text.replace('\\', " ")
        .replace('"', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First `.wav` file found under `dir`.
async fn find_wav(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        let mut subdirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                subdirs.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("wav") {
                debug!(path = %path.display(), "Found synthesized audio");
                return Ok(Some(path));
            }
        }
        pending.extend(subdirs);
    }
    Ok(None)
}
