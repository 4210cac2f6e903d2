//! Video assembly: background footage cut to the narration, then sped up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clips::{pick_non_repeating, scan_library};
use crate::command::{FfmpegCommand, ToolRunner};
use crate::error::AssemblyError;
use crate::probe::probe_duration;
use crate::speed::{atempo_chain, speed_factor};
use crate::tts::AudioArtifact;

pub const VIDEO_FILE_NAME: &str = "gene_video.mp4";

/// One background clip is requested per this many seconds of narration.
const SECONDS_PER_CLIP: f64 = 5.0;

/// Where background footage comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundSelection {
    /// Folder of category folders; clips are drawn with the round-robin picker.
    Library(PathBuf),
    /// Clips to use in this order.
    Clips(Vec<PathBuf>),
}

/// Assembled video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoArtifact {
    pub path: PathBuf,
    pub speed_factor: f64,
    /// Output duration in seconds (after speed-up)
    pub duration: f64,
}

/// Video assembly collaborator.
#[async_trait]
pub trait VideoAssembler: Send + Sync {
    async fn assemble(
        &self,
        audio: &AudioArtifact,
        background: &BackgroundSelection,
        out_dir: &Path,
    ) -> Result<VideoArtifact, AssemblyError>;
}

/// Encoding settings.
#[derive(Debug, Clone)]
pub struct AssemblySettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u8,
    pub preset: String,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 60,
            crf: 23,
            preset: "fast".to_string(),
        }
    }
}

/// Builds the final video with a single FFmpeg invocation.
#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    settings: AssemblySettings,
    runner: ToolRunner,
}

impl Default for FfmpegAssembler {
    fn default() -> Self {
        Self::new(AssemblySettings::default())
    }
}

impl FfmpegAssembler {
    pub fn new(settings: AssemblySettings) -> Self {
        Self {
            settings,
            runner: ToolRunner::new().with_timeout(Duration::from_secs(20 * 60)),
        }
    }

    pub fn with_runner(mut self, runner: ToolRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Candidate clips for `duration` seconds of narration, plus the speed factor.
    fn select(
        &self,
        duration: f64,
        background: &BackgroundSelection,
    ) -> Result<(Vec<PathBuf>, f64), AssemblyError> {
        let mut rng = rand::rng();
        let clips = match background {
            BackgroundSelection::Clips(clips) => clips.clone(),
            BackgroundSelection::Library(root) => {
                let library = scan_library(root)?;
                let count = (duration / SECONDS_PER_CLIP).floor() as usize + 1;
                pick_non_repeating(&library, count, &mut rng)?
            }
        };
        Ok((clips, speed_factor(duration, &mut rng)))
    }
}

/// Build the concat + trim + speed command.
fn build_command(
    clips: &[PathBuf],
    audio: &Path,
    duration: f64,
    factor: f64,
    output: &Path,
    settings: &AssemblySettings,
) -> FfmpegCommand {
    let (w, h, fps) = (settings.width, settings.height, settings.fps);
    let mut filter = String::new();
    for i in 0..clips.len() {
        filter.push_str(&format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps={fps}[v{i}];"
        ));
    }
    for i in 0..clips.len() {
        filter.push_str(&format!("[v{i}]"));
    }
    filter.push_str(&format!(
        "concat=n={}:v=1:a=0[cat];[cat]trim=duration={:.3},setpts=PTS-STARTPTS",
        clips.len(),
        duration
    ));
    let audio_index = clips.len();
    let mut audio_chain = format!(
        "[{}:a]atrim=duration={:.3},asetpts=PTS-STARTPTS",
        audio_index, duration
    );
    if (factor - 1.0).abs() > f64::EPSILON {
        filter.push_str(&format!(",setpts=PTS/{:.6}", factor));
        audio_chain.push(',');
        audio_chain.push_str(&atempo_chain(factor));
    }
    filter.push_str("[vout];");
    filter.push_str(&audio_chain);
    filter.push_str("[aout]");

    let mut cmd = FfmpegCommand::new(output);
    for clip in clips {
        cmd = cmd.input(clip);
    }
    cmd.input(audio)
        .filter_complex(filter)
        .map("[vout]")
        .map("[aout]")
        .video_codec("libx264")
        .preset(settings.preset.clone())
        .crf(settings.crf)
        .frame_rate(fps)
        .audio_codec("aac")
        .output_args(["-movflags", "+faststart"])
}

#[async_trait]
impl VideoAssembler for FfmpegAssembler {
    async fn assemble(
        &self,
        audio: &AudioArtifact,
        background: &BackgroundSelection,
        out_dir: &Path,
    ) -> Result<VideoArtifact, AssemblyError> {
        let duration = audio.duration;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(AssemblyError::InvalidDuration(duration));
        }

        let (candidates, factor) = self.select(duration, background)?;

        // Only as many clips as needed to cover the narration.
        let mut clips = Vec::new();
        let mut covered = 0.0;
        for clip in candidates {
            let length = probe_duration(&clip).await?;
            debug!(clip = %clip.display(), length, "Background clip");
            clips.push(clip);
            covered += length;
            if covered >= duration {
                break;
            }
        }
        if covered < duration {
            return Err(AssemblyError::InsufficientFootage {
                available: covered,
                required: duration,
            });
        }

        tokio::fs::create_dir_all(out_dir).await?;
        let output = out_dir.join(VIDEO_FILE_NAME);
        let cmd = build_command(&clips, &audio.path, duration, factor, &output, &self.settings);
        self.runner.run_ffmpeg(&cmd).await?;

        info!(
            clips = clips.len(),
            speed_factor = factor,
            duration_secs = duration / factor,
            "Video assembled"
        );
        Ok(VideoArtifact {
            path: output,
            speed_factor: factor,
            duration: duration / factor,
        })
    }
}
