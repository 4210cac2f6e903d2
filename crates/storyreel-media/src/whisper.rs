//! Subtitle generation with the Whisper CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::command::{escape_filter_path, FfmpegCommand, ToolRunner};
use crate::error::SubtitleError;
use crate::subtitles::{
    build_cues, render_ass, render_srt, SubtitleMode, SubtitleStyle, TranscriptSegment,
};

pub const SRT_FILE_NAME: &str = "subtitles.srt";
pub const ASS_FILE_NAME: &str = "subtitles.ass";

/// Files produced by a subtitle run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleArtifacts {
    pub srt: PathBuf,
    pub ass: Option<PathBuf>,
    /// Subtitles were burned into the input video in place
    pub burned: bool,
}

/// Subtitle collaborator.
#[async_trait]
pub trait Subtitler: Send + Sync {
    /// Transcribe `media` and write subtitle files into `out_dir`.
    async fn generate(
        &self,
        media: &Path,
        title: &str,
        style: &SubtitleStyle,
        out_dir: &Path,
    ) -> Result<SubtitleArtifacts, SubtitleError>;
}

#[derive(Debug, Deserialize)]
struct WhisperTranscript {
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
}

/// Runs the `whisper` CLI with word timestamps.
#[derive(Debug, Clone)]
pub struct WhisperSubtitler {
    program: String,
    model: String,
    language: String,
    runner: ToolRunner,
}

impl WhisperSubtitler {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            program: "whisper".to_string(),
            model: model.into(),
            language: "en".to_string(),
            runner: ToolRunner::new().with_timeout(Duration::from_secs(30 * 60)),
        }
    }

    pub fn with_runner(mut self, runner: ToolRunner) -> Self {
        self.runner = runner;
        self
    }

    async fn transcribe(&self, media: &Path, scratch: &Path) -> Result<Vec<TranscriptSegment>, SubtitleError> {
        let args: Vec<std::ffi::OsString> = vec![
            media.as_os_str().to_os_string(),
            "--model".into(),
            self.model.clone().into(),
            "--language".into(),
            self.language.clone().into(),
            "--word_timestamps".into(),
            "True".into(),
            "--output_format".into(),
            "json".into(),
            "--fp16".into(),
            "False".into(),
            "--output_dir".into(),
            scratch.as_os_str().to_os_string(),
        ];
        self.runner.run(&self.program, args, None).await?;

        let stem = media
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let json_path = scratch.join(format!("{}.json", stem));
        if !json_path.exists() {
            return Err(SubtitleError::MissingTranscript(json_path));
        }
        let raw = tokio::fs::read(&json_path).await?;
        let transcript: WhisperTranscript = serde_json::from_slice(&raw)
            .map_err(|e| SubtitleError::Media(e.into()))?;
        Ok(transcript.segments)
    }

    async fn burn_in(
        &self,
        video: &Path,
        subtitle: &Path,
        style: &SubtitleStyle,
    ) -> Result<(), SubtitleError> {
        let filter = burn_filter(subtitle, style);
        let tmp = video.with_extension("subtitled.mp4");
        let cmd = FfmpegCommand::new(&tmp)
            .input(video)
            .video_filter(filter)
            .audio_codec("copy");
        self.runner.run_ffmpeg(&cmd).await?;
        tokio::fs::rename(&tmp, video).await?;
        Ok(())
    }
}

/// FFmpeg filter that renders `subtitle` onto the video.
fn burn_filter(subtitle: &Path, style: &SubtitleStyle) -> String {
    let path = escape_filter_path(subtitle);
    let mut filter = match style.mode {
        SubtitleMode::AssBurned => format!("ass='{}'", path),
        _ => format!(
            "subtitles='{}':force_style='FontName={},FontSize={},PrimaryColour=&Hffffff,OutlineColour=&H000000,Outline=2,BorderStyle=3,Shadow=1'",
            path, style.font_name, style.font_size
        ),
    };
    if let Some(dir) = &style.fonts_dir {
        filter.push_str(&format!(":fontsdir='{}'", escape_filter_path(dir)));
    }
    filter
}

#[async_trait]
impl Subtitler for WhisperSubtitler {
    async fn generate(
        &self,
        media: &Path,
        title: &str,
        style: &SubtitleStyle,
        out_dir: &Path,
    ) -> Result<SubtitleArtifacts, SubtitleError> {
        let scratch = out_dir.join(".whisper");
        tokio::fs::create_dir_all(&scratch).await?;
        let segments = self.transcribe(media, &scratch).await?;
        tokio::fs::remove_dir_all(&scratch).await?;

        let cues = build_cues(&segments);
        if cues.is_empty() {
            return Err(SubtitleError::EmptyTranscript);
        }

        let srt = out_dir.join(SRT_FILE_NAME);
        tokio::fs::write(&srt, render_srt(&cues)).await?;

        let ass = if style.mode == SubtitleMode::AssBurned {
            let path = out_dir.join(ASS_FILE_NAME);
            tokio::fs::write(&path, render_ass(&cues, style, Some(title))).await?;
            Some(path)
        } else {
            None
        };

        let burned = if style.mode.burns_in() {
            let source = ass.as_deref().unwrap_or(&srt);
            self.burn_in(media, source, style).await?;
            true
        } else {
            false
        };

        info!(
            cues = cues.len(),
            mode = style.mode.as_str(),
            burned,
            "Subtitles generated"
        );
        Ok(SubtitleArtifacts { srt, ass, burned })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burn_filter_by_mode() {
        let mut style = SubtitleStyle::new(SubtitleMode::SrtBurned);
        let srt = burn_filter(Path::new("/out/subtitles.srt"), &style);
        assert!(srt.starts_with("subtitles='/out/subtitles.srt':force_style='FontName=Arial,FontSize=24"));

        style.mode = SubtitleMode::AssBurned;
        style.fonts_dir = Some(PathBuf::from("/fonts"));
        let ass = burn_filter(Path::new("/out/subtitles.ass"), &style);
        assert_eq!(ass, "ass='/out/subtitles.ass':fontsdir='/fonts'");
    }

    #[test]
    fn test_whisper_json_shape() {
        let raw = r#"{
            "text": " It was late.",
            "segments": [{
                "id": 0, "start": 0.0, "end": 1.2, "text": " It was late.",
                "words": [
                    {"word": " It", "start": 0.0, "end": 0.3, "probability": 0.9},
                    {"word": " was", "start": 0.3, "end": 0.6, "probability": 0.9},
                    {"word": " late.", "start": 0.6, "end": 1.2, "probability": 0.9}
                ]
            }],
            "language": "en"
        }"#;
        let transcript: WhisperTranscript = serde_json::from_str(raw).unwrap();
        let cues = build_cues(&transcript.segments);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "It was");
    }
}
