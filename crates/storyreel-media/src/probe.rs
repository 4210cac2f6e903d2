//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::command::ToolRunner;
use crate::error::{MediaError, MediaResult};

/// Basic facts about an audio or video file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub has_video: bool,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
}

/// Probe a media file.
pub async fn probe(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let mut args: Vec<std::ffi::OsString> = [
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ]
    .into_iter()
    .map(Into::into)
    .collect();
    args.push(path.as_os_str().to_os_string());

    let stdout = ToolRunner::new().run("ffprobe", args, None).await?;
    parse_probe_output(&stdout)
}

/// Duration of a media file in seconds.
pub async fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    Ok(probe(path).await?.duration)
}

fn parse_probe_output(raw: &str) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_str(raw)?;
    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| MediaError::InvalidMedia("missing or zero duration".to_string()))?;

    Ok(MediaInfo {
        duration,
        has_video: probe.streams.iter().any(|s| s.codec_type == "video"),
        has_audio: probe.streams.iter().any(|s| s.codec_type == "audio"),
    })
}
