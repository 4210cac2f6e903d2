//! Subtitle cue building and SRT/ASS rendering.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Words at most this long are merged with the following word.
const SHORT_WORD_MAX_CHARS: usize = 3;
/// How long the title is shown at the start of an ASS track.
pub const TITLE_CUE_SECS: f64 = 3.0;

/// How subtitles are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubtitleMode {
    /// Sidecar `.srt` only
    Srt,
    /// `.srt` burned into the video
    SrtBurned,
    /// Styled `.ass` burned into the video (the `.srt` is still written)
    AssBurned,
}

impl SubtitleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtitleMode::Srt => "srt",
            SubtitleMode::SrtBurned => "srt-burned",
            SubtitleMode::AssBurned => "ass-burned",
        }
    }

    pub fn burns_in(&self) -> bool {
        !matches!(self, SubtitleMode::Srt)
    }
}

impl std::str::FromStr for SubtitleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "srt" => Ok(Self::Srt),
            "srt-burned" | "srt_burned" => Ok(Self::SrtBurned),
            "ass" | "ass-burned" | "ass_burned" => Ok(Self::AssBurned),
            other => Err(format!("unknown subtitle mode: {}", other)),
        }
    }
}

/// Rendering options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleStyle {
    pub mode: SubtitleMode,
    /// Show the story title as the first ASS cue
    pub include_title: bool,
    pub font_name: String,
    pub font_size: u32,
    /// Extra fonts made available to the burn-in filter
    pub fonts_dir: Option<PathBuf>,
}

impl SubtitleStyle {
    pub fn new(mode: SubtitleMode) -> Self {
        Self {
            mode,
            include_title: false,
            font_name: "Arial".to_string(),
            font_size: 24,
            fonts_dir: None,
        }
    }
}

/// One word with its timing, as reported by Whisper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// One transcript segment, as reported by Whisper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub words: Vec<TimedWord>,
}

/// A timed subtitle line.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Build word-level cues, merging short words with their successor.
///
/// Segments without word timings fall back to one cue per segment.
pub fn build_cues(segments: &[TranscriptSegment]) -> Vec<Cue> {
    let mut cues = Vec::new();
    for segment in segments {
        if segment.words.is_empty() {
            let text = segment.text.trim();
            if !text.is_empty() {
                cues.push(Cue {
                    start: segment.start,
                    end: segment.end,
                    text: text.to_string(),
                });
            }
            continue;
        }

        let words = &segment.words;
        let mut i = 0;
        while i < words.len() {
            let mut text = words[i].word.trim().to_string();
            let start = words[i].start;
            let mut end = words[i].end;
            if text.chars().count() <= SHORT_WORD_MAX_CHARS && i + 1 < words.len() {
                text.push(' ');
                text.push_str(words[i + 1].word.trim());
                end = words[i + 1].end;
                i += 2;
            } else {
                i += 1;
            }
            if !text.is_empty() {
                cues.push(Cue { start, end, text });
            }
        }
    }
    cues
}

/// `HH:MM:SS,mmm`
pub fn srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let (h, rem) = (total_ms / 3_600_000, total_ms % 3_600_000);
    let (m, rem) = (rem / 60_000, rem % 60_000);
    let (s, ms) = (rem / 1000, rem % 1000);
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// `H:MM:SS.cc`
pub fn ass_timestamp(seconds: f64) -> String {
    let total_cs = (seconds.max(0.0) * 100.0).round() as u64;
    let (h, rem) = (total_cs / 360_000, total_cs % 360_000);
    let (m, rem) = (rem / 6_000, rem % 6_000);
    let (s, cs) = (rem / 100, rem % 100);
    format!("{}:{:02}:{:02}.{:02}", h, m, s, cs)
}

pub fn render_srt(cues: &[Cue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            srt_timestamp(cue.start),
            srt_timestamp(cue.end),
            cue.text
        );
    }
    out
}

/// Render an ASS script for a 1080x1920 portrait video.
pub fn render_ass(cues: &[Cue], style: &SubtitleStyle, title: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("[Script Info]\nScriptType: v4.00+\nPlayResX: 1080\nPlayResY: 1920\nWrapStyle: 0\nScaledBorderAndShadow: yes\n\n");
    out.push_str("[V4+ Styles]\nFormat: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n");
    let word_size = style.font_size * 4;
    let _ = writeln!(
        out,
        "Style: Word,{},{},&H00FFFFFF,&H000000FF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,6,2,5,40,40,0,1",
        style.font_name, word_size
    );
    let _ = writeln!(
        out,
        "Style: Title,{},{},&H0000FFFF,&H000000FF,&H00000000,&H80000000,-1,0,0,0,100,100,0,0,1,5,2,8,60,60,200,1",
        style.font_name,
        word_size * 3 / 4
    );
    out.push_str("\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");

    if let Some(title) = title.filter(|t| style.include_title && !t.trim().is_empty()) {
        let end = cues
            .last()
            .map(|c| c.end.min(TITLE_CUE_SECS))
            .unwrap_or(TITLE_CUE_SECS);
        let _ = writeln!(
            out,
            "Dialogue: 1,{},{},Title,,0,0,0,,{}",
            ass_timestamp(0.0),
            ass_timestamp(end),
            escape_ass(title.trim())
        );
    }
    for cue in cues {
        let _ = writeln!(
            out,
            "Dialogue: 0,{},{},Word,,0,0,0,,{}",
            ass_timestamp(cue.start),
            ass_timestamp(cue.end),
            escape_ass(&cue.text.to_uppercase())
        );
    }
    out
}

fn escape_ass(text: &str) -> String {
    text.replace('\n', "\\N").replace('{', "(").replace('}', ")")
}
