//! Non-AI collaborators of the StoryReel pipeline.
//!
//! Each collaborator wraps an external command-line tool:
//! - [`F5TtsSynthesizer`]: narration audio via `f5-tts_infer-cli`
//! - [`FfmpegAssembler`]: background footage + narration via FFmpeg
//! - [`WhisperSubtitler`]: word-timed subtitles via the `whisper` CLI
//!
//! The pipeline only depends on the [`SpeechSynthesizer`], [`VideoAssembler`]
//! and [`Subtitler`] traits, so tests substitute in-process fakes.

pub mod assembly;
pub mod clips;
pub mod command;
pub mod error;
pub mod probe;
pub mod speed;
pub mod subtitles;
pub mod tts;
pub mod whisper;

pub use assembly::{BackgroundSelection, FfmpegAssembler, VideoArtifact, VideoAssembler};
pub use clips::{pick_non_repeating, scan_library, ClipLibrary};
pub use command::{check_tool, FfmpegCommand, ToolRunner};
pub use error::{
    AssemblyError, MediaError, MediaResult, SubtitleError, SynthesisError,
};
pub use probe::{probe_duration, MediaInfo};
pub use speed::speed_factor;
pub use subtitles::{Cue, SubtitleMode, SubtitleStyle, TimedWord};
pub use tts::{AudioArtifact, F5TtsSynthesizer, SpeechSynthesizer, VoiceReference};
pub use whisper::{SubtitleArtifacts, Subtitler, WhisperSubtitler};
