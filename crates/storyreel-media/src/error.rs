//! Error types for media collaborators.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for low-level tool invocations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors raised while running external media tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("{tool} failed: {message}")]
    CommandFailed {
        tool: String,
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn command_failed(
        tool: impl Into<String>,
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::CommandFailed {
            tool: tool.into(),
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Failures that may succeed on a second run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MediaError::CommandFailed { .. } | MediaError::Timeout(_) | MediaError::Io(_)
        )
    }
}

/// Text-to-speech collaborator failure.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Reference voice file not found: {0}")]
    MissingReference(PathBuf),

    #[error("Nothing to synthesize: story text is empty")]
    EmptyText,

    #[error("Synthesizer produced no audio in {0}")]
    NoOutput(PathBuf),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl SynthesisError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SynthesisError::NoOutput(_) => true,
            SynthesisError::Media(e) => e.is_transient(),
            SynthesisError::MissingReference(_) | SynthesisError::EmptyText => false,
        }
    }
}

/// Video assembly collaborator failure.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("No background clips found under {0}")]
    NoBackgroundClips(PathBuf),

    #[error("Cannot select {requested} unique clips, only {available} available")]
    NotEnoughClips { requested: usize, available: usize },

    #[error("Background footage too short: {available:.1}s for {required:.1}s of audio")]
    InsufficientFootage { available: f64, required: f64 },

    #[error("Invalid audio duration: {0}")]
    InvalidDuration(f64),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl AssemblyError {
    pub fn is_retryable(&self) -> bool {
        match self {
            // Clip selection is random; another draw may cover the audio.
            AssemblyError::InsufficientFootage { .. } => true,
            AssemblyError::Media(e) => e.is_transient(),
            AssemblyError::NoBackgroundClips(_)
            | AssemblyError::NotEnoughClips { .. }
            | AssemblyError::InvalidDuration(_) => false,
        }
    }
}

/// Subtitle collaborator failure.
#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("Transcription produced no words")]
    EmptyTranscript,

    #[error("Transcript not found at {0}")]
    MissingTranscript(PathBuf),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl SubtitleError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SubtitleError::EmptyTranscript => false,
            SubtitleError::MissingTranscript(_) => true,
            SubtitleError::Media(e) => e.is_transient(),
        }
    }
}

impl From<std::io::Error> for SubtitleError {
    fn from(e: std::io::Error) -> Self {
        Self::Media(MediaError::Io(e))
    }
}

impl From<std::io::Error> for SynthesisError {
    fn from(e: std::io::Error) -> Self {
        Self::Media(MediaError::Io(e))
    }
}

impl From<std::io::Error> for AssemblyError {
    fn from(e: std::io::Error) -> Self {
        Self::Media(MediaError::Io(e))
    }
}
