//! The fixed phase sequence every work item moves through.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a work item.
///
/// Phases are strictly ordered. An item only ever moves forward through this
/// sequence; failures are tracked through [`crate::ItemStatus::Failed`] while
/// the phase keeps pointing at the `*Pending` phase that failed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    TitlePending,
    TitleReady,
    StoryPending,
    StoryReady,
    AudioPending,
    AudioReady,
    VideoPending,
    VideoReady,
    SubtitlePending,
    Done,
}

impl Phase {
    /// All phases in order.
    pub const ALL: [Phase; 10] = [
        Phase::TitlePending,
        Phase::TitleReady,
        Phase::StoryPending,
        Phase::StoryReady,
        Phase::AudioPending,
        Phase::AudioReady,
        Phase::VideoPending,
        Phase::VideoReady,
        Phase::SubtitlePending,
        Phase::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::TitlePending => "title_pending",
            Phase::TitleReady => "title_ready",
            Phase::StoryPending => "story_pending",
            Phase::StoryReady => "story_ready",
            Phase::AudioPending => "audio_pending",
            Phase::AudioReady => "audio_ready",
            Phase::VideoPending => "video_pending",
            Phase::VideoReady => "video_ready",
            Phase::SubtitlePending => "subtitle_pending",
            Phase::Done => "done",
        }
    }

    /// Position in the phase sequence.
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    /// Whether work must be submitted to leave this phase.
    pub fn is_pending(&self) -> bool {
        self.stage().is_some()
    }

    /// Whether this is the terminal success phase.
    pub fn is_done(&self) -> bool {
        matches!(self, Phase::Done)
    }

    /// The stage executed while the item sits in this phase, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Phase::TitlePending => Some(Stage::Title),
            Phase::StoryPending => Some(Stage::Story),
            Phase::AudioPending => Some(Stage::Audio),
            Phase::VideoPending => Some(Stage::Video),
            Phase::SubtitlePending => Some(Stage::Subtitle),
            _ => None,
        }
    }

    /// Phase reached when the stage of this `*Pending` phase succeeds.
    pub fn ready_phase(&self) -> Option<Phase> {
        match self {
            Phase::TitlePending => Some(Phase::TitleReady),
            Phase::StoryPending => Some(Phase::StoryReady),
            Phase::AudioPending => Some(Phase::AudioReady),
            Phase::VideoPending => Some(Phase::VideoReady),
            Phase::SubtitlePending => Some(Phase::Done),
            _ => None,
        }
    }

    /// The following `*Pending` phase for a `*Ready` phase.
    ///
    /// `VideoReady` leads to `SubtitlePending`; callers that skip subtitles
    /// advance straight to `Done` instead.
    pub fn next_pending(&self) -> Option<Phase> {
        match self {
            Phase::TitleReady => Some(Phase::StoryPending),
            Phase::StoryReady => Some(Phase::AudioPending),
            Phase::AudioReady => Some(Phase::VideoPending),
            Phase::VideoReady => Some(Phase::SubtitlePending),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unit of work performed while an item sits in a `*Pending` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Title,
    Story,
    Audio,
    Video,
    Subtitle,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Title => "title",
            Stage::Story => "story",
            Stage::Audio => "audio",
            Stage::Video => "video",
            Stage::Subtitle => "subtitle",
        }
    }

    pub fn pending_phase(&self) -> Phase {
        match self {
            Stage::Title => Phase::TitlePending,
            Stage::Story => Phase::StoryPending,
            Stage::Audio => Phase::AudioPending,
            Stage::Video => Phase::VideoPending,
            Stage::Subtitle => Phase::SubtitlePending,
        }
    }

    /// Stages served by an AI text provider.
    pub fn is_text(&self) -> bool {
        matches!(self, Stage::Title | Stage::Story)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_is_strict() {
        for pair in Phase::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].ordinal() + 1, pair[1].ordinal());
        }
    }

    #[test]
    fn test_pending_phases_map_to_next_ready() {
        assert_eq!(Phase::TitlePending.ready_phase(), Some(Phase::TitleReady));
        assert_eq!(Phase::SubtitlePending.ready_phase(), Some(Phase::Done));
        assert_eq!(Phase::TitleReady.ready_phase(), None);
        assert_eq!(Phase::VideoReady.next_pending(), Some(Phase::SubtitlePending));
        assert_eq!(Phase::Done.next_pending(), None);
    }

    #[test]
    fn test_stage_round_trip() {
        for phase in Phase::ALL {
            if let Some(stage) = phase.stage() {
                assert_eq!(stage.pending_phase(), phase);
            }
        }
        assert!(Stage::Title.is_text());
        assert!(!Stage::Audio.is_text());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&Phase::SubtitlePending).unwrap();
        assert_eq!(json, "\"subtitle_pending\"");
    }
}
