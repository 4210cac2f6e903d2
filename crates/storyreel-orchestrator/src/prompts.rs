//! System prompts and request construction for the text phases.

use std::path::Path;

use storyreel_models::{Stage, WorkItem};
use storyreel_providers::GenerationRequest;

use crate::error::{OrchestratorError, OrchestratorResult};

pub const TITLE_USER_PROMPT: &str = "Generate a creative title for a story";
const TITLE_TEMPERATURE: f32 = 0.7;
const STORY_TEMPERATURE: f32 = 0.8;

/// System prompts, read once at start.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub title_system: String,
    pub story_system: String,
}

impl Prompts {
    pub fn new(title_system: impl Into<String>, story_system: impl Into<String>) -> Self {
        Self {
            title_system: title_system.into(),
            story_system: story_system.into(),
        }
    }

    pub async fn load(title_path: &Path, story_path: &Path) -> OrchestratorResult<Self> {
        Ok(Self::new(read(title_path).await?, read(story_path).await?))
    }

    /// Request for a text stage; `None` for non-text stages.
    ///
    /// Story requests use the item's title as the user prompt.
    pub fn request(&self, stage: Stage, index: usize, item: &WorkItem) -> Option<GenerationRequest> {
        let custom_id = format!("{}_{}", stage.as_str(), index);
        match stage {
            Stage::Title => Some(GenerationRequest::new(
                custom_id,
                self.title_system.clone(),
                TITLE_USER_PROMPT,
                TITLE_TEMPERATURE,
            )),
            Stage::Story => Some(GenerationRequest::new(
                custom_id,
                self.story_system.clone(),
                item.title.clone(),
                STORY_TEMPERATURE,
            )),
            _ => None,
        }
    }
}

async fn read(path: &Path) -> OrchestratorResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|source| OrchestratorError::ReadFile {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_per_stage() {
        let prompts = Prompts::new("title system", "story system");
        let mut item = WorkItem::new(0, 3);
        item.title = "The Lighthouse".into();

        let title = prompts.request(Stage::Title, 3, &item).unwrap();
        assert_eq!(title.custom_id, "title_3");
        assert_eq!(title.user_prompt, TITLE_USER_PROMPT);
        assert_eq!(title.temperature, 0.7);

        let story = prompts.request(Stage::Story, 0, &item).unwrap();
        assert_eq!(story.system_prompt, "story system");
        assert_eq!(story.user_prompt, "The Lighthouse");
        assert_eq!(GenerationRequest::slot_index(&story.custom_id), Some(0));

        assert!(prompts.request(Stage::Audio, 0, &item).is_none());
    }

    #[tokio::test]
    async fn test_missing_prompt_file() {
        let err = Prompts::load(Path::new("/nonexistent/a.txt"), Path::new("/nonexistent/b.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ReadFile { .. }));
    }
}
