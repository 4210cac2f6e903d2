//! Final per-story output layout.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use storyreel_models::{ArtifactKind, WorkItem, WorkItemId};
use tokio::fs;
use tracing::info;

use crate::error::MaterializeError;

pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Writes the output directory for a finished item.
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Returns the output directory.
    async fn finalize(&self, item: &WorkItem) -> Result<PathBuf, MaterializeError>;
}

#[derive(Debug, Serialize)]
struct OutputMetadata<'a> {
    id: &'a WorkItemId,
    title: &'a str,
    retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_duration: Option<f64>,
    created_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

/// Copies artifacts into `<output_dir>/<sanitised title>/`.
#[derive(Debug, Clone)]
pub struct LocalMaterializer {
    output_dir: PathBuf,
}

impl LocalMaterializer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// First free directory name for `title`: `name`, `name_2`, `name_3`...
    async fn claim_dir(&self, title: &str) -> std::io::Result<PathBuf> {
        let base = sanitize_folder_name(title);
        let mut candidate = self.output_dir.join(&base);
        let mut n = 2;
        while fs::try_exists(&candidate).await? {
            candidate = self.output_dir.join(format!("{}_{}", base, n));
            n += 1;
        }
        fs::create_dir_all(&candidate).await?;
        Ok(candidate)
    }
}

/// Folder-safe version of a title.
pub fn sanitize_folder_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches('_')
        .to_string();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}

async fn copy_into(src: &Path, dir: &Path, name: &str) -> std::io::Result<()> {
    fs::copy(src, dir.join(name)).await.map(|_| ())
}

#[async_trait]
impl Materializer for LocalMaterializer {
    async fn finalize(&self, item: &WorkItem) -> Result<PathBuf, MaterializeError> {
        let required = |kind| {
            item.artifact(kind).ok_or_else(|| MaterializeError::MissingArtifact {
                item: item.id.clone(),
                kind,
            })
        };
        let title = required(ArtifactKind::TitleText)?;
        let story = required(ArtifactKind::StoryText)?;
        let audio = required(ArtifactKind::Audio)?;
        let video = required(ArtifactKind::Video)?;

        let dir = self.claim_dir(&item.title).await?;
        copy_into(title, &dir, "title.txt").await?;
        copy_into(story, &dir, "story.txt").await?;
        copy_into(audio, &dir, file_name_or(audio, "gene_audio.wav")).await?;
        copy_into(video, &dir, file_name_or(video, "gene_video.mp4")).await?;
        if let Some(srt) = item.artifact(ArtifactKind::Subtitle) {
            copy_into(srt, &dir, "subtitles.srt").await?;
        }
        if let Some(ass) = item.artifact(ArtifactKind::SubtitleAss) {
            copy_into(ass, &dir, "subtitles.ass").await?;
        }

        let metadata = OutputMetadata {
            id: &item.id,
            title: &item.title,
            retry_count: item.retry_count,
            speed_factor: item.speed_factor,
            audio_duration: item.audio_duration,
            created_at: item.created_at,
            finished_at: Utc::now(),
        };
        fs::write(
            dir.join(METADATA_FILE_NAME),
            serde_json::to_vec_pretty(&metadata)?,
        )
        .await?;

        info!(item_id = %item.id, output = %dir.display(), "Output materialized");
        Ok(dir)
    }
}

fn file_name_or<'a>(path: &'a Path, default: &'a str) -> &'a str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn finished_item(work: &Path, title: &str) -> WorkItem {
        let mut item = WorkItem::new(0, 3);
        item.title = title.to_string();
        for (kind, name) in [
            (ArtifactKind::TitleText, "title.txt"),
            (ArtifactKind::StoryText, "story.txt"),
            (ArtifactKind::Audio, "gene_audio.wav"),
            (ArtifactKind::Video, "gene_video.mp4"),
            (ArtifactKind::Subtitle, "subtitles.srt"),
        ] {
            let path = work.join(name);
            std::fs::write(&path, name).unwrap();
            item.artifacts.insert(kind, path);
        }
        item.speed_factor = Some(1.25);
        item
    }

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("The Door: Part 2?"), "The Door_ Part 2");
        assert_eq!(sanitize_folder_name("  "), "untitled");
        assert_eq!(sanitize_folder_name("a/b\\c"), "a_b_c");
    }

    #[tokio::test]
    async fn test_finalize_layout_and_collisions() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let materializer = LocalMaterializer::new(out.path());
        let item = finished_item(work.path(), "Night Shift");

        let first = materializer.finalize(&item).await.unwrap();
        let second = materializer.finalize(&item).await.unwrap();

        assert_eq!(first, out.path().join("Night Shift"));
        assert_eq!(second, out.path().join("Night Shift_2"));
        for name in ["title.txt", "story.txt", "gene_audio.wav", "gene_video.mp4", "subtitles.srt"] {
            assert!(first.join(name).exists(), "{} missing", name);
        }
        assert!(!first.join("subtitles.ass").exists());

        let meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(first.join(METADATA_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(meta["title"], "Night Shift");
        assert_eq!(meta["speed_factor"], 1.25);
    }

    #[tokio::test]
    async fn test_missing_video_rejected() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let mut item = finished_item(work.path(), "Lost");
        item.artifacts.remove(&ArtifactKind::Video);

        let err = LocalMaterializer::new(out.path()).finalize(&item).await.unwrap_err();
        assert!(matches!(
            err,
            MaterializeError::MissingArtifact {
                kind: ArtifactKind::Video,
                ..
            }
        ));
    }
}
