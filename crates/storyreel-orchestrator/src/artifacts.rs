//! Per-item working directory and text artifacts.

use std::path::{Path, PathBuf};

use storyreel_models::{ArtifactKind, WorkItemId};
use tokio::fs;

/// Lays out `<work_dir>/<item_id>/` for intermediate artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn item_dir(&self, id: &WorkItemId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Create and return the item's directory.
    pub async fn ensure_item_dir(&self, id: &WorkItemId) -> std::io::Result<PathBuf> {
        let dir = self.item_dir(id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Write a text artifact and return its path.
    ///
    /// The file is fully written before the path is handed back, so the
    /// ledger never records a path to a partial file.
    pub async fn write_text(
        &self,
        id: &WorkItemId,
        kind: ArtifactKind,
        text: &str,
    ) -> std::io::Result<PathBuf> {
        let dir = self.ensure_item_dir(id).await?;
        let path = dir.join(text_file_name(kind));
        let tmp = path.with_extension("txt.tmp");
        fs::write(&tmp, text).await?;
        fs::rename(&tmp, &path).await?;
        Ok(path)
    }
}

fn text_file_name(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::TitleText => "title.txt",
        ArtifactKind::StoryText => "story.txt",
        _ => "artifact.txt",
    }
}

/// Strip whitespace and surrounding quotes from a generated title.
pub fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’'))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"The Last Door\"\n"), "The Last Door");
        assert_eq!(clean_title("“Whispers”"), "Whispers");
        assert_eq!(clean_title("Don't Look Back"), "Don't Look Back");
    }

    #[tokio::test]
    async fn test_write_text_layout() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let id = WorkItemId::from_string("abc");

        let path = store
            .write_text(&id, ArtifactKind::StoryText, "Once upon a time.")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("abc").join("story.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Once upon a time.");
        assert!(!path.with_extension("txt.tmp").exists());
    }
}
