//! Pipeline configuration.
//!
//! Built once at start from the environment (after `.env` is loaded) and CLI
//! overrides, then shared read-only by every component.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use storyreel_media::{BackgroundSelection, SubtitleMode, SubtitleStyle, VoiceReference};
use storyreel_providers::{
    FallbackProvider, OpenAiBatchProvider, OpenAiChatConfig, OpenAiChatProvider, ProviderAdapter,
    SyncProvider,
};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::retry::RetryPolicy;

/// How items are driven through the phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    /// Every eligible item moves through one phase before the wave advances.
    Bulk,
    /// One item runs to completion before the next starts.
    Legacy,
}

impl DriveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveMode::Bulk => "bulk",
            DriveMode::Legacy => "legacy",
        }
    }
}

impl FromStr for DriveMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bulk" => Ok(Self::Bulk),
            "legacy" | "single" => Ok(Self::Legacy),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Text provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    OpenAiBatch,
    DeepSeek,
    LmStudio,
    /// OpenAI, then DeepSeek, then LM Studio, skipping unconfigured ones
    Fallback,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenAiBatch => "openai-batch",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::LmStudio => "lmstudio",
            ProviderKind::Fallback => "fallback",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "openai-batch" | "openai_batch" | "batch" => Ok(Self::OpenAiBatch),
            "deepseek" => Ok(Self::DeepSeek),
            "lmstudio" | "lm-studio" => Ok(Self::LmStudio),
            "fallback" => Ok(Self::Fallback),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials and endpoints for the text providers.
#[derive(Clone, Default)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub deepseek_base_url: Option<String>,
    pub lmstudio_model: Option<String>,
    pub lmstudio_base_url: Option<String>,
}

// Keys stay out of logs.
impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("openai_model", &self.openai_model)
            .field("openai_base_url", &self.openai_base_url)
            .field("deepseek_api_key", &self.deepseek_api_key.as_ref().map(|_| "***"))
            .field("deepseek_base_url", &self.deepseek_base_url)
            .field("lmstudio_model", &self.lmstudio_model)
            .field("lmstudio_base_url", &self.lmstudio_base_url)
            .finish()
    }
}

impl ProviderSettings {
    fn openai(&self) -> Option<OpenAiChatConfig> {
        let key = self.openai_api_key.as_ref()?;
        let config = OpenAiChatConfig::openai(key.clone(), self.openai_model.clone());
        Some(match &self.openai_base_url {
            Some(url) => config.with_base_url(url.clone()),
            None => config,
        })
    }

    fn deepseek(&self) -> Option<OpenAiChatConfig> {
        let key = self.deepseek_api_key.as_ref()?;
        let config = OpenAiChatConfig::deepseek(key.clone());
        Some(match &self.deepseek_base_url {
            Some(url) => config.with_base_url(url.clone()),
            None => config,
        })
    }

    fn lmstudio(&self) -> Option<OpenAiChatConfig> {
        let model = self.lmstudio_model.as_ref()?;
        let config = OpenAiChatConfig::lmstudio(model.clone());
        Some(match &self.lmstudio_base_url {
            Some(url) => config.with_base_url(url.clone()),
            None => config,
        })
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Explicit drive mode; `None` picks bulk for more than one story
    pub mode: Option<DriveMode>,
    pub provider: ProviderKind,
    /// Number of stories to create in a fresh run
    pub story_count: u32,
    /// Titles supplied up front; these items skip the title phase
    pub custom_titles: Vec<String>,
    /// Subtitle delivery; `None` skips the subtitle phase
    pub transcription: Option<SubtitleMode>,
    pub include_title_in_ass: bool,
    /// Retry budget given to items when they are created. Items already in
    /// the ledger keep the budget they were created with.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub poll_interval: Duration,
    /// Age ceiling for an outstanding batch
    pub batch_timeout: Duration,
    pub max_batch_size: usize,
    /// Simultaneous provider calls or media jobs in bulk mode
    pub max_concurrency: usize,
    /// Per-item scratch space for intermediate artifacts
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub archive_dir: PathBuf,
    pub videos_path: PathBuf,
    pub title_prompt_path: PathBuf,
    pub story_prompt_path: PathBuf,
    pub ref_audio_path: PathBuf,
    pub ref_text_path: PathBuf,
    pub fonts_dir: Option<PathBuf>,
    pub whisper_model: String,
    pub providers: ProviderSettings,
    /// Environment values that failed to parse, keyed by variable name
    pub rejected_settings: Vec<(&'static str, String)>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let work_dir = PathBuf::from(".storyreel");
        Self {
            mode: None,
            provider: ProviderKind::OpenAi,
            story_count: 1,
            custom_titles: Vec::new(),
            transcription: None,
            include_title_in_ass: false,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(300),
            poll_interval: Duration::from_secs(60),
            batch_timeout: Duration::from_secs(24 * 3600),
            max_batch_size: 500,
            max_concurrency: 4,
            ledger_path: work_dir.join("ledger.json"),
            archive_dir: work_dir.join("archive"),
            work_dir,
            output_dir: PathBuf::from("output"),
            videos_path: PathBuf::from("Videos"),
            title_prompt_path: PathBuf::from("System_Title_Prompt.txt"),
            story_prompt_path: PathBuf::from("Story_System_Prompt.txt"),
            ref_audio_path: PathBuf::from("ref_audio.mp3"),
            ref_text_path: PathBuf::from("ref_txt.txt"),
            fonts_dir: None,
            whisper_model: "tiny".to_string(),
            providers: ProviderSettings {
                openai_model: "gpt-4o-mini".to_string(),
                ..Default::default()
            },
            rejected_settings: Vec::new(),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Parse `key`, remembering values that do not parse.
fn env_checked<T>(key: &'static str, rejected: &mut Vec<(&'static str, String)>) -> Option<T>
where
    T: FromStr<Err = String>,
{
    let raw = env_opt(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            rejected.push((key, e));
            None
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env_opt(key)
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_bool(key: &str) -> bool {
    env_opt(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let work_dir = env_opt("WORK_DIR").map(PathBuf::from).unwrap_or(defaults.work_dir);

        let mut rejected = Vec::new();
        let mode = env_checked("PIPELINE_MODE", &mut rejected);
        let provider = env_checked("TEXT_PROVIDER", &mut rejected).unwrap_or(defaults.provider);
        let transcription = match env_opt("TRANSCRIPTION").map(|s| parse_transcription(&s)) {
            Some(Ok(selected)) => selected,
            Some(Err(e)) => {
                rejected.push(("TRANSCRIPTION", e));
                None
            }
            None => None,
        };

        Self {
            mode,
            provider,
            story_count: env_parse("STORY_COUNT", defaults.story_count),
            custom_titles: env_opt("STORY_TITLES")
                .map(|s| {
                    s.split(';')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            transcription,
            include_title_in_ass: env_bool("INCLUDE_TITLE_IN_ASS"),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            retry_base_delay: env_secs("RETRY_BASE_DELAY_SECS", defaults.retry_base_delay),
            retry_max_delay: env_secs("RETRY_MAX_DELAY_SECS", defaults.retry_max_delay),
            poll_interval: env_secs("BATCH_POLL_INTERVAL_SECS", defaults.poll_interval),
            batch_timeout: env_secs("BATCH_TIMEOUT_SECS", defaults.batch_timeout),
            max_batch_size: env_parse("MAX_BATCH_SIZE", defaults.max_batch_size),
            max_concurrency: env_parse("MAX_CONCURRENCY", defaults.max_concurrency),
            ledger_path: env_opt("LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| work_dir.join("ledger.json")),
            archive_dir: env_opt("ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| work_dir.join("archive")),
            work_dir,
            output_dir: env_opt("OUTPUT_PATH").map(PathBuf::from).unwrap_or(defaults.output_dir),
            videos_path: env_opt("VIDEOS_PATH").map(PathBuf::from).unwrap_or(defaults.videos_path),
            title_prompt_path: env_opt("TITLE_PROMPT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.title_prompt_path),
            story_prompt_path: env_opt("STORY_PROMPT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.story_prompt_path),
            ref_audio_path: env_opt("REF_AUDIO_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ref_audio_path),
            ref_text_path: env_opt("REF_TEXT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ref_text_path),
            fonts_dir: env_opt("FONTS_DIR").map(PathBuf::from),
            whisper_model: env_opt("WHISPER_MODEL").unwrap_or(defaults.whisper_model),
            providers: ProviderSettings {
                openai_api_key: env_opt("OPENAI_API_KEY"),
                openai_model: env_opt("OPENAI_MODEL_ID").unwrap_or(defaults.providers.openai_model),
                openai_base_url: env_opt("OPENAI_BASE_URL"),
                deepseek_api_key: env_opt("DEEPSEEK_API_KEY"),
                deepseek_base_url: env_opt("DEEPSEEK_BASE_URL"),
                lmstudio_model: env_opt("LMSTUDIO_MODEL"),
                lmstudio_base_url: env_opt("LMSTUDIO_BASE_URL"),
            },
            rejected_settings: rejected,
        }
    }

    /// Forget a parse failure for `key` once a command-line flag replaced it.
    pub fn clear_rejected(&mut self, key: &str) {
        self.rejected_settings.retain(|(k, _)| *k != key);
    }

    /// Drive mode in effect for this run.
    pub fn drive_mode(&self) -> DriveMode {
        self.mode.unwrap_or(if self.total_stories() > 1 {
            DriveMode::Bulk
        } else {
            DriveMode::Legacy
        })
    }

    /// Items a fresh run creates.
    pub fn total_stories(&self) -> u32 {
        self.story_count.max(self.custom_titles.len() as u32)
    }

    /// Check every required setting, reporting all problems at once.
    pub fn validate(&self) -> OrchestratorResult<()> {
        let mut problems: Vec<String> = self
            .rejected_settings
            .iter()
            .map(|(key, e)| format!("{} is invalid: {}", key, e))
            .collect();
        let p = &self.providers;

        match self.provider {
            ProviderKind::OpenAi | ProviderKind::OpenAiBatch if p.openai_api_key.is_none() => {
                problems.push("OPENAI_API_KEY is not set".to_string());
            }
            ProviderKind::DeepSeek if p.deepseek_api_key.is_none() => {
                problems.push("DEEPSEEK_API_KEY is not set".to_string());
            }
            ProviderKind::LmStudio if p.lmstudio_model.is_none() => {
                problems.push("LMSTUDIO_MODEL is not set".to_string());
            }
            ProviderKind::Fallback
                if p.openai_api_key.is_none()
                    && p.deepseek_api_key.is_none()
                    && p.lmstudio_model.is_none() =>
            {
                problems.push(
                    "fallback provider needs OPENAI_API_KEY, DEEPSEEK_API_KEY or LMSTUDIO_MODEL"
                        .to_string(),
                );
            }
            _ => {}
        }

        for (label, path) in [
            ("title prompt", &self.title_prompt_path),
            ("story prompt", &self.story_prompt_path),
        ] {
            if !path.is_file() {
                problems.push(format!("{} file not found: {}", label, path.display()));
            }
        }
        if self.output_dir.as_os_str().is_empty() {
            problems.push("OUTPUT_PATH is empty".to_string());
        }
        if self.total_stories() == 0 {
            problems.push("STORY_COUNT must be at least 1".to_string());
        }
        if self.max_batch_size == 0 {
            problems.push("MAX_BATCH_SIZE must be at least 1".to_string());
        }
        if self.max_concurrency == 0 {
            problems.push("MAX_CONCURRENCY must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidConfig(problems))
        }
    }

    /// Build the configured text provider.
    pub fn provider_adapter(&self) -> OrchestratorResult<ProviderAdapter> {
        let p = &self.providers;
        let missing = |key: &str| OrchestratorError::config(format!("{} is not set", key));

        let adapter = match self.provider {
            ProviderKind::OpenAi => {
                let config = p.openai().ok_or_else(|| missing("OPENAI_API_KEY"))?;
                ProviderAdapter::Sync(Arc::new(OpenAiChatProvider::new(config)?))
            }
            ProviderKind::OpenAiBatch => {
                let config = p.openai().ok_or_else(|| missing("OPENAI_API_KEY"))?;
                ProviderAdapter::Batch(Arc::new(OpenAiBatchProvider::new(config)?))
            }
            ProviderKind::DeepSeek => {
                let config = p.deepseek().ok_or_else(|| missing("DEEPSEEK_API_KEY"))?;
                ProviderAdapter::Sync(Arc::new(OpenAiChatProvider::new(config)?))
            }
            ProviderKind::LmStudio => {
                let config = p.lmstudio().ok_or_else(|| missing("LMSTUDIO_MODEL"))?;
                ProviderAdapter::Sync(Arc::new(OpenAiChatProvider::new(config)?))
            }
            ProviderKind::Fallback => {
                let mut chain: Vec<Arc<dyn SyncProvider>> = Vec::new();
                for config in [p.openai(), p.deepseek(), p.lmstudio()].into_iter().flatten() {
                    chain.push(Arc::new(OpenAiChatProvider::new(config)?));
                }
                ProviderAdapter::Sync(Arc::new(FallbackProvider::new(chain)?))
            }
        };
        Ok(adapter)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay)
    }

    pub fn voice_reference(&self) -> VoiceReference {
        VoiceReference {
            audio: self.ref_audio_path.clone(),
            transcript: self.ref_text_path.clone(),
        }
    }

    pub fn background(&self) -> BackgroundSelection {
        BackgroundSelection::Library(self.videos_path.clone())
    }

    /// Subtitle style, or `None` when transcription is disabled.
    pub fn subtitle_style(&self) -> Option<SubtitleStyle> {
        self.transcription.map(|mode| {
            let mut style = SubtitleStyle::new(mode);
            style.include_title = self.include_title_in_ass;
            style.fonts_dir = self.fonts_dir.clone();
            style
        })
    }
}

/// Parse a transcription option; `none`/`off` disables subtitles.
pub fn parse_transcription(s: &str) -> Result<Option<SubtitleMode>, String> {
    match s.to_ascii_lowercase().as_str() {
        "none" | "off" | "false" | "no" => Ok(None),
        other => other.parse().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_drive_mode_defaults_by_story_count() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.drive_mode(), DriveMode::Legacy);

        config.story_count = 3;
        assert_eq!(config.drive_mode(), DriveMode::Bulk);

        config.mode = Some(DriveMode::Legacy);
        assert_eq!(config.drive_mode(), DriveMode::Legacy);
    }

    #[test]
    fn test_custom_titles_raise_story_count() {
        let config = PipelineConfig {
            story_count: 1,
            custom_titles: vec!["A".into(), "B".into()],
            ..Default::default()
        };
        assert_eq!(config.total_stories(), 2);
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let config = PipelineConfig {
            provider: ProviderKind::OpenAiBatch,
            title_prompt_path: PathBuf::from("/nonexistent/title.txt"),
            story_prompt_path: PathBuf::from("/nonexistent/story.txt"),
            max_batch_size: 0,
            ..Default::default()
        };
        match config.validate() {
            Err(OrchestratorError::InvalidConfig(problems)) => {
                assert_eq!(problems.len(), 4);
                assert!(problems[0].contains("OPENAI_API_KEY"));
            }
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let dir = TempDir::new().unwrap();
        let title = dir.path().join("title.txt");
        let story = dir.path().join("story.txt");
        std::fs::write(&title, "You write titles.").unwrap();
        std::fs::write(&story, "You write stories.").unwrap();

        let mut config = PipelineConfig {
            provider: ProviderKind::Fallback,
            title_prompt_path: title,
            story_prompt_path: story,
            ..Default::default()
        };
        config.providers.deepseek_api_key = Some("sk-test".into());
        assert!(config.validate().is_ok());

        let adapter = config.provider_adapter().unwrap();
        assert!(!adapter.is_batch());
        assert_eq!(adapter.name(), "deepseek");
    }

    #[test]
    fn test_parse_options() {
        assert_eq!("batch".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAiBatch);
        assert_eq!(parse_transcription("off").unwrap(), None);
        assert_eq!(
            parse_transcription("srt-burned").unwrap(),
            Some(SubtitleMode::SrtBurned)
        );
        assert!(parse_transcription("vtt").is_err());
    }

    #[test]
    fn test_rejected_settings_are_reported() {
        let dir = TempDir::new().unwrap();
        let title = dir.path().join("title.txt");
        let story = dir.path().join("story.txt");
        std::fs::write(&title, "You write titles.").unwrap();
        std::fs::write(&story, "You write stories.").unwrap();

        let mut config = PipelineConfig {
            title_prompt_path: title,
            story_prompt_path: story,
            rejected_settings: vec![("TRANSCRIPTION", "unknown subtitle mode: vtt".into())],
            ..Default::default()
        };
        config.providers.openai_api_key = Some("sk-test".into());

        match config.validate() {
            Err(OrchestratorError::InvalidConfig(problems)) => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].starts_with("TRANSCRIPTION is invalid"));
            }
            other => panic!("expected invalid config, got {:?}", other),
        }

        config.clear_rejected("TRANSCRIPTION");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_api_keys_not_logged() {
        let mut config = PipelineConfig::default();
        config.providers.openai_api_key = Some("sk-secret".into());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
    }
}
