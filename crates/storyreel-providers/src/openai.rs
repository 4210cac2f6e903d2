//! OpenAI-compatible chat completions client.
//!
//! Serves OpenAI itself, DeepSeek and a local LM Studio server; they differ
//! only in base URL, credentials and model id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapter::SyncProvider;
use crate::error::{ProviderError, ProviderResult};
use crate::types::{GenerationOutput, GenerationRequest};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChatConfig {
    /// Name used in logs and provider refs
    pub name: String,
    /// Base URL including the `/v1` prefix
    pub base_url: String,
    /// Bearer token; local servers may not need one
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiChatConfig {
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "openai".to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: Some(api_key.into()),
            model: model.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn deepseek(api_key: impl Into<String>) -> Self {
        Self {
            name: "deepseek".to_string(),
            base_url: DEEPSEEK_BASE_URL.to_string(),
            api_key: Some(api_key.into()),
            model: "deepseek-chat".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn lmstudio(model: impl Into<String>) -> Self {
        Self {
            name: "lmstudio".to_string(),
            base_url: LMSTUDIO_BASE_URL.to_string(),
            api_key: None,
            model: model.into(),
            // Local models are slow on consumer hardware.
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub(crate) fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Chat completions request body.
#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl<'a> ChatRequest<'a> {
    pub fn from_generation(model: &'a str, request: &'a GenerationRequest) -> Self {
        Self {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: request.temperature,
        }
    }
}

/// Chat completions response body.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    pub fn into_output(self) -> ProviderResult<GenerationOutput> {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::invalid_response("No content in completion"))?;
        Ok(GenerationOutput { text })
    }
}

/// Synchronous chat completions provider.
pub struct OpenAiChatProvider {
    http: Client,
    config: OpenAiChatConfig,
}

impl OpenAiChatProvider {
    pub fn new(config: OpenAiChatConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OpenAiChatConfig {
        &self.config
    }
}

#[async_trait]
impl SyncProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<GenerationOutput> {
        let url = self.config.url("chat/completions");
        debug!(provider = %self.config.name, custom_id = %request.custom_id, "Sending chat completion");

        let body = ChatRequest::from_generation(&self.config.model, request);
        let response = self
            .config
            .authorize(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.config.timeout.as_secs())
                } else {
                    ProviderError::Network(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::invalid_response(format!("Malformed completion: {}", e)))?;
        parsed.into_output()
    }
}
