//! OpenAI Batch API adapter.
//!
//! Requests are uploaded as one JSONL file, processed within a 24h window and
//! downloaded as JSONL output (plus an optional error file). Lines are
//! matched back to slot indices through their `custom_id`.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use storyreel_models::BatchId;
use tracing::{debug, info, warn};

use crate::adapter::BatchProvider;
use crate::error::{ProviderError, ProviderResult};
use crate::openai::{ChatRequest, ChatResponse, OpenAiChatConfig};
use crate::types::{BatchResults, BatchStatus, GenerationRequest, SlotError};

const CHAT_ENDPOINT: &str = "/v1/chat/completions";
const COMPLETION_WINDOW: &str = "24h";

#[derive(Debug, Serialize)]
struct BatchLine<'a> {
    custom_id: &'a str,
    method: &'static str,
    url: &'static str,
    body: ChatRequest<'a>,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateBatch<'a> {
    input_file_id: &'a str,
    endpoint: &'static str,
    completion_window: &'static str,
}

#[derive(Debug, Deserialize)]
struct BatchObject {
    id: String,
    status: String,
    #[serde(default)]
    output_file_id: Option<String>,
    #[serde(default)]
    error_file_id: Option<String>,
    #[serde(default)]
    request_counts: Option<RequestCounts>,
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct RequestCounts {
    total: u64,
    completed: u64,
    failed: u64,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    data: Vec<LineError>,
}

#[derive(Debug, Deserialize)]
struct OutputLine {
    custom_id: String,
    #[serde(default)]
    response: Option<OutputResponse>,
    #[serde(default)]
    error: Option<LineError>,
}

#[derive(Debug, Deserialize)]
struct OutputResponse {
    status_code: u16,
    #[serde(default)]
    body: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct LineError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl LineError {
    fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(c), Some(m)) => format!("{}: {}", c, m),
            (None, Some(m)) => m.clone(),
            (Some(c), None) => c.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

/// Batch provider backed by the OpenAI Batch API.
pub struct OpenAiBatchProvider {
    http: Client,
    config: OpenAiChatConfig,
    name: String,
}

impl OpenAiBatchProvider {
    pub fn new(config: OpenAiChatConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;
        let name = format!("{}-batch", config.name);
        Ok(Self { http, config, name })
    }

    async fn check(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        Err(ProviderError::from_http_status(status, &text))
    }

    async fn retrieve(&self, batch_id: &BatchId) -> ProviderResult<BatchObject> {
        let url = self.config.url(&format!("batches/{}", batch_id));
        let response = self.config.authorize(self.http.get(&url)).send().await?;
        let batch = Self::check(response).await?.json().await?;
        Ok(batch)
    }

    async fn download(&self, file_id: &str) -> ProviderResult<String> {
        let url = self.config.url(&format!("files/{}/content", file_id));
        let response = self.config.authorize(self.http.get(&url)).send().await?;
        Ok(Self::check(response).await?.text().await?)
    }

    fn encode_jsonl(&self, requests: &[GenerationRequest]) -> ProviderResult<Vec<u8>> {
        let mut out = Vec::new();
        for request in requests {
            let line = BatchLine {
                custom_id: &request.custom_id,
                method: "POST",
                url: CHAT_ENDPOINT,
                body: ChatRequest::from_generation(&self.config.model, request),
            };
            serde_json::to_writer(&mut out, &line)?;
            out.push(b'\n');
        }
        Ok(out)
    }
}

/// Parse one JSONL result file into `results`.
fn collect_lines(raw: &str, results: &mut BatchResults) {
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let parsed: OutputLine = match serde_json::from_str(line) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Skipping malformed batch output line");
                continue;
            }
        };
        let Some(index) = GenerationRequest::slot_index(&parsed.custom_id) else {
            warn!(custom_id = %parsed.custom_id, "Batch line with unknown custom_id");
            continue;
        };

        let outcome = match (parsed.response, parsed.error) {
            (Some(resp), _) if resp.status_code == 200 => {
                serde_json::from_value::<ChatResponse>(resp.body)
                    .map_err(|e| SlotError::new(format!("Malformed completion: {}", e), None))
                    .and_then(|r| r.into_output().map_err(|e| SlotError::new(e.to_string(), None)))
            }
            (Some(resp), error) => {
                let message = error
                    .map(|e| e.describe())
                    .unwrap_or_else(|| resp.body.to_string());
                Err(SlotError::new(message, Some(resp.status_code)))
            }
            (None, Some(error)) => Err(SlotError::new(error.describe(), None)),
            (None, None) => Err(SlotError::new("Empty batch result line", None)),
        };

        // Output-file successes take precedence over error-file entries.
        match results.get(&index) {
            Some(Ok(_)) => {}
            _ => {
                results.insert(index, outcome);
            }
        }
    }
}

#[async_trait]
impl BatchProvider for OpenAiBatchProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit_batch(&self, requests: &[GenerationRequest]) -> ProviderResult<BatchId> {
        if requests.is_empty() {
            return Err(ProviderError::invalid_request("Empty batch"));
        }
        let jsonl = self.encode_jsonl(requests)?;

        let part = Part::bytes(jsonl)
            .file_name("batch_input.jsonl")
            .mime_str("application/jsonl")?;
        let form = Form::new().text("purpose", "batch").part("file", part);
        let response = self
            .config
            .authorize(self.http.post(self.config.url("files")))
            .multipart(form)
            .send()
            .await?;
        let file: FileObject = Self::check(response).await?.json().await?;
        debug!(file_id = %file.id, requests = requests.len(), "Uploaded batch input");

        let response = self
            .config
            .authorize(self.http.post(self.config.url("batches")))
            .json(&CreateBatch {
                input_file_id: &file.id,
                endpoint: CHAT_ENDPOINT,
                completion_window: COMPLETION_WINDOW,
            })
            .send()
            .await?;
        let batch: BatchObject = Self::check(response).await?.json().await?;
        info!(batch_id = %batch.id, requests = requests.len(), "Created batch");

        Ok(BatchId::from_string(batch.id))
    }

    async fn poll_batch(&self, batch_id: &BatchId) -> ProviderResult<BatchStatus> {
        let batch = self.retrieve(batch_id).await?;
        if let Some(counts) = &batch.request_counts {
            debug!(
                batch_id = %batch_id,
                status = %batch.status,
                total = counts.total,
                completed = counts.completed,
                failed = counts.failed,
                "Polled batch"
            );
        }

        let status = match batch.status.as_str() {
            "completed" => BatchStatus::Done,
            "failed" | "expired" | "cancelled" | "cancelling" => {
                let details = batch
                    .errors
                    .map(|e| {
                        e.data
                            .iter()
                            .map(LineError::describe)
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .filter(|d| !d.is_empty());
                BatchStatus::Failed(match details {
                    Some(d) => format!("batch {}: {}", batch.status, d),
                    None => format!("batch {}", batch.status),
                })
            }
            // validating, in_progress, finalizing: output is only published on completion
            _ => BatchStatus::Pending,
        };
        Ok(status)
    }

    async fn fetch_results(&self, batch_id: &BatchId) -> ProviderResult<BatchResults> {
        let batch = self.retrieve(batch_id).await?;
        if batch.output_file_id.is_none() && batch.error_file_id.is_none() {
            return Err(ProviderError::invalid_response(format!(
                "Batch {} has no result files (status {})",
                batch_id, batch.status
            )));
        }

        let mut results = BatchResults::new();
        if let Some(file_id) = &batch.output_file_id {
            collect_lines(&self.download(file_id).await?, &mut results);
        }
        if let Some(file_id) = &batch.error_file_id {
            collect_lines(&self.download(file_id).await?, &mut results);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiBatchProvider {
        let config = OpenAiChatConfig::openai("sk-test", "gpt-4o-mini").with_base_url(server.uri());
        OpenAiBatchProvider::new(config).unwrap()
    }

    fn completion(text: &str) -> serde_json::Value {
        json!({"status_code": 200, "body": {"choices": [{"message": {"content": text}}]}})
    }

    #[tokio::test]
    async fn test_submit_uploads_then_creates_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file-in"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/batches"))
            .and(body_partial_json(json!({
                "input_file_id": "file-in",
                "endpoint": "/v1/chat/completions",
                "completion_window": "24h"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "batch_1", "status": "validating"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let requests = vec![
            GenerationRequest::new("title_0", "sys", "Generate a creative title for a story", 0.7),
            GenerationRequest::new("title_1", "sys", "Generate a creative title for a story", 0.7),
        ];
        let id = provider(&server).submit_batch(&requests).await.unwrap();
        assert_eq!(id.as_str(), "batch_1");
    }

    #[tokio::test]
    async fn test_poll_maps_remote_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/batches/batch_run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "batch_run", "status": "in_progress",
                "request_counts": {"total": 5, "completed": 2, "failed": 0}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/batches/batch_exp"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "batch_exp", "status": "expired"})),
            )
            .mount(&server)
            .await;

        let p = provider(&server);
        assert_eq!(
            p.poll_batch(&BatchId::from_string("batch_run")).await.unwrap(),
            BatchStatus::Pending
        );
        assert!(matches!(
            p.poll_batch(&BatchId::from_string("batch_exp")).await.unwrap(),
            BatchStatus::Failed(ref r) if r.contains("expired")
        ));
    }

    #[tokio::test]
    async fn test_fetch_results_isolates_failed_lines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/batches/batch_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "batch_1", "status": "completed",
                "output_file_id": "file-out", "error_file_id": "file-err"
            })))
            .mount(&server)
            .await;

        let output = [
            json!({"custom_id": "story_0", "response": completion("Once upon a time")}),
            json!({"custom_id": "story_2", "response": {"status_code": 500, "body": {}},
                   "error": {"code": "server_error", "message": "boom"}}),
        ]
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n");
        let errors = json!({"custom_id": "story_1", "response": null,
                            "error": {"code": "invalid_request", "message": "too long"}})
        .to_string();

        Mock::given(method("GET"))
            .and(path("/files/file-out/content"))
            .respond_with(ResponseTemplate::new(200).set_body_string(output))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/file-err/content"))
            .respond_with(ResponseTemplate::new(200).set_body_string(errors))
            .mount(&server)
            .await;

        let results = provider(&server)
            .fetch_results(&BatchId::from_string("batch_1"))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[&0].as_ref().unwrap().text, "Once upon a time");
        let slot2 = results[&2].as_ref().unwrap_err();
        assert_eq!(slot2.status, Some(500));
        assert!(slot2.retryable);
        assert!(results[&1].as_ref().unwrap_err().message.contains("too long"));
    }
}
