//! Reasoning-model client (Anthropic messages API)
//!
//! One HTTP client serves every completion in the pipeline; the model
//! identifier travels with each request so the cheap parsing tier and the
//! primary reasoning tier share a connection pool. Transient failures are
//! retried with backoff; auth and schema failures surface immediately as
//! configuration errors.

use crate::config::ReasoningConfig;
use crate::error::{PipelineError, Result};
use crate::retry::{retry_transient, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A single completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            max_tokens: 2048,
            temperature: 0.2,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Seam for every LLM call in the pipeline; tests inject scripted fakes
/// here instead of mutating module state.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Single-shot completion returning the full text.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;

    /// Streaming completion. The returned stream yields text chunks;
    /// a mid-stream transport failure yields exactly one `Err` item and
    /// then the stream ends.
    async fn stream(&self, request: CompletionRequest) -> Result<ReceiverStream<Result<String>>>;
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// One server-sent event from the streaming endpoint
#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

/// Anthropic messages-API client
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl AnthropicClient {
    /// Build a client with the configured global and connect timeouts.
    /// Stream reads inherit the global timeout.
    pub fn new(cfg: &ReasoningConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            return Err(PipelineError::Configuration(
                "reasoning.api_key is not set".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_s))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_s))
            .build()?;

        Ok(Self {
            client,
            api_key: cfg.api_key.clone(),
            base_url: "https://api.anthropic.com".to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Override the API endpoint (testing against a local stub).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let body = ApiRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.as_deref(),
            messages: vec![ApiMessage {
                role: "user",
                content: &request.prompt,
            }],
            stream,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => PipelineError::Configuration(format!(
                "invalid or missing API key (status {}): {}",
                status, detail
            )),
            429 => PipelineError::RateLimit(detail),
            _ => PipelineError::UpstreamUnavailable(format!(
                "completion failed with status {}: {}",
                status, detail
            )),
        })
    }
}

#[async_trait]
impl CompletionModel for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        debug!(model = %request.model, "calling completion API");

        let response = retry_transient(&self.retry, "completion", || self.send(&request, false))
            .await?;

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::MalformedResponse(format!("completion body: {}", e)))?;

        parsed
            .content
            .first()
            .map(|c| c.text.clone())
            .ok_or_else(|| PipelineError::MalformedResponse("empty completion".to_string()))
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ReceiverStream<Result<String>>> {
        debug!(model = %request.model, "opening completion stream");

        let response = retry_transient(&self.retry, "completion_stream", || {
            self.send(&request, true)
        })
        .await?;

        let (tx, rx) = mpsc::channel::<Result<String>>(64);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = body.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        // Terminal error item, then clean stream end.
                        let _ = tx.send(Err(PipelineError::from(e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let event: StreamEvent = match serde_json::from_str(data.trim()) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "skipping unparseable stream event");
                            continue;
                        }
                    };

                    match event.kind.as_str() {
                        "content_block_delta" => {
                            if let Some(text) = event.delta.and_then(|d| d.text) {
                                if tx.send(Ok(text)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }
                        }
                        "message_stop" => return,
                        "error" => {
                            let message = event
                                .error
                                .map(|e| e.message)
                                .unwrap_or_else(|| "stream error".to_string());
                            let _ = tx
                                .send(Err(PipelineError::UpstreamUnavailable(message)))
                                .await;
                            return;
                        }
                        _ => {}
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}
