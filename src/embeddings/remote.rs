//! Remote embedding service against an OpenAI-compatible endpoint

use crate::config::EmbeddingConfig;
use crate::embeddings::EmbeddingService;
use crate::error::{PipelineError, Result};
use crate::retry::{retry_transient, RetryPolicy};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Maximum texts per batch request
const MAX_BATCH_SIZE: usize = 128;

/// Request timeout duration
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct RemoteEmbeddingService {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    dimensions: usize,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl RemoteEmbeddingService {
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            return Err(PipelineError::Configuration(
                "embedding.api_key is not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            base_url: cfg.base_url.clone(),
            dimensions: cfg.dim,
            retry: RetryPolicy::default(),
        })
    }

    async fn call_api(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        debug!(
            count = texts.len(),
            model = %self.model,
            "calling embedding API"
        );

        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => response
                .json::<EmbeddingResponse>()
                .await
                .map_err(|e| PipelineError::MalformedResponse(format!("embedding body: {}", e))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PipelineError::Configuration(
                "invalid or missing embedding API key".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => Err(PipelineError::RateLimit(
                "embedding rate limit exceeded".to_string(),
            )),
            _ => {
                let detail = response.text().await.unwrap_or_default();
                Err(PipelineError::UpstreamUnavailable(format!(
                    "embedding API error (status {}): {}",
                    status, detail
                )))
            }
        }
    }

    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(PipelineError::MalformedResponse(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        if embedding.iter().any(|&x| !x.is_finite()) {
            return Err(PipelineError::MalformedResponse(
                "embedding contains NaN or Inf".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingService for RemoteEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(PipelineError::Internal(
                "cannot embed empty text".to_string(),
            ));
        }

        let texts = vec![text.to_string()];
        let response =
            retry_transient(&self.retry, "embed", || self.call_api(&texts)).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::MalformedResponse("empty embedding response".to_string()))?
            .embedding;

        self.validate_embedding(&embedding)?;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            let owned: Vec<String> = chunk.iter().map(|s| s.to_string()).collect();
            let response =
                retry_transient(&self.retry, "embed_batch", || self.call_api(&owned)).await?;

            // Sort by index to maintain order
            let mut data = response.data;
            data.sort_by_key(|d| d.index);

            for item in data {
                self.validate_embedding(&item.embedding)?;
                all_embeddings.push(item.embedding);
            }
        }

        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
