//! HTTP client for the hosted hybrid patent index

use crate::config::IndexConfig;
use crate::error::{PipelineError, Result};
use crate::index::{IndexMatch, SparseVector, VectorIndex};
use crate::retry::{retry_transient, RetryPolicy};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Request timeout duration
const REQUEST_TIMEOUT_SECS: u64 = 20;

pub struct RemoteVectorIndex {
    client: Client,
    base_url: String,
    api_key: String,
    index_name: String,
    namespace: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    namespace: &'a str,
    top_k: usize,
    vector: &'a [f32],
    #[serde(skip_serializing_if = "Option::is_none")]
    sparse_vector: Option<&'a SparseVector>,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Deserialize)]
struct WireMatch {
    id: String,
    #[serde(default)]
    dense_score: f32,
    #[serde(default)]
    sparse_score: f32,
    #[serde(default)]
    metadata: crate::types::PatentMetadata,
}

impl RemoteVectorIndex {
    pub fn new(cfg: &IndexConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            return Err(PipelineError::Configuration(
                "index.api_key is not set".to_string(),
            ));
        }
        if cfg.base_url.is_empty() {
            return Err(PipelineError::Configuration(
                "index.base_url is not set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            index_name: cfg.name.clone(),
            namespace: cfg.namespace.clone(),
            retry: RetryPolicy::default(),
        })
    }

    async fn query_once(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        top_k: usize,
        ipc_filters: &[String],
    ) -> Result<Vec<IndexMatch>> {
        let filter = if ipc_filters.is_empty() {
            None
        } else {
            Some(json!({ "ipc_prefixes": { "$in": ipc_filters } }))
        };

        let request = QueryRequest {
            namespace: &self.namespace,
            top_k,
            vector: dense,
            sparse_vector: (!sparse.is_empty()).then_some(sparse),
            include_metadata: true,
            filter,
        };

        let response = self
            .client
            .post(format!(
                "{}/indexes/{}/query",
                self.base_url, self.index_name
            ))
            .header("Api-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let parsed: QueryResponse = response
                    .json()
                    .await
                    .map_err(|e| PipelineError::MalformedResponse(format!("index body: {}", e)))?;

                debug!(matches = parsed.matches.len(), "index query returned");

                Ok(parsed
                    .matches
                    .into_iter()
                    .map(|m| IndexMatch {
                        publication_number: crate::types::PatentId::new(m.id),
                        dense_score: m.dense_score,
                        sparse_score: m.sparse_score,
                        metadata: m.metadata,
                    })
                    .collect())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PipelineError::Configuration(
                "invalid or missing index API key".to_string(),
            )),
            StatusCode::NOT_FOUND => Err(PipelineError::Configuration(format!(
                "unknown index or namespace: {}/{}",
                self.index_name, self.namespace
            ))),
            StatusCode::TOO_MANY_REQUESTS => Err(PipelineError::RateLimit(
                "index rate limit exceeded".to_string(),
            )),
            _ => {
                let detail = response.text().await.unwrap_or_default();
                Err(PipelineError::UpstreamUnavailable(format!(
                    "index query failed (status {}): {}",
                    status, detail
                )))
            }
        }
    }
}

#[async_trait]
impl VectorIndex for RemoteVectorIndex {
    async fn hybrid_query(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        top_k: usize,
        ipc_filters: &[String],
    ) -> Result<Vec<IndexMatch>> {
        retry_transient(&self.retry, "index_query", || {
            self.query_once(dense, sparse, top_k, ipc_filters)
        })
        .await
    }
}
