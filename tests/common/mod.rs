//! Shared fixtures for pipeline integration tests
//!
//! The pipeline's LLM call order is deterministic (hypothetical claim,
//! multi-query, grade, [rewrite, grade], parse), so a FIFO script of
//! responses exercises every scenario without a mock framework.

use async_trait::async_trait;
use priorart_core::error::{PipelineError, Result};
use priorart_core::index::{IndexMatch, SparseVector, VectorIndex};
use priorart_core::llm::{CompletionModel, CompletionRequest};
use priorart_core::types::{PatentMetadata, PatentId};
use priorart_core::EmbeddingService;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

/// LLM fake that replays a FIFO script of completions and streams
#[derive(Default)]
pub struct ScriptedLlm {
    completions: Mutex<VecDeque<Result<String>>>,
    streams: Mutex<VecDeque<Vec<Result<String>>>>,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_completion(&self, response: Result<String>) {
        self.completions.lock().unwrap().push_back(response);
    }

    pub fn push_stream(&self, chunks: Vec<Result<String>>) {
        self.streams.lock().unwrap().push_back(chunks);
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.complete_calls() + self.stream_calls()
    }
}

#[async_trait]
impl CompletionModel for ScriptedLlm {
    async fn complete(&self, _request: CompletionRequest) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::Internal("completion script exhausted".into())))
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<ReceiverStream<Result<String>>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PipelineError::Internal("stream script exhausted".into()))?;

        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(chunk).await.ok();
        }
        Ok(ReceiverStream::new(rx))
    }
}

/// Deterministic embedder; the vectors only need to exist
pub struct FakeEmbedder;

#[async_trait]
impl EmbeddingService for FakeEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.1; 8])
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(vec![vec![0.1; 8]; texts.len()])
    }

    fn dimensions(&self) -> usize {
        8
    }

    fn model_name(&self) -> &str {
        "fake-embedder"
    }
}

/// Index fake returning the same seeded matches for every query
pub struct SeededIndex {
    matches: Vec<IndexMatch>,
    calls: AtomicUsize,
}

impl SeededIndex {
    pub fn with_matches(matches: Vec<IndexMatch>) -> Self {
        Self {
            matches,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for SeededIndex {
    async fn hybrid_query(
        &self,
        _dense: &[f32],
        _sparse: &SparseVector,
        _top_k: usize,
        _ipc_filters: &[String],
    ) -> Result<Vec<IndexMatch>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.matches.clone())
    }
}

/// Build an index match with plausible patent metadata
pub fn index_match(id: &str, dense: f32, sparse: f32) -> IndexMatch {
    IndexMatch {
        publication_number: PatentId::new(id),
        dense_score: dense,
        sparse_score: sparse,
        metadata: PatentMetadata {
            title: format!("스마트 글래스 특허 {}", id),
            abstract_text: "증강현실 기반 경로 안내 장치 및 방법".to_string(),
            claims: Some("청구항 1: 디스플레이부를 포함하는 장치".to_string()),
            ipc_codes: vec!["G02B 27/01".to_string()],
        },
    }
}

/// JSON body the grader expects, one entry per (id, score)
pub fn grading_json(entries: &[(&str, f32)]) -> String {
    let results: Vec<String> = entries
        .iter()
        .map(|(id, score)| {
            format!(
                r#"{{"publication_number":"{}","score":{},"reason":"[{}] 인용"}}"#,
                id, score, id
            )
        })
        .collect();
    format!(r#"{{"results":[{}]}}"#, results.join(","))
}

/// JSON body the structured parse expects
pub fn parse_json(risk_score: u8, patents: &[(&str, u8)]) -> String {
    let top: Vec<String> = patents
        .iter()
        .map(|(id, similarity)| {
            format!(
                r#"{{"id":"{}","similarity":{},"title":"특허 {}","summary":"요약"}}"#,
                id, similarity, id
            )
        })
        .collect();
    format!(
        r#"{{"risk_score":{},"uniqueness":"부분적 차별성 존재","top_patents":[{}]}}"#,
        risk_score,
        top.join(",")
    )
}
