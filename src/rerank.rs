//! Cross-encoder reranking of retrieval candidates
//!
//! The cross-encoder scores (query, passage) pairs jointly and is much
//! more precise than fused retrieval scores, but the model is heavy: it
//! is constructed lazily on first use behind an async-aware single-flight
//! guard, and inference always runs on a blocking worker thread so the
//! cooperative scheduler is never stalled. A failed model load is
//! remembered and turns every later call into a logged no-op passthrough.

use crate::types::Candidate;
use crate::util::truncate_chars;
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio::task;
use tracing::{debug, info, warn};

/// Passage text cap fed to the cross-encoder
const MAX_DOC_CHARS: usize = 1024;

/// Reranking seam; tests substitute a passthrough or scripted fake.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder candidates by cross-encoder score, truncated to `top_k`.
    /// Never fails: an unavailable model passes candidates through
    /// unchanged.
    async fn rerank(&self, query: &str, candidates: Vec<Candidate>, top_k: usize)
        -> Vec<Candidate>;
}

/// Lazily constructed cross-encoder over fastembed's ONNX runtime
pub struct LazyCrossEncoder {
    cell: OnceCell<Option<Arc<Mutex<TextRerank>>>>,
}

impl LazyCrossEncoder {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Single-flight lazy init: concurrent first callers share one model
    /// construction. Returns `None` permanently if the load failed.
    async fn model(&self) -> Option<Arc<Mutex<TextRerank>>> {
        self.cell
            .get_or_init(|| async {
                let loaded = task::spawn_blocking(|| {
                    let mut options = RerankInitOptions::default();
                    options.model_name = RerankerModel::BGERerankerBase;
                    options.show_download_progress = false;
                    TextRerank::try_new(options)
                })
                .await;

                match loaded {
                    Ok(Ok(model)) => {
                        info!("cross-encoder reranker initialized");
                        Some(Arc::new(Mutex::new(model)))
                    }
                    Ok(Err(e)) => {
                        info!(error = %e, "cross-encoder unavailable, reranking disabled");
                        None
                    }
                    Err(join_err) => {
                        info!(error = %join_err, "cross-encoder load task failed, reranking disabled");
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

impl Default for LazyCrossEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Passage rendering fed to the cross-encoder: title, abstract, claims,
/// capped to keep tokenization bounded.
fn passage_text(candidate: &Candidate) -> String {
    let mut text = format!("{} {}", candidate.title, candidate.abstract_text);
    if let Some(claims) = &candidate.claims {
        text.push(' ');
        text.push_str(claims);
    }
    truncate_chars(&text, MAX_DOC_CHARS)
}

#[async_trait]
impl Reranker for LazyCrossEncoder {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Vec<Candidate> {
        if candidates.is_empty() {
            return candidates;
        }

        let Some(model) = self.model().await else {
            return candidates;
        };

        let documents: Vec<String> = candidates.iter().map(passage_text).collect();
        let query = query.to_string();

        // Inference is CPU-bound and must not run on the event loop.
        let scored = task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| anyhow::anyhow!("reranker lock poisoned: {}", e))?;
            guard
                .rerank(query, documents, false, None)
                .map_err(|e| anyhow::anyhow!("rerank inference failed: {}", e))
        })
        .await;

        let results = match scored {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                warn!(error = %e, "rerank inference failed, keeping fused order");
                return candidates;
            }
            Err(join_err) => {
                warn!(error = %join_err, "rerank task failed, keeping fused order");
                return candidates;
            }
        };

        debug!(scored = results.len(), "cross-encoder reranked candidates");

        let mut reranked: Vec<Candidate> = results
            .into_iter()
            .filter_map(|r| {
                candidates.get(r.index).map(|c| {
                    let mut c = c.clone();
                    c.rerank_score = Some(r.score);
                    c
                })
            })
            .collect();
        reranked.sort_by(|a, b| {
            b.rerank_score
                .unwrap_or(f32::MIN)
                .total_cmp(&a.rerank_score.unwrap_or(f32::MIN))
        });
        reranked.truncate(top_k);
        reranked
    }
}

/// No-op reranker used when reranking is disabled outright
pub struct PassthroughReranker;

#[async_trait]
impl Reranker for PassthroughReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Vec<Candidate> {
        candidates.truncate(top_k);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PatentId;

    fn candidate(id: &str, fused: f32) -> Candidate {
        Candidate {
            publication_number: PatentId::new(id),
            title: format!("patent {}", id),
            abstract_text: "abstract".to_string(),
            claims: Some("claim 1".to_string()),
            ipc_codes: vec![],
            dense_score: fused,
            sparse_score: fused,
            fused_score: fused,
            rerank_score: None,
            grading_score: None,
            source_queries: vec![],
        }
    }

    #[test]
    fn test_passage_text_includes_claims_and_caps_length() {
        let mut c = candidate("P1", 0.5);
        c.claims = Some("x".repeat(5000));
        let text = passage_text(&c);
        assert!(text.starts_with("patent P1 abstract"));
        assert!(text.chars().count() <= MAX_DOC_CHARS + 3); // ellipsis
    }

    #[tokio::test]
    async fn test_passthrough_preserves_order_and_truncates() {
        let reranker = PassthroughReranker;
        let candidates = vec![candidate("P1", 0.9), candidate("P2", 0.8), candidate("P3", 0.7)];
        let out = reranker.rerank("query", candidates, 2).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].publication_number.as_str(), "P1");
        assert!(out[0].rerank_score.is_none());
    }

    #[tokio::test]
    async fn test_empty_candidates_short_circuit() {
        let reranker = LazyCrossEncoder::new();
        // Must not touch the model cell at all for an empty batch.
        let out = reranker.rerank("query", vec![], 5).await;
        assert!(out.is_empty());
        assert!(reranker.cell.get().is_none());
    }
}
