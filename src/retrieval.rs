//! Hybrid retrieval across the expanded query set
//!
//! Each query is embedded, sparse-encoded, and sent to the index as one
//! hybrid query; the per-query searches run concurrently under a
//! semaphore bound. Per-query failures are isolated so one bad expansion
//! cannot sink the batch; only a fully failed round raises
//! `RetrievalExhausted`.

use crate::embeddings::EmbeddingService;
use crate::error::{PipelineError, Result};
use crate::index::{IndexMatch, SparseEncoder, VectorIndex};
use crate::types::{Candidate, ExpandedQuery, QueryKind};
use crate::util::fingerprint;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    sparse: Arc<SparseEncoder>,
    hybrid_alpha: f32,
    top_k: usize,
    max_parallel: usize,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        sparse: Arc<SparseEncoder>,
        hybrid_alpha: f32,
        top_k: usize,
        max_parallel: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            sparse,
            hybrid_alpha,
            top_k,
            max_parallel,
        }
    }

    /// Run every query against the index, fuse scores, and deduplicate.
    ///
    /// Returns at most `top_k` candidates sorted by fused score
    /// descending. Sibling searches are cancelled when `cancel` fires.
    pub async fn search_all(
        &self,
        queries: &[ExpandedQuery],
        ipc_filters: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>> {
        if queries.is_empty() {
            return Err(PipelineError::RetrievalExhausted);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks: JoinSet<(QueryKind, String, Result<Vec<IndexMatch>>)> = JoinSet::new();

        for query in queries.iter().cloned() {
            let embedder = Arc::clone(&self.embedder);
            let index = Arc::clone(&self.index);
            let sparse = Arc::clone(&self.sparse);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let top_k = self.top_k;
            let filters = ipc_filters.to_vec();

            tasks.spawn(async move {
                let kind = query.kind;
                let print = fingerprint(&query.text);
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(PipelineError::Internal("cancelled".to_string())),
                    r = run_query(embedder, index, sparse, query, top_k, filters, semaphore) => r,
                };
                (kind, print, result)
            });
        }

        let mut per_query: Vec<(QueryKind, Vec<IndexMatch>)> = Vec::new();
        let mut failures = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((kind, print, Ok(matches))) => {
                    debug!(
                        query = %kind.label(),
                        fingerprint = %print,
                        matches = matches.len(),
                        "query search completed"
                    );
                    per_query.push((kind, matches));
                }
                Ok((kind, print, Err(e))) => {
                    warn!(
                        event = "retrieval_query_failed",
                        query = %kind.label(),
                        fingerprint = %print,
                        error = %e,
                        "query search failed, continuing with remaining queries"
                    );
                    failures += 1;
                }
                Err(join_err) => {
                    warn!(
                        event = "retrieval_query_failed",
                        error = %join_err,
                        "query task panicked"
                    );
                    failures += 1;
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Internal("cancelled".to_string()));
        }
        if failures == queries.len() {
            return Err(PipelineError::RetrievalExhausted);
        }

        Ok(fuse_and_dedup(per_query, self.hybrid_alpha, self.top_k))
    }
}

async fn run_query(
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    sparse: Arc<SparseEncoder>,
    query: ExpandedQuery,
    top_k: usize,
    filters: Vec<String>,
    semaphore: Arc<Semaphore>,
) -> Result<Vec<IndexMatch>> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| PipelineError::Internal("semaphore closed".to_string()))?;

    let dense = embedder.embed(&query.text).await?;
    let sparse_vector = sparse.encode(&query.text);
    index
        .hybrid_query(&dense, &sparse_vector, top_k, &filters)
        .await
}

/// Fuse dense and sparse scores, deduplicate across queries by
/// publication number (keeping the highest fused score and recording all
/// source queries), sort, and truncate.
fn fuse_and_dedup(
    per_query: Vec<(QueryKind, Vec<IndexMatch>)>,
    alpha: f32,
    top_k: usize,
) -> Vec<Candidate> {
    let mut by_id: HashMap<crate::types::PatentId, Candidate> = HashMap::new();

    for (kind, matches) in per_query {
        for m in matches {
            let fused = alpha * m.dense_score + (1.0 - alpha) * m.sparse_score;
            match by_id.get_mut(&m.publication_number) {
                Some(existing) => {
                    if !existing.source_queries.contains(&kind) {
                        existing.source_queries.push(kind);
                    }
                    if fused > existing.fused_score {
                        existing.dense_score = m.dense_score;
                        existing.sparse_score = m.sparse_score;
                        existing.fused_score = fused;
                    }
                }
                None => {
                    by_id.insert(
                        m.publication_number.clone(),
                        Candidate {
                            publication_number: m.publication_number,
                            title: m.metadata.title,
                            abstract_text: m.metadata.abstract_text,
                            claims: m.metadata.claims,
                            ipc_codes: m.metadata.ipc_codes,
                            dense_score: m.dense_score,
                            sparse_score: m.sparse_score,
                            fused_score: fused,
                            rerank_score: None,
                            grading_score: None,
                            source_queries: vec![kind],
                        },
                    );
                }
            }
        }
    }

    let mut candidates: Vec<Candidate> = by_id.into_values().collect();
    candidates.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
    candidates.truncate(top_k);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PatentId, PatentMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_match(id: &str, dense: f32, sparse: f32) -> IndexMatch {
        IndexMatch {
            publication_number: PatentId::new(id),
            dense_score: dense,
            sparse_score: sparse,
            metadata: PatentMetadata {
                title: format!("patent {}", id),
                abstract_text: "abstract".to_string(),
                claims: None,
                ipc_codes: vec![],
            },
        }
    }

    #[test]
    fn test_fusion_weights() {
        let candidates = fuse_and_dedup(
            vec![(QueryKind::Original, vec![make_match("P1", 0.8, 0.4)])],
            0.7,
            10,
        );
        assert_eq!(candidates.len(), 1);
        // 0.7*0.8 + 0.3*0.4 = 0.68
        assert!((candidates[0].fused_score - 0.68).abs() < 1e-5);
    }

    #[test]
    fn test_dedup_keeps_max_and_records_sources() {
        let candidates = fuse_and_dedup(
            vec![
                (QueryKind::HypotheticalClaim, vec![make_match("P1", 0.9, 0.9)]),
                (QueryKind::Paraphrase { index: 0 }, vec![make_match("P1", 0.2, 0.2)]),
            ],
            0.7,
            10,
        );
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].fused_score - 0.9).abs() < 1e-5);
        assert_eq!(candidates[0].source_queries.len(), 2);
        assert!(candidates[0]
            .source_queries
            .contains(&QueryKind::HypotheticalClaim));
        assert!(candidates[0]
            .source_queries
            .contains(&QueryKind::Paraphrase { index: 0 }));
    }

    #[test]
    fn test_sorted_and_truncated() {
        let matches = vec![
            make_match("P1", 0.1, 0.1),
            make_match("P2", 0.9, 0.9),
            make_match("P3", 0.5, 0.5),
        ];
        let candidates = fuse_and_dedup(vec![(QueryKind::Original, matches)], 0.7, 2);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].publication_number.as_str(), "P2");
        assert_eq!(candidates[1].publication_number.as_str(), "P3");
    }

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingService for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 4])
        }
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![0.0; 4]; texts.len()])
        }
        fn dimensions(&self) -> usize {
            4
        }
        fn model_name(&self) -> &str {
            "stub"
        }
    }

    /// Index that fails for queries containing "bad"
    struct FlakyIndex {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for FlakyIndex {
        async fn hybrid_query(
            &self,
            _dense: &[f32],
            _sparse: &crate::index::SparseVector,
            _top_k: usize,
            _ipc_filters: &[String],
        ) -> Result<Vec<IndexMatch>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(PipelineError::UpstreamUnavailable("boom".to_string()))
            } else {
                Ok(vec![make_match("P9", 0.6, 0.2)])
            }
        }
    }

    fn retriever_with(index: Arc<dyn VectorIndex>) -> HybridRetriever {
        HybridRetriever::new(
            Arc::new(StubEmbedder),
            index,
            Arc::new(SparseEncoder::disabled()),
            0.7,
            10,
            2,
        )
    }

    #[tokio::test]
    async fn test_per_query_failure_is_isolated() {
        let retriever = retriever_with(Arc::new(FlakyIndex {
            calls: AtomicUsize::new(0),
        }));
        let queries = vec![
            ExpandedQuery::new("q1", QueryKind::HypotheticalClaim),
            ExpandedQuery::new("q2", QueryKind::Paraphrase { index: 0 }),
        ];

        let candidates = retriever
            .search_all(&queries, &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].publication_number.as_str(), "P9");
    }

    struct AlwaysFailingIndex;

    #[async_trait]
    impl VectorIndex for AlwaysFailingIndex {
        async fn hybrid_query(
            &self,
            _dense: &[f32],
            _sparse: &crate::index::SparseVector,
            _top_k: usize,
            _ipc_filters: &[String],
        ) -> Result<Vec<IndexMatch>> {
            Err(PipelineError::UpstreamUnavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_all_queries_failing_raises_exhausted() {
        let retriever = retriever_with(Arc::new(AlwaysFailingIndex));
        let queries = vec![ExpandedQuery::new("q1", QueryKind::Original)];

        let result = retriever
            .search_all(&queries, &[], &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(PipelineError::RetrievalExhausted)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let retriever = retriever_with(Arc::new(AlwaysFailingIndex));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let queries = vec![ExpandedQuery::new("q1", QueryKind::Original)];
        let result = retriever.search_all(&queries, &[], &cancel).await;
        assert!(result.is_err());
    }
}
