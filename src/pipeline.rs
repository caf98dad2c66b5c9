//! Pipeline orchestration
//!
//! Composes the stages leaves-first: sandbox → expansion → (retrieval →
//! rerank → grading) → one optional rewrite round → streamed analysis →
//! structured parse. Data flows strictly forward; the only feedback edge
//! is the grading-to-expansion rewrite, bounded at one extra retrieval
//! round. Each run is stateless except for the process-wide lazy
//! reranker, the read-only configuration, and the rate-limit store.

use crate::analysis::Analyst;
use crate::config::PipelineConfig;
use crate::embeddings::{EmbeddingService, RemoteEmbeddingService};
use crate::error::{PipelineError, Result};
use crate::events::PipelineEvent;
use crate::expansion::QueryExpander;
use crate::grading::{Grader, GradingOutcome};
use crate::history::HistorySink;
use crate::index::{RemoteVectorIndex, SparseEncoder, VectorIndex};
use crate::llm::{AnthropicClient, CompletionModel};
use crate::ratelimit::RateLimiter;
use crate::rerank::{LazyCrossEncoder, Reranker};
use crate::retrieval::HybridRetriever;
use crate::sandbox::{self, SandboxedIdea};
use crate::types::{Candidate, CompletedRun, ExpandedQuery, PatentId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One analysis request entering the pipeline
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub idea: String,
    pub session_id: String,
    /// Client address for the per-minute quota; absent for trusted
    /// callers (CLI)
    pub client_addr: Option<String>,
    /// IPC code prefixes restricting retrieval, empty for no filter
    pub ipc_filters: Vec<String>,
}

impl RunRequest {
    pub fn new(idea: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            idea: idea.into(),
            session_id: session_id.into(),
            client_addr: None,
            ipc_filters: Vec::new(),
        }
    }
}

/// External collaborators behind their trait seams. Tests inject
/// fixtures here instead of mutating module state.
pub struct Collaborators {
    pub llm: Arc<dyn CompletionModel>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub index: Arc<dyn VectorIndex>,
    pub sparse: Arc<SparseEncoder>,
    pub reranker: Arc<dyn Reranker>,
    pub limiter: Option<Arc<RateLimiter>>,
    pub history: Option<Arc<dyn HistorySink>>,
}

pub struct Pipeline {
    retriever: HybridRetriever,
    reranker: Arc<dyn Reranker>,
    expander: QueryExpander,
    grader: Grader,
    analyst: Analyst,
    limiter: Option<Arc<RateLimiter>>,
    history: Option<Arc<dyn HistorySink>>,
    top_k: usize,
}

impl Pipeline {
    /// Wire the pipeline from configuration with the real collaborators.
    pub fn from_config(config: PipelineConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let sparse = match &config.index.vocab_path {
            Some(path) => SparseEncoder::from_path(path)?,
            None => SparseEncoder::disabled(),
        };
        let collaborators = Collaborators {
            llm: Arc::new(AnthropicClient::new(&config.reasoning)?),
            embedder: Arc::new(RemoteEmbeddingService::new(&config.embedding)?),
            index: Arc::new(RemoteVectorIndex::new(&config.index)?),
            sparse: Arc::new(sparse),
            reranker: Arc::new(LazyCrossEncoder::new()),
            limiter: Some(Arc::new(RateLimiter::new(config.limits.clone()))),
            history: None,
        };
        Ok(Self::new(config, collaborators))
    }

    /// Assemble the pipeline from explicit collaborators.
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Arc<Self> {
        let Collaborators {
            llm,
            embedder,
            index,
            sparse,
            reranker,
            limiter,
            history,
        } = collaborators;

        let retriever = HybridRetriever::new(
            embedder,
            index,
            sparse,
            config.index.hybrid_alpha,
            config.retrieval.top_k,
            config.retrieval.max_parallel_queries,
        );
        let expander = QueryExpander::new(
            Arc::clone(&llm),
            &config.reasoning.model,
            config.retrieval.multi_query_n,
        );
        let grader = Grader::new(
            Arc::clone(&llm),
            &config.reasoning.model,
            config.grading.cutoff_threshold,
            config.grading.rewrite_threshold,
        );
        let analyst = Analyst::new(
            llm,
            &config.reasoning.model,
            &config.parsing.model,
            config.analysis.clone(),
        );

        Arc::new(Self {
            retriever,
            reranker,
            expander,
            grader,
            analyst,
            limiter,
            history,
            top_k: config.retrieval.top_k,
        })
    }

    /// Run one request, yielding events until a terminal event closes
    /// the stream.
    pub fn run(self: &Arc<Self>, request: RunRequest) -> ReceiverStream<PipelineEvent> {
        self.run_with_cancel(request, CancellationToken::new())
    }

    /// Like [`run`](Self::run) with a caller-supplied cancellation
    /// signal. On cancel, in-flight work is aborted and the stream ends
    /// at the next yield boundary without a terminal event.
    pub fn run_with_cancel(
        self: &Arc<Self>,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> ReceiverStream<PipelineEvent> {
        let (tx, rx) = mpsc::channel(32);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.execute(request, cancel, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn execute(
        self: Arc<Self>,
        request: RunRequest,
        cancel: CancellationToken,
        tx: mpsc::Sender<PipelineEvent>,
    ) {
        if let Err(e) = self.execute_inner(&request, &cancel, &tx).await {
            if cancel.is_cancelled() {
                return; // aborted by the caller, no terminal event
            }
            match &e {
                PipelineError::Internal(_) => {
                    error!(session_id = %request.session_id, error = %e, "pipeline stage failed unexpectedly");
                }
                _ => {
                    warn!(session_id = %request.session_id, error = %e, code = e.code(), "pipeline run failed");
                }
            }
            let _ = tx.send(PipelineEvent::error(&e)).await;
        }
    }

    /// The stage sequence. Sends terminal `complete`/`empty` itself;
    /// returns `Err` for terminal `error` events, which the wrapper
    /// emits.
    async fn execute_inner(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<()> {
        if let Some(limiter) = &self.limiter {
            limiter.check_and_record(&request.session_id, request.client_addr.as_deref())?;
        }

        let idea = sandbox::sanitize(&request.idea)?;

        send(tx, PipelineEvent::progress(10, "expanding search queries")).await;
        let queries = self.expander.expand(&idea).await;
        if cancel.is_cancelled() {
            return Ok(());
        }

        send(tx, PipelineEvent::progress(35, "retrieving prior-art candidates")).await;
        let mut outcome = self
            .retrieval_round(&idea, &queries, &request.ipc_filters, cancel)
            .await?;

        if self.grader.should_rewrite(&outcome.response) {
            info!(
                event = "rewrite_triggered",
                average_score = outcome.response.average_score,
                "mean grading score below rewrite threshold, spending the one rewrite round"
            );
            let low_scoring: Vec<Candidate> = outcome
                .graded
                .iter()
                .filter(|c| c.grading_score.unwrap_or(0.0) < self.grader.cutoff())
                .cloned()
                .collect();
            let rewritten = self
                .grader
                .rewrite_query(&idea, &queries, &low_scoring)
                .await;
            if cancel.is_cancelled() {
                return Ok(());
            }
            outcome = self
                .retrieval_round(&idea, &[rewritten], &request.ipc_filters, cancel)
                .await?;
            // Whatever the second round produced is accepted; there is
            // no third round.
        }

        let survivors = outcome.survivors(self.grader.cutoff());
        if survivors.is_empty() {
            info!(session_id = %request.session_id, "no candidates survived the cutoff");
            send(tx, PipelineEvent::empty()).await;
            return Ok(());
        }

        send(tx, PipelineEvent::progress(60, "analyzing prior art")).await;
        let stats = outcome.response.filter_stats;
        let mut stream = self.analyst.analyze_stream(&idea, &survivors, &stats).await?;

        let mut full_text = String::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                chunk = stream.next() => match chunk {
                    Some(Ok(text)) => {
                        full_text.push_str(&text);
                        if tx.send(PipelineEvent::stream_token(text)).await.is_err() {
                            return Ok(()); // receiver gone
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
            }
        }

        let survivor_ids: Vec<PatentId> = survivors
            .iter()
            .map(|c| c.publication_number.clone())
            .collect();
        let report = self
            .analyst
            .parse_to_structured(&full_text, &survivor_ids, &stats)
            .await;

        if let Some(history) = &self.history {
            let run = CompletedRun {
                session_id: request.session_id.clone(),
                idea: idea.text().to_string(),
                report: report.clone(),
                created_at: chrono::Utc::now(),
            };
            if let Err(e) = history.record(run).await {
                warn!(error = %e, "history sink rejected completed run");
            }
        }

        send(tx, PipelineEvent::complete(report)).await;
        Ok(())
    }

    /// One retrieval round: hybrid search, rerank, grade. A fully failed
    /// search is graded as an empty round rather than raised, so the
    /// rewrite loop can still spend its retry.
    async fn retrieval_round(
        &self,
        idea: &SandboxedIdea,
        queries: &[ExpandedQuery],
        ipc_filters: &[String],
        cancel: &CancellationToken,
    ) -> Result<GradingOutcome> {
        let candidates = match self
            .retriever
            .search_all(queries, ipc_filters, cancel)
            .await
        {
            Ok(candidates) => candidates,
            Err(PipelineError::RetrievalExhausted) => Vec::new(),
            Err(e) => return Err(e),
        };

        let candidates = self
            .reranker
            .rerank(idea.text(), candidates, self.top_k)
            .await;
        self.grader.grade(idea, &candidates).await
    }
}

async fn send(tx: &mpsc::Sender<PipelineEvent>, event: PipelineEvent) {
    // A dropped receiver only means the caller went away; the run is
    // allowed to finish its side effects.
    let _ = tx.send(event).await;
}
