//! PriorArt - Self-Reflective Patent Prior-Art Analysis Pipeline
//!
//! Turns a free-text invention idea into a ranked, graded set of patent
//! passages (rewriting the query and retrying once when retrieval
//! quality is poor), then streams a grounded infringement-risk analysis
//! that is parsed into a typed report.
//!
//! # Architecture
//!
//! The pipeline is composed leaves-first:
//! - **Sandbox**: injection filtering and structural delimitation of user text
//! - **Expansion**: hypothetical-claim (HyDE) and multi-query generation
//! - **Retrieval**: hybrid dense+sparse search with client-side fusion
//! - **Rerank**: lazy single-flight cross-encoder reordering
//! - **Grading**: LLM rubric scoring, cutoff filtering, one rewrite round
//! - **Analysis**: grounded streaming analysis plus a cheap structured parse
//!
//! # Example
//!
//! ```ignore
//! use priorart_core::{Pipeline, PipelineConfig, RunRequest};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pipeline = Pipeline::from_config(PipelineConfig::from_env()?)?;
//!     let mut events = pipeline.run(RunRequest::new(
//!         "스마트 안경을 이용하여 실시간 AR 내비게이션을 제공하는 방법",
//!         "session-1",
//!     ));
//!     while let Some(event) = events.next().await {
//!         print!("{}", event.to_sse());
//!     }
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod expansion;
pub mod grading;
pub mod history;
pub mod index;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod ratelimit;
pub mod rerank;
pub mod retrieval;
pub mod retry;
pub mod sandbox;
pub mod types;
pub mod util;

// Re-export commonly used types
pub use analysis::Analyst;
pub use config::{PipelineConfig, ReasoningConfig};
pub use embeddings::{EmbeddingService, RemoteEmbeddingService};
pub use error::{PipelineError, Result};
pub use events::PipelineEvent;
pub use expansion::QueryExpander;
pub use grading::{Grader, GradingOutcome};
pub use history::{HistorySink, MemoryHistory};
pub use index::{RemoteVectorIndex, SparseEncoder, VectorIndex};
pub use llm::{AnthropicClient, CompletionModel, CompletionRequest};
pub use pipeline::{Collaborators, Pipeline, RunRequest};
pub use ratelimit::RateLimiter;
pub use rerank::{LazyCrossEncoder, PassthroughReranker, Reranker};
pub use retrieval::HybridRetriever;
pub use sandbox::{sanitize, SandboxedIdea};
pub use types::{
    AnalysisReport, Candidate, CompletedRun, ExpandedQuery, FilterStats, GradingResponse,
    PatentId, QueryKind, RiskLevel, TopPatent,
};
