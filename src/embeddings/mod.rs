//! Dense embedding generation for hybrid retrieval
//!
//! The pipeline only ever embeds queries (the corpus is embedded
//! offline), so a single remote provider behind the [`EmbeddingService`]
//! trait is sufficient; tests substitute a deterministic fake.

pub mod remote;

pub use remote::RemoteEmbeddingService;

use crate::error::Result;
use async_trait::async_trait;

/// Embedding service trait defining required operations
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batched)
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embedding dimensionality (must match the index schema)
    fn dimensions(&self) -> usize;

    /// Model name
    fn model_name(&self) -> &str;
}
