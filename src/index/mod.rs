//! Hybrid vector index access
//!
//! The patent corpus is ingested offline; at runtime the index is a
//! read-only dependency answering hybrid (dense + sparse) queries. The
//! [`VectorIndex`] trait is the seam the retriever depends on; the HTTP
//! implementation lives in [`remote`], the sparse query encoder in
//! [`sparse`].

pub mod remote;
pub mod sparse;

pub use remote::RemoteVectorIndex;
pub use sparse::SparseEncoder;

use crate::error::Result;
use crate::types::{PatentId, PatentMetadata};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sparse query encoding: parallel index/value arrays, indices ascending
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// One index hit: raw dense and sparse scores plus patent metadata.
/// Fusion happens client-side in the retriever.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexMatch {
    pub publication_number: PatentId,
    pub dense_score: f32,
    #[serde(default)]
    pub sparse_score: f32,
    pub metadata: PatentMetadata,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Execute one hybrid query. `ipc_filters` restricts matches to
    /// patents whose IPC codes start with one of the given prefixes; an
    /// empty slice means no filter.
    async fn hybrid_query(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        top_k: usize,
        ipc_filters: &[String],
    ) -> Result<Vec<IndexMatch>>;
}
