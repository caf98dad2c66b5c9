//! BM25-style sparse query encoding
//!
//! The vocabulary is built offline together with the index and shipped as
//! a data-only JSON file (`{token: {index, idf}}`). Code-execution-capable
//! serialization formats are deliberately not accepted here.

use crate::error::{PipelineError, Result};
use crate::index::SparseVector;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// BM25 term-frequency saturation constant
const K1: f32 = 1.2;

#[derive(Debug, Clone, Deserialize)]
struct VocabEntry {
    index: u32,
    idf: f32,
}

/// Sparse encoder over a prebuilt vocabulary
#[derive(Debug)]
pub struct SparseEncoder {
    vocab: HashMap<String, VocabEntry>,
}

impl SparseEncoder {
    /// Load the vocabulary from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!(
                "cannot read sparse vocabulary {}: {}",
                path.display(),
                e
            ))
        })?;
        let vocab: HashMap<String, VocabEntry> = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Configuration(format!(
                "malformed sparse vocabulary {}: {}",
                path.display(),
                e
            ))
        })?;

        info!(tokens = vocab.len(), path = %path.display(), "loaded sparse vocabulary");
        Ok(Self { vocab })
    }

    /// Encoder with no vocabulary: every encoding is empty, which
    /// degrades fusion to dense-only scoring.
    pub fn disabled() -> Self {
        Self {
            vocab: HashMap::new(),
        }
    }

    /// Encode a query into tf-saturated idf weights. Tokens outside the
    /// vocabulary are dropped; indices come back ascending as the index
    /// service requires.
    pub fn encode(&self, text: &str) -> SparseVector {
        if self.vocab.is_empty() {
            return SparseVector::default();
        }

        let mut term_counts: HashMap<&str, usize> = HashMap::new();
        let lowered = text.to_lowercase();
        for token in tokenize(&lowered) {
            if self.vocab.contains_key(token) {
                *term_counts.entry(token).or_insert(0) += 1;
            }
        }

        let mut pairs: Vec<(u32, f32)> = term_counts
            .into_iter()
            .map(|(token, tf)| {
                let entry = &self.vocab[token];
                let tf = tf as f32;
                let weight = entry.idf * (tf * (K1 + 1.0)) / (tf + K1);
                (entry.index, weight)
            })
            .collect();
        pairs.sort_by_key(|(index, _)| *index);

        SparseVector {
            indices: pairs.iter().map(|(i, _)| *i).collect(),
            values: pairs.iter().map(|(_, v)| *v).collect(),
        }
    }
}

/// Split on anything that is not alphanumeric. Hangul and Han characters
/// count as alphanumeric, so Korean patent text tokenizes on whitespace
/// and punctuation like the offline vocabulary builder does.
fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}
