//! Core data types for the prior-art analysis pipeline
//!
//! All per-run values (queries, candidates, grading results, reports) are
//! immutable between stages: each stage produces a new value and never
//! mutates another stage's output in place.

use serde::{Deserialize, Serialize};

/// Patent publication number, the primary key across the pipeline
///
/// Wraps the registry string (e.g. "KR1020190012345A") to avoid mixing it
/// with other string identifiers in the system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatentId(pub String);

impl PatentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PatentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provenance of a derived search query
///
/// Carried through retrieval so that fusion can record which expansions
/// surfaced a candidate, and so that logs can name the failing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum QueryKind {
    /// The sanitized idea text itself
    Original,
    /// Synthetic independent claim generated from the idea (HyDE)
    HypotheticalClaim,
    /// i-th lexical-diversity paraphrase
    Paraphrase { index: usize },
    /// Single rewrite produced after a low-scoring grading round
    Rewritten,
}

impl QueryKind {
    /// Short label used in structured log fields
    pub fn label(&self) -> String {
        match self {
            QueryKind::Original => "original".to_string(),
            QueryKind::HypotheticalClaim => "hypothetical_claim".to_string(),
            QueryKind::Paraphrase { index } => format!("paraphrase_{}", index),
            QueryKind::Rewritten => "rewritten".to_string(),
        }
    }
}

/// A search query with its provenance tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandedQuery {
    pub text: String,
    pub kind: QueryKind,
}

impl ExpandedQuery {
    pub fn new(text: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// Patent passage metadata as stored in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatentMetadata {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub claims: Option<String>,
    #[serde(default)]
    pub ipc_codes: Vec<String>,
}

/// A retrieved patent passage with scores accumulated across stages
///
/// `publication_number` is unique within a single pipeline run: on
/// collision across queries the entry with the highest fused score is
/// kept and all source queries are recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub publication_number: PatentId,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub claims: Option<String>,
    #[serde(default)]
    pub ipc_codes: Vec<String>,

    pub dense_score: f32,
    pub sparse_score: f32,
    pub fused_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grading_score: Option<f32>,

    /// Queries that surfaced this candidate (deduplicated)
    #[serde(default)]
    pub source_queries: Vec<QueryKind>,
}

/// One grader verdict for a candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingEntry {
    pub publication_number: PatentId,
    pub score: f32,
    pub reason: String,
}

/// Cutoff statistics computed exactly once per filtering pass
///
/// No downstream component recomputes these; the analysis stage logs the
/// same value under its own stage label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub before_filter: usize,
    pub after_filter: usize,
    pub filtered_out: usize,
    pub filter_ratio_pct: f32,
    pub threshold: f32,
}

impl FilterStats {
    /// Compute the stats for a filtering pass.
    ///
    /// `filter_ratio_pct` is rounded to one decimal place; an empty input
    /// yields a 0% ratio rather than a division by zero.
    pub fn compute(before: usize, after: usize, threshold: f32) -> Self {
        let filtered_out = before.saturating_sub(after);
        let ratio = if before == 0 {
            0.0
        } else {
            (filtered_out as f32 / before as f32 * 1000.0).round() / 10.0
        };
        Self {
            before_filter: before,
            after_filter: after,
            filtered_out,
            filter_ratio_pct: ratio,
            threshold,
        }
    }
}

/// Full grading outcome for one round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResponse {
    pub results: Vec<GradingEntry>,
    pub average_score: f32,
    pub filter_stats: FilterStats,
}

/// Infringement-risk bucket, monotone in `risk_score`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Bucket a 0-100 risk score using the configured cutoffs.
    pub fn from_score(score: u8, medium_cutoff: u8, high_cutoff: u8) -> Self {
        if score >= high_cutoff {
            RiskLevel::High
        } else if score >= medium_cutoff {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "Low"),
            RiskLevel::Medium => write!(f, "Medium"),
            RiskLevel::High => write!(f, "High"),
        }
    }
}

/// One cited patent in the final report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPatent {
    pub id: PatentId,
    /// Similarity to the idea on a 0-100 scale
    pub similarity: u8,
    pub title: String,
    pub summary: String,
}

/// Typed analysis report extracted from the streamed prose
///
/// Invariants: `similar_count == top_patents.len()`; every cited id is a
/// member of the grading survivor set for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub similar_count: usize,
    pub uniqueness: String,
    pub top_patents: Vec<TopPatent>,
}

impl AnalysisReport {
    /// Well-formed empty report used when parsing fails or no prior art
    /// was found. Callers never see a raised exception from the parse
    /// step; they see this value plus one WARNING log.
    pub fn empty() -> Self {
        Self {
            risk_level: RiskLevel::Low,
            risk_score: 0,
            similar_count: 0,
            uniqueness: String::new(),
            top_patents: Vec::new(),
        }
    }
}

/// Record handed to the optional history collaborator after a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRun {
    pub session_id: String,
    pub idea: String,
    pub report: AnalysisReport,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
