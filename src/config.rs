//! Pipeline configuration
//!
//! All configuration is resolved exactly once at process start: defaults,
//! then an optional `priorart.toml`, then environment variables with the
//! `PRIORART__` prefix (double underscore as section separator, e.g.
//! `PRIORART__REASONING__MODEL`). Secrets arrive through the environment
//! at bootstrap; nothing reads the environment after construction and
//! nothing reads secrets from disk at runtime.

use crate::error::{PipelineError, Result};
use serde::Deserialize;

/// Dense embedding provider (OpenAI-compatible `/embeddings` endpoint)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    /// Vector dimension; must match the index schema
    pub dim: usize,
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dim: 1536,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Primary reasoning model (claim drafting, grading, streamed analysis)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub api_key: String,
    pub model: String,
    /// Total request timeout, inherited by stream reads
    pub timeout_s: u64,
    pub connect_timeout_s: u64,
    pub max_tokens: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".to_string(),
            timeout_s: 60,
            connect_timeout_s: 10,
            max_tokens: 2048,
        }
    }
}

/// Model used only for the structured-parse pass of the analysis stage.
///
/// Defaults to the lightweight tier: parsing with the primary reasoning
/// model defeats a ~50% cost reduction and is a regression.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    pub model: String,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            model: "claude-haiku-4-5-20251001".to_string(),
        }
    }
}

/// Hybrid vector index (dense + sparse), populated offline and read-only
/// from the pipeline's point of view
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: String,
    pub namespace: String,
    /// Dense weight in score fusion: fused = alpha*dense + (1-alpha)*sparse
    pub hybrid_alpha: f32,
    /// Prebuilt sparse vocabulary (data-only JSON); empty disables sparse
    /// encoding and fusion degrades to dense-only
    pub vocab_path: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "patents".to_string(),
            api_key: String::new(),
            base_url: String::new(),
            namespace: "default".to_string(),
            hybrid_alpha: 0.7,
            vocab_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum candidates surviving fusion per round
    pub top_k: usize,
    /// Bound on concurrent per-query searches
    pub max_parallel_queries: usize,
    /// Number of paraphrases generated by the query expander
    pub multi_query_n: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            max_parallel_queries: 4,
            multi_query_n: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Candidates below this grading score never reach the analysis stage
    pub cutoff_threshold: f32,
    /// Mean grading score below which exactly one rewrite round fires
    pub rewrite_threshold: f32,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            cutoff_threshold: 0.3,
            rewrite_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Survivors included in the grounded context, by grading score
    pub context_top_n: usize,
    /// Sentence the analyst must emit instead of inventing a missing fact
    pub not_found_phrase: String,
    /// risk_score -> risk_level cutoffs (inclusive lower bounds)
    pub risk_medium_cutoff: u8,
    pub risk_high_cutoff: u8,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            context_top_n: 5,
            not_found_phrase: "해당 구성요소는 선행 특허에서 조회되지 않음".to_string(),
            risk_medium_cutoff: 40,
            risk_high_cutoff: 75,
        }
    }
}

/// Sliding-window quotas enforced before any pipeline work starts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub daily: usize,
    pub hourly: usize,
    pub per_minute_ip: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily: 50,
            hourly: 10,
            per_minute_ip: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json_line" for one JSON object per line, anything else for
    /// human-readable output
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json_line".to_string(),
        }
    }
}

/// Process-wide configuration, read once at bootstrap and read-only
/// thereafter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub embedding: EmbeddingConfig,
    pub reasoning: ReasoningConfig,
    pub parsing: ParsingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub grading: GradingConfig,
    pub analysis: AnalysisConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load configuration from defaults, an optional `priorart.toml`, and
    /// the environment.
    pub fn from_env() -> Result<Self> {
        Self::load(Some("priorart"))
    }

    fn load(file_stem: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(stem) = file_stem {
            builder = builder.add_source(config::File::with_name(stem).required(false));
        }
        let raw = builder
            .add_source(
                config::Environment::with_prefix("PRIORART")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let cfg: PipelineConfig = raw.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dim == 0 {
            return Err(PipelineError::Configuration(
                "embedding.dim must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.index.hybrid_alpha) {
            return Err(PipelineError::Configuration(format!(
                "index.hybrid_alpha must be in [0,1], got {}",
                self.index.hybrid_alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.grading.cutoff_threshold)
            || !(0.0..=1.0).contains(&self.grading.rewrite_threshold)
        {
            return Err(PipelineError::Configuration(
                "grading thresholds must be in [0,1]".to_string(),
            ));
        }
        if self.retrieval.max_parallel_queries == 0 {
            return Err(PipelineError::Configuration(
                "retrieval.max_parallel_queries must be positive".to_string(),
            ));
        }
        if self.analysis.risk_medium_cutoff >= self.analysis.risk_high_cutoff {
            return Err(PipelineError::Configuration(
                "analysis.risk_medium_cutoff must be below risk_high_cutoff".to_string(),
            ));
        }
        Ok(())
    }
}
