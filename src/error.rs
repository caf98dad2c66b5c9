//! Error types for the prior-art analysis pipeline
//!
//! Errors are grouped by kind rather than by transport: input errors are
//! surfaced to the caller with a stable code and never retried, upstream
//! transient errors are the only retryable class, and pipeline-soft
//! conditions (empty retrieval, failed parse) never raise at all.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Idea text exceeds the maximum length after trimming
    #[error("input exceeds {max} characters (got {len})")]
    InputTooLong { len: usize, max: usize },

    /// Injection pattern matched against the raw idea text
    #[error("prompt injection detected in input")]
    PromptInjection,

    /// Session or client exceeded a sliding-window quota
    #[error("rate limited until {reset_time}")]
    RateLimited { reset_time: DateTime<Utc> },

    /// Upstream returned 429 (transient, retryable)
    #[error("upstream rate limit: {0}")]
    RateLimit(String),

    /// Request or stream read timed out (transient, retryable)
    #[error("upstream timeout: {0}")]
    Timeout(String),

    /// Connection to an upstream dependency failed (transient, retryable)
    #[error("connection failed: {0}")]
    Connect(String),

    /// Transient retries exhausted
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Auth/config failure from an upstream dependency (not retried)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every retrieval query failed; treated downstream as all-below-cutoff
    #[error("retrieval exhausted: every query failed")]
    RetrievalExhausted,

    /// Upstream returned a payload the pipeline cannot interpret
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected failure inside a stage
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Stable code surfaced through terminal `error` events.
    ///
    /// The boundary layer maps codes to user-visible text; the pipeline
    /// itself only guarantees code stability.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InputTooLong { .. } => "InputTooLong",
            PipelineError::PromptInjection => "PromptInjection",
            PipelineError::RateLimited { .. } => "RateLimited",
            PipelineError::RateLimit(_)
            | PipelineError::Timeout(_)
            | PipelineError::Connect(_)
            | PipelineError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            PipelineError::Configuration(_) => "ConfigurationError",
            PipelineError::RetrievalExhausted => "RetrievalExhausted",
            PipelineError::MalformedResponse(_) | PipelineError::Serialization(_) => {
                "UpstreamUnavailable"
            }
            PipelineError::Internal(_) => "InternalError",
        }
    }

    /// Whether this error belongs to the whitelisted transient class.
    ///
    /// Retries are scoped to exactly these kinds; retrying anything else
    /// would mask validation and injection errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::RateLimit(_) | PipelineError::Timeout(_) | PipelineError::Connect(_)
        )
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Timeout(err.to_string())
        } else if err.is_connect() {
            PipelineError::Connect(err.to_string())
        } else {
            PipelineError::UpstreamUnavailable(err.to_string())
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Internal(err.to_string())
    }
}
