//! Structured logging bootstrap
//!
//! Emits one JSON object per line with timestamp, level, target, message,
//! and the structured `event` fields the pipeline attaches (cutoff_filter,
//! rewrite_triggered, injection_detected, ...). Initialized once by the
//! binary; the library only emits `tracing` records.

use crate::config::LoggingConfig;
use crate::error::{PipelineError, Result};
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber from configuration.
///
/// `RUST_LOG` overrides the configured level when set. Returns an error if
/// a subscriber is already installed.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .map_err(|e| PipelineError::Configuration(format!("invalid log level: {}", e)))?;

    let result = if cfg.format == "json_line" {
        tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| PipelineError::Configuration(format!("logging init failed: {}", e)))
}
