//! Optional history collaborator interface
//!
//! Persistence itself lives outside the pipeline; this is the seam a
//! storage backend plugs into. Sink failures are logged and never affect
//! the event stream of the run that produced the record.

use crate::error::Result;
use crate::types::CompletedRun;
use async_trait::async_trait;
use std::sync::Mutex;

#[async_trait]
pub trait HistorySink: Send + Sync {
    /// Record one completed run.
    async fn record(&self, run: CompletedRun) -> Result<()>;
}

/// In-memory sink, useful for tests and the CLI's session summary
#[derive(Default)]
pub struct MemoryHistory {
    runs: Mutex<Vec<CompletedRun>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> Vec<CompletedRun> {
        self.runs.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record(&self, run: CompletedRun) -> Result<()> {
        self.runs
            .lock()
            .map_err(|e| crate::error::PipelineError::Internal(format!("history poisoned: {}", e)))?
            .push(run);
        Ok(())
    }
}
