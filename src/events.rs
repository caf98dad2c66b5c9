//! Pipeline event stream consumed by the serving boundary
//!
//! `Pipeline::run` yields these events; the HTTP/SSE layer is a pure
//! sink. Terminal events (`complete`, `empty`, `error`) close the
//! stream.

use crate::error::PipelineError;
use crate::types::AnalysisReport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Stage transition with overall percentage
    Progress { percent: u8, message: String },
    /// One text chunk from the streamed analysis
    StreamToken { text: String },
    /// Successful run with the typed report
    Complete { result: AnalysisReport },
    /// No prior art survived the cutoff (after the rewrite round)
    Empty {},
    /// Terminal failure with a stable code
    Error { code: String, message: String },
}

impl PipelineEvent {
    pub fn progress(percent: u8, message: impl Into<String>) -> Self {
        PipelineEvent::Progress {
            percent,
            message: message.into(),
        }
    }

    pub fn stream_token(text: impl Into<String>) -> Self {
        PipelineEvent::StreamToken { text: text.into() }
    }

    pub fn complete(result: AnalysisReport) -> Self {
        PipelineEvent::Complete { result }
    }

    pub fn empty() -> Self {
        PipelineEvent::Empty {}
    }

    /// Build the terminal error event from a pipeline error, using its
    /// stable code.
    pub fn error(err: &PipelineError) -> Self {
        PipelineEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// SSE event name
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Progress { .. } => "progress",
            PipelineEvent::StreamToken { .. } => "stream_token",
            PipelineEvent::Complete { .. } => "complete",
            PipelineEvent::Empty {} => "empty",
            PipelineEvent::Error { .. } => "error",
        }
    }

    /// Terminal events close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::Complete { .. } | PipelineEvent::Empty {} | PipelineEvent::Error { .. }
        )
    }

    /// Wire format when bridged to Server-Sent Events.
    pub fn to_sse(&self) -> String {
        format!(
            "event: {}\ndata: {}\n\n",
            self.kind(),
            serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
        )
    }
}
