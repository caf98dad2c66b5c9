//! Query expansion: hypothetical claim drafting and multi-query paraphrases
//!
//! Expansion failures are never fatal. Each operation degrades to the
//! sanitized idea text so that retrieval always has at least one query to
//! run, and the degradation is visible in the logs.

use crate::error::Result;
use crate::llm::{CompletionModel, CompletionRequest};
use crate::sandbox::SandboxedIdea;
use crate::types::{ExpandedQuery, QueryKind};
use crate::util::fingerprint;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-call budget for expansion calls; tighter than the client-wide
/// timeout because a slow expansion delays every downstream stage.
const EXPANSION_TIMEOUT: Duration = Duration::from_secs(30);

const CLAIM_SYSTEM_PROMPT: &str = "You draft patent claims. Given an invention idea, write ONE \
plausible independent claim in the formal style of a granted patent, in the idea's language. \
Output the claim text only, no preamble and no numbering.";

const MULTI_QUERY_SYSTEM_PROMPT: &str = "You generate search queries for a patent database. \
Rephrase the given invention idea into lexically diverse search queries that use different \
technical vocabulary. Respond with a JSON array of strings only.";

pub struct QueryExpander {
    llm: Arc<dyn CompletionModel>,
    model: String,
    multi_query_n: usize,
}

impl QueryExpander {
    pub fn new(llm: Arc<dyn CompletionModel>, model: impl Into<String>, multi_query_n: usize) -> Self {
        Self {
            llm,
            model: model.into(),
            multi_query_n,
        }
    }

    /// The full query set handed to retrieval: the hypothetical claim
    /// plus the paraphrases. Fingerprints of every query are logged.
    pub async fn expand(&self, idea: &SandboxedIdea) -> Vec<ExpandedQuery> {
        let mut queries = vec![self.hypothetical_claim(idea).await];
        queries.extend(self.multi_queries(idea).await);

        for query in &queries {
            debug!(
                kind = %query.kind.label(),
                fingerprint = %fingerprint(&query.text),
                "expanded query"
            );
        }
        queries
    }

    /// HyDE: draft a synthetic independent claim to close the vocabulary
    /// gap between lay phrasing and patent language. Falls back to the
    /// idea text on any failure.
    pub async fn hypothetical_claim(&self, idea: &SandboxedIdea) -> ExpandedQuery {
        let request = CompletionRequest::new(
            &self.model,
            format!("Invention idea:\n{}\n\nDraft the independent claim.", idea.wrap()),
        )
        .with_system(CLAIM_SYSTEM_PROMPT)
        .with_max_tokens(512);

        match tokio::time::timeout(EXPANSION_TIMEOUT, self.llm.complete(request)).await {
            Ok(Ok(claim)) if !claim.trim().is_empty() => {
                ExpandedQuery::new(claim.trim(), QueryKind::HypotheticalClaim)
            }
            Ok(Ok(_)) => {
                warn!("hypothetical claim came back empty, using original idea");
                ExpandedQuery::new(idea.text(), QueryKind::Original)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "hypothetical claim generation failed, using original idea");
                ExpandedQuery::new(idea.text(), QueryKind::Original)
            }
            Err(_) => {
                warn!("hypothetical claim generation timed out, using original idea");
                ExpandedQuery::new(idea.text(), QueryKind::Original)
            }
        }
    }

    /// N paraphrases optimized for lexical diversity. Falls back to the
    /// idea text on any failure.
    pub async fn multi_queries(&self, idea: &SandboxedIdea) -> Vec<ExpandedQuery> {
        let request = CompletionRequest::new(
            &self.model,
            format!(
                "Invention idea:\n{}\n\nGenerate {} diverse search queries.",
                idea.wrap(),
                self.multi_query_n
            ),
        )
        .with_system(MULTI_QUERY_SYSTEM_PROMPT)
        .with_max_tokens(512);

        let response = match tokio::time::timeout(EXPANSION_TIMEOUT, self.llm.complete(request)).await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "multi-query generation failed, using original idea");
                return vec![ExpandedQuery::new(idea.text(), QueryKind::Original)];
            }
            Err(_) => {
                warn!("multi-query generation timed out, using original idea");
                return vec![ExpandedQuery::new(idea.text(), QueryKind::Original)];
            }
        };

        match parse_query_array(&response, self.multi_query_n) {
            Ok(texts) => texts
                .into_iter()
                .enumerate()
                .map(|(index, text)| ExpandedQuery::new(text, QueryKind::Paraphrase { index }))
                .collect(),
            Err(e) => {
                warn!(error = %e, "multi-query response unparseable, using original idea");
                vec![ExpandedQuery::new(idea.text(), QueryKind::Original)]
            }
        }
    }
}

/// Extract up to `n` non-empty strings from a JSON array response,
/// tolerating surrounding prose or code fences.
fn parse_query_array(response: &str, n: usize) -> Result<Vec<String>> {
    let start = response.find('[');
    let end = response.rfind(']');
    let slice = match (start, end) {
        (Some(s), Some(e)) if e > s => &response[s..=e],
        _ => {
            return Err(crate::error::PipelineError::MalformedResponse(
                "no JSON array in multi-query response".to_string(),
            ))
        }
    };

    let parsed: Vec<String> = serde_json::from_str(slice)?;
    let queries: Vec<String> = parsed
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(n)
        .collect();

    if queries.is_empty() {
        return Err(crate::error::PipelineError::MalformedResponse(
            "multi-query response contained no usable queries".to_string(),
        ));
    }
    Ok(queries)
}
