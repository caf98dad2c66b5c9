//! Relevance grading and the single rewrite round
//!
//! One reasoning-model call grades every candidate against the frozen
//! rubric; the cutoff decides who reaches the analysis stage and the mean
//! score decides whether the pipeline spends its one rewrite. Cutoff
//! statistics are computed here exactly once and logged through the one
//! shared helper; the analysis stage reuses the same value under its own
//! stage label instead of recomputing.

use crate::error::{PipelineError, Result};
use crate::llm::{CompletionModel, CompletionRequest};
use crate::sandbox::SandboxedIdea;
use crate::types::{
    Candidate, ExpandedQuery, FilterStats, GradingEntry, GradingResponse, QueryKind,
};
use crate::util::{extract_json_object, truncate_chars};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Frozen grading rubric. The anchors are part of the pipeline contract:
/// scores are comparable across runs only because these do not move.
const RUBRIC: &str = "\
Score each patent's relevance to the idea on this scale:
- 0.0 = unrelated domain
- 0.3 = shared domain but no overlapping elements
- 0.7 = overlapping elements with substantive differences
- 1.0 = near-identical solution";

const GRADING_SYSTEM_PROMPT: &str = "\
You grade how relevant retrieved patents are to an invention idea. \
Use ONLY the information provided; do not rely on outside knowledge. \
If the provided text is insufficient to judge a patent, give it a low \
score and write exactly \"information_not_found\" as the reason instead \
of speculating. For every score, give a one-sentence justification that \
cites the patent's publication number. \
Respond with JSON only: \
{\"results\": [{\"publication_number\": \"...\", \"score\": 0.0, \"reason\": \"...\"}]}";

const REWRITE_SYSTEM_PROMPT: &str = "\
You improve patent search queries. The previous queries retrieved mostly \
irrelevant patents. Write ONE new search query that targets the idea's \
distinctive technical elements and avoids the vocabulary that attracted \
the irrelevant results. Output the query text only.";

/// Emit the cutoff statistics through the single shared log helper.
///
/// INFO for a filter ratio at or below 80%, WARNING above, with a
/// companion `high_cutoff_ratio_warning` record so dashboards can alert
/// on retrieval quality collapses without parsing ratios.
pub fn log_filter_stats(event: &'static str, stage: Option<&str>, stats: &FilterStats) {
    let high = stats.filter_ratio_pct > 80.0;
    match (stage, high) {
        (Some(stage), true) => warn!(
            event = event,
            stage = stage,
            before_filter = stats.before_filter,
            after_filter = stats.after_filter,
            filtered_out = stats.filtered_out,
            filter_ratio_pct = stats.filter_ratio_pct,
            threshold = stats.threshold,
            "cutoff filtered most candidates"
        ),
        (Some(stage), false) => info!(
            event = event,
            stage = stage,
            before_filter = stats.before_filter,
            after_filter = stats.after_filter,
            filtered_out = stats.filtered_out,
            filter_ratio_pct = stats.filter_ratio_pct,
            threshold = stats.threshold,
            "cutoff filter applied"
        ),
        (None, true) => warn!(
            event = event,
            before_filter = stats.before_filter,
            after_filter = stats.after_filter,
            filtered_out = stats.filtered_out,
            filter_ratio_pct = stats.filter_ratio_pct,
            threshold = stats.threshold,
            "cutoff filtered most candidates"
        ),
        (None, false) => info!(
            event = event,
            before_filter = stats.before_filter,
            after_filter = stats.after_filter,
            filtered_out = stats.filtered_out,
            filter_ratio_pct = stats.filter_ratio_pct,
            threshold = stats.threshold,
            "cutoff filter applied"
        ),
    }
    if high {
        warn!(
            event = "high_cutoff_ratio_warning",
            filter_ratio_pct = stats.filter_ratio_pct,
            "more than 80% of candidates fell below the cutoff"
        );
    }
}

/// One grading round's outcome: the regraded candidates plus the
/// response carried forward to the analysis stage.
#[derive(Debug, Clone)]
pub struct GradingOutcome {
    pub graded: Vec<Candidate>,
    pub response: GradingResponse,
}

impl GradingOutcome {
    /// Survivors above the cutoff, ordered by grading score descending.
    /// This is the only place the survivor set is derived.
    pub fn survivors(&self, cutoff: f32) -> Vec<Candidate> {
        let mut survivors: Vec<Candidate> = self
            .graded
            .iter()
            .filter(|c| c.grading_score.unwrap_or(0.0) >= cutoff)
            .cloned()
            .collect();
        survivors.sort_by(|a, b| {
            b.grading_score
                .unwrap_or(0.0)
                .total_cmp(&a.grading_score.unwrap_or(0.0))
        });
        survivors
    }

    /// Outcome representing a round with nothing to grade (retrieval
    /// exhausted); downstream treats it as all-below-cutoff.
    pub fn empty(cutoff: f32) -> Self {
        Self {
            graded: Vec::new(),
            response: GradingResponse {
                results: Vec::new(),
                average_score: 0.0,
                filter_stats: FilterStats::compute(0, 0, cutoff),
            },
        }
    }
}

#[derive(Deserialize)]
struct WireGrading {
    results: Vec<WireGradingEntry>,
}

#[derive(Deserialize)]
struct WireGradingEntry {
    publication_number: String,
    score: f32,
    #[serde(default)]
    reason: String,
}

pub struct Grader {
    llm: Arc<dyn CompletionModel>,
    model: String,
    cutoff: f32,
    rewrite_threshold: f32,
}

impl Grader {
    pub fn new(
        llm: Arc<dyn CompletionModel>,
        model: impl Into<String>,
        cutoff: f32,
        rewrite_threshold: f32,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            cutoff,
            rewrite_threshold,
        }
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff
    }

    /// Grade every candidate in one call. Candidates the model omits are
    /// scored 0.0 so the cutoff can never be bypassed by silence.
    pub async fn grade(
        &self,
        idea: &SandboxedIdea,
        candidates: &[Candidate],
    ) -> Result<GradingOutcome> {
        if candidates.is_empty() {
            return Ok(GradingOutcome::empty(self.cutoff));
        }

        let request = CompletionRequest::new(&self.model, self.grading_prompt(idea, candidates))
            .with_system(GRADING_SYSTEM_PROMPT)
            .with_max_tokens(1536);

        let response_text = self.llm.complete(request).await?;
        let wire = parse_grading(&response_text)?;

        let mut by_id: HashMap<&str, &WireGradingEntry> = HashMap::new();
        for entry in &wire.results {
            by_id.insert(entry.publication_number.as_str(), entry);
        }

        let mut graded = Vec::with_capacity(candidates.len());
        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let (score, reason) = match by_id.get(candidate.publication_number.as_str()) {
                Some(entry) => (entry.score.clamp(0.0, 1.0), entry.reason.clone()),
                None => {
                    warn!(
                        publication_number = %candidate.publication_number,
                        "grader omitted candidate, scoring 0.0"
                    );
                    (0.0, "information_not_found".to_string())
                }
            };

            let mut candidate = candidate.clone();
            candidate.grading_score = Some(score);
            results.push(GradingEntry {
                publication_number: candidate.publication_number.clone(),
                score,
                reason,
            });
            graded.push(candidate);
        }

        let average_score =
            results.iter().map(|r| r.score).sum::<f32>() / results.len().max(1) as f32;
        let after = graded
            .iter()
            .filter(|c| c.grading_score.unwrap_or(0.0) >= self.cutoff)
            .count();
        let filter_stats = FilterStats::compute(graded.len(), after, self.cutoff);
        log_filter_stats("cutoff_filter", None, &filter_stats);

        Ok(GradingOutcome {
            graded,
            response: GradingResponse {
                results,
                average_score,
                filter_stats,
            },
        })
    }

    /// Whether the one permitted rewrite round should fire.
    pub fn should_rewrite(&self, response: &GradingResponse) -> bool {
        response.average_score < self.rewrite_threshold
    }

    /// Produce the rewritten query for the second retrieval round.
    /// Falls back to the idea text on any failure so the round can still
    /// run.
    pub async fn rewrite_query(
        &self,
        idea: &SandboxedIdea,
        previous_queries: &[ExpandedQuery],
        low_scoring: &[Candidate],
    ) -> ExpandedQuery {
        let previous: Vec<String> = previous_queries
            .iter()
            .map(|q| format!("- [{}] {}", q.kind.label(), truncate_chars(&q.text, 120)))
            .collect();
        let noise: Vec<String> = low_scoring
            .iter()
            .take(5)
            .map(|c| format!("- {} ({})", truncate_chars(&c.title, 80), c.publication_number))
            .collect();

        let prompt = format!(
            "Invention idea:\n{}\n\nPrevious queries:\n{}\n\nIrrelevant patents they retrieved:\n{}\n\nWrite the improved query.",
            idea.wrap(),
            previous.join("\n"),
            noise.join("\n"),
        );
        let request = CompletionRequest::new(&self.model, prompt)
            .with_system(REWRITE_SYSTEM_PROMPT)
            .with_max_tokens(256);

        match self.llm.complete(request).await {
            Ok(text) if !text.trim().is_empty() => {
                ExpandedQuery::new(text.trim(), QueryKind::Rewritten)
            }
            Ok(_) => {
                warn!("rewrite came back empty, falling back to original idea");
                ExpandedQuery::new(idea.text(), QueryKind::Rewritten)
            }
            Err(e) => {
                warn!(error = %e, "rewrite failed, falling back to original idea");
                ExpandedQuery::new(idea.text(), QueryKind::Rewritten)
            }
        }
    }

    fn grading_prompt(&self, idea: &SandboxedIdea, candidates: &[Candidate]) -> String {
        let rendered: Vec<String> = candidates.iter().map(render_candidate).collect();
        format!(
            "{}\n\nInvention idea:\n{}\n\nPatents:\n{}",
            RUBRIC,
            idea.wrap(),
            rendered.join("\n\n")
        )
    }
}

/// Compact candidate rendering for the grading prompt
fn render_candidate(candidate: &Candidate) -> String {
    let mut block = format!(
        "[{}]\nTitle: {}\nAbstract: {}",
        candidate.publication_number,
        truncate_chars(&candidate.title, 120),
        truncate_chars(&candidate.abstract_text, 400),
    );
    if let Some(claims) = &candidate.claims {
        block.push_str(&format!("\nClaims: {}", truncate_chars(claims, 300)));
    }
    block
}

fn parse_grading(response: &str) -> Result<WireGrading> {
    let json = extract_json_object(response).ok_or_else(|| {
        PipelineError::MalformedResponse("no JSON object in grading response".to_string())
    })?;
    serde_json::from_str(json)
        .map_err(|e| PipelineError::MalformedResponse(format!("grading response: {}", e)))
}
