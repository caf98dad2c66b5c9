//! Grounded critical analysis over grading survivors
//!
//! The analyst streams prose from the primary reasoning model under a
//! strict grounding contract, then a second, cheaper model extracts the
//! typed report from the finished stream. The parse step is infallible
//! from the caller's point of view: every failure path degrades to the
//! well-formed empty report plus one WARNING log.

use crate::config::AnalysisConfig;
use crate::error::{PipelineError, Result};
use crate::grading::log_filter_stats;
use crate::llm::{CompletionModel, CompletionRequest};
use crate::sandbox::SandboxedIdea;
use crate::types::{AnalysisReport, Candidate, FilterStats, PatentId, RiskLevel, TopPatent};
use crate::util::{extract_json_object, truncate_chars};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

const PARSE_SYSTEM_PROMPT: &str = "\
You convert a prior-art analysis report into JSON. Extract ONLY \
information present in the supplied report text; do not add facts, do \
not re-analyze. Respond with JSON only: \
{\"risk_score\": 0-100, \"uniqueness\": \"...\", \"top_patents\": \
[{\"id\": \"...\", \"similarity\": 0-100, \"title\": \"...\", \"summary\": \"...\"}]}";

pub struct Analyst {
    llm: Arc<dyn CompletionModel>,
    reasoning_model: String,
    parsing_model: String,
    cfg: AnalysisConfig,
}

impl Analyst {
    pub fn new(
        llm: Arc<dyn CompletionModel>,
        reasoning_model: impl Into<String>,
        parsing_model: impl Into<String>,
        cfg: AnalysisConfig,
    ) -> Self {
        Self {
            llm,
            reasoning_model: reasoning_model.into(),
            parsing_model: parsing_model.into(),
            cfg,
        }
    }

    /// Stream the grounded critical analysis.
    ///
    /// The returned stream yields text chunks; a mid-stream transport
    /// failure yields exactly one `Err` item and ends (the client
    /// guarantees this), so the event loop never sees a raw transport
    /// exception.
    pub async fn analyze_stream(
        &self,
        idea: &SandboxedIdea,
        survivors: &[Candidate],
        stats: &FilterStats,
    ) -> Result<ReceiverStream<Result<String>>> {
        log_filter_stats("analysis_cutoff_filter", Some("critical_analysis_stream"), stats);

        let request = CompletionRequest::new(
            &self.reasoning_model,
            format!(
                "Invention idea:\n{}\n\nPrior-art context:\n{}",
                idea.wrap(),
                self.build_context(survivors)
            ),
        )
        .with_system(self.grounding_prompt())
        .with_max_tokens(2048);

        self.llm.stream(request).await
    }

    /// Extract the typed report from the completed stream text.
    ///
    /// Never raises: on any failure the caller receives the empty report
    /// and one WARNING with `event = "parse_failed"` records the
    /// degradation.
    pub async fn parse_to_structured(
        &self,
        streamed_text: &str,
        survivor_ids: &[PatentId],
        stats: &FilterStats,
    ) -> AnalysisReport {
        log_filter_stats("analysis_cutoff_filter", Some("critical_analysis"), stats);

        let request = CompletionRequest::new(
            &self.parsing_model,
            format!("Report text:\n{}", streamed_text),
        )
        .with_system(PARSE_SYSTEM_PROMPT)
        .with_max_tokens(1024);

        let raw = match self.llm.complete(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(event = "parse_failed", error = %e, "structured parse call failed");
                return AnalysisReport::empty();
            }
        };

        match self.build_report(&raw, survivor_ids) {
            Ok(report) => report,
            Err(e) => {
                warn!(event = "parse_failed", error = %e, "structured parse output unusable");
                AnalysisReport::empty()
            }
        }
    }

    fn build_report(&self, raw: &str, survivor_ids: &[PatentId]) -> Result<AnalysisReport> {
        let json = extract_json_object(raw).ok_or_else(|| {
            PipelineError::MalformedResponse("no JSON object in parse response".to_string())
        })?;
        let wire: WireReport = serde_json::from_str(json)
            .map_err(|e| PipelineError::MalformedResponse(format!("parse response: {}", e)))?;

        let known: HashSet<&str> = survivor_ids.iter().map(|id| id.as_str()).collect();
        let mut top_patents = Vec::new();
        for patent in wire.top_patents {
            if !known.contains(patent.id.as_str()) {
                // Grounding violation: the id was not in the survivor
                // set, so the citation is dropped rather than trusted.
                warn!(id = %patent.id, "parse cited a patent outside the survivor set, dropping");
                continue;
            }
            top_patents.push(TopPatent {
                id: PatentId::new(patent.id),
                similarity: clamp_percent(patent.similarity),
                title: patent.title,
                summary: patent.summary,
            });
        }

        let risk_score = clamp_percent(wire.risk_score);
        let report = AnalysisReport {
            risk_level: RiskLevel::from_score(
                risk_score,
                self.cfg.risk_medium_cutoff,
                self.cfg.risk_high_cutoff,
            ),
            risk_score,
            similar_count: top_patents.len(),
            uniqueness: wire.uniqueness,
            top_patents,
        };

        debug!(
            risk_score = report.risk_score,
            similar_count = report.similar_count,
            "structured report extracted"
        );
        Ok(report)
    }

    /// Grounding contract: citations mandatory, missing facts get the
    /// configured not-found sentence, fixed section order.
    fn grounding_prompt(&self) -> String {
        format!(
            "You are a patent attorney analyzing infringement risk for an invention idea, \
using ONLY the prior-art context provided. Rules: \
(1) cite [source: publication_number] for every factual claim about a patent; \
(2) if a required fact is absent from the context, write exactly \"{}\" and never invent it; \
(3) structure the analysis in exactly this order: \
## 유사성 분석 (similarity to each cited patent), \
## 침해 위험도 (overall risk with a 0-100 score), \
## 회피 설계 제안 (design-around suggestions). \
Write in the language of the invention idea.",
            self.cfg.not_found_phrase
        )
    }

    /// Markdown context of the top survivors by grading score.
    fn build_context(&self, survivors: &[Candidate]) -> String {
        survivors
            .iter()
            .take(self.cfg.context_top_n)
            .map(|c| {
                let mut block = format!(
                    "### {} ({})\n**Abstract**: {}",
                    c.publication_number,
                    c.title,
                    truncate_chars(&c.abstract_text, 800),
                );
                if let Some(claims) = &c.claims {
                    block.push_str(&format!("\n**Claims**: {}", truncate_chars(claims, 600)));
                }
                if let Some(score) = c.grading_score {
                    block.push_str(&format!("\n**Relevance**: {:.2}", score));
                }
                block
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Deserialize)]
struct WireReport {
    #[serde(default)]
    risk_score: f32,
    #[serde(default)]
    uniqueness: String,
    #[serde(default)]
    top_patents: Vec<WireTopPatent>,
}

#[derive(Deserialize)]
struct WireTopPatent {
    id: String,
    #[serde(default)]
    similarity: f32,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
}

fn clamp_percent(value: f32) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedLlm {
        responses: Mutex<Vec<Result<String>>>,
        models_seen: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn returning(responses: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                models_seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionModel for ScriptedLlm {
        async fn complete(&self, request: CompletionRequest) -> Result<String> {
            self.models_seen.lock().unwrap().push(request.model);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(PipelineError::Internal("script exhausted".to_string())))
        }

        async fn stream(
            &self,
            _request: CompletionRequest,
        ) -> Result<ReceiverStream<Result<String>>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(ReceiverStream::new(rx))
        }
    }

    fn analyst(llm: Arc<ScriptedLlm>) -> Analyst {
        Analyst::new(llm, "reasoning-model", "parsing-model", AnalysisConfig::default())
    }

    fn stats() -> FilterStats {
        FilterStats::compute(10, 3, 0.3)
    }

    #[tokio::test]
    async fn test_parse_builds_validated_report() {
        let llm = ScriptedLlm::returning(vec![Ok(r#"{
            "risk_score": 78,
            "uniqueness": "낮음",
            "top_patents": [
                {"id": "P1", "similarity": 85, "title": "t1", "summary": "s1"},
                {"id": "GHOST", "similarity": 99, "title": "t2", "summary": "s2"}
            ]
        }"#
        .to_string())]);
        let analyst = analyst(Arc::clone(&llm));

        let survivors = vec![PatentId::new("P1"), PatentId::new("P2")];
        let report = analyst
            .parse_to_structured("report text", &survivors, &stats())
            .await;

        // The uncited survivor stays absent, the ghost citation is dropped.
        assert_eq!(report.top_patents.len(), 1);
        assert_eq!(report.top_patents[0].id.as_str(), "P1");
        assert_eq!(report.similar_count, 1);
        assert_eq!(report.risk_score, 78);
        assert_eq!(report.risk_level, RiskLevel::High);

        // Cost contract: parsing goes to the parsing model.
        assert_eq!(llm.models_seen.lock().unwrap().as_slice(), ["parsing-model"]);
    }

    #[tokio::test]
    async fn test_parse_failure_returns_empty_report() {
        let llm = ScriptedLlm::returning(vec![Err(PipelineError::UpstreamUnavailable(
            "down".to_string(),
        ))]);
        let analyst = analyst(llm);

        let report = analyst
            .parse_to_structured("report text", &[PatentId::new("P1")], &stats())
            .await;
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert_eq!(report.risk_score, 0);
        assert!(report.top_patents.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_output_returns_empty_report() {
        let llm = ScriptedLlm::returning(vec![Ok("I refuse to answer in JSON".to_string())]);
        let analyst = analyst(llm);

        let report = analyst
            .parse_to_structured("report text", &[PatentId::new("P1")], &stats())
            .await;
        assert_eq!(report.risk_score, 0);
        assert!(report.top_patents.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_scores_clamped() {
        let llm = ScriptedLlm::returning(vec![Ok(
            r#"{"risk_score": 250, "uniqueness": "", "top_patents": [{"id": "P1", "similarity": -5, "title": "t", "summary": "s"}]}"#
                .to_string(),
        )]);
        let analyst = analyst(llm);

        let report = analyst
            .parse_to_structured("text", &[PatentId::new("P1")], &stats())
            .await;
        assert_eq!(report.risk_score, 100);
        assert_eq!(report.top_patents[0].similarity, 0);
    }

    #[test]
    fn test_context_limited_to_top_n() {
        let llm = ScriptedLlm::returning(vec![]);
        let analyst = analyst(llm);

        let survivors: Vec<Candidate> = (0..8)
            .map(|i| Candidate {
                publication_number: PatentId::new(format!("P{}", i)),
                title: format!("patent {}", i),
                abstract_text: "abstract".to_string(),
                claims: None,
                ipc_codes: vec![],
                dense_score: 0.5,
                sparse_score: 0.5,
                fused_score: 0.5,
                rerank_score: None,
                grading_score: Some(0.9),
                source_queries: vec![],
            })
            .collect();

        let context = analyst.build_context(&survivors);
        assert!(context.contains("P4"));
        assert!(!context.contains("P5"));
    }

    #[test]
    fn test_grounding_prompt_carries_not_found_phrase() {
        let llm = ScriptedLlm::returning(vec![]);
        let analyst = analyst(llm);
        assert!(analyst
            .grounding_prompt()
            .contains("해당 구성요소는 선행 특허에서 조회되지 않음"));
    }
}
