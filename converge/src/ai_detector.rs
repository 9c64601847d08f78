//! AI-judged convergence detection.
//!
//! Sends both snapshots plus pre-computed diff metrics to the supervisor
//! and demands a strict-JSON verdict. Low-confidence verdicts are rewritten
//! to "not converged" so an uncertain model never ends refinement early.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::artifact::{Artifact, ConvergenceDecision};
use crate::detector::ConvergenceDetector;
use crate::diff::{diff_lines, DiffOptions};
use crate::error::DetectorError;
use crate::supervisor::{parse_json, Supervisor};

/// Default confidence floor below which a verdict cannot end refinement.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.8;

const CONTENT_LIMIT: usize = 3000;
const CONTEXT_LIMIT: usize = 1000;

/// Supervisor-backed detector.
pub struct AiDetector {
    supervisor: std::sync::Arc<dyn Supervisor>,
    pub model: String,
    pub max_tokens: u32,
    pub min_confidence: f64,
}

/// The strict-JSON verdict schema the model must return.
#[derive(Debug, Deserialize)]
struct AiVerdict {
    converged: bool,
    confidence: f64,
    reasoning: String,
    #[allow(dead_code)]
    diff_size: DiffSize,
    #[allow(dead_code)]
    marginal: MarginalValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DiffSize {
    Minimal,
    Small,
    Moderate,
    Large,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MarginalValue {
    None,
    Low,
    Medium,
    High,
}

/// Cut `s` at a char boundary at or below `max` bytes, marking the cut.
fn truncate_marked(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[... truncated, {} of {} chars shown]",
        &s[..cut],
        cut,
        s.len()
    )
}

impl AiDetector {
    pub fn new(supervisor: std::sync::Arc<dyn Supervisor>, model: impl Into<String>) -> Self {
        Self {
            supervisor,
            model: model.into(),
            max_tokens: 1024,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, floor: f64) -> Self {
        self.min_confidence = floor;
        self
    }

    fn build_prompt(&self, current: &Artifact, previous: &Artifact) -> String {
        let stats = diff_lines(
            &previous.content,
            &current.content,
            &DiffOptions::default(),
        );
        format!(
            "You are judging whether iterative refinement of an AI-generated artifact \
             has converged, i.e. whether another pass would still add meaningful value.\n\n\
             Artifact type: {kind}\n\
             Diff metrics: {changed:.1} lines changed, {ratio:.1}% of the current version.\n\n\
             ## Context\n{context}\n\n\
             ## Previous version\n{previous}\n\n\
             ## Current version\n{current}\n\n\
             Respond with STRICT JSON ONLY using schema: \
             {{\"converged\":true|false,\"confidence\":0.0-1.0,\"reasoning\":\"...\",\
             \"diff_size\":\"minimal|small|moderate|large\",\
             \"marginal\":\"none|low|medium|high\"}}",
            kind = current.kind,
            changed = stats.lines_changed,
            ratio = stats.change_ratio() * 100.0,
            context = truncate_marked(&current.context, CONTEXT_LIMIT),
            previous = truncate_marked(&previous.content, CONTENT_LIMIT),
            current = truncate_marked(&current.content, CONTENT_LIMIT),
        )
    }
}

#[async_trait]
impl ConvergenceDetector for AiDetector {
    async fn check(
        &self,
        cancel: &CancellationToken,
        current: &Artifact,
        previous: &Artifact,
    ) -> Result<ConvergenceDecision, DetectorError> {
        let prompt = self.build_prompt(current, previous);
        let completion = self
            .supervisor
            .call(cancel, &prompt, &self.model, self.max_tokens)
            .await?;

        let verdict: AiVerdict = parse_json(&completion.text())?;
        let confidence = verdict.confidence.clamp(0.0, 1.0);

        // An uncertain "converged" must not stop the loop. Keep the reported
        // confidence for the audit trail; only the boolean is rewritten.
        let converged = if confidence < self.min_confidence {
            debug!(
                raw_converged = verdict.converged,
                confidence,
                floor = self.min_confidence,
                "Verdict below confidence floor, rewriting to not-converged"
            );
            false
        } else {
            verdict.converged
        };

        Ok(ConvergenceDecision {
            converged,
            confidence,
            reasoning: verdict.reasoning,
            strategy: "ai".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{Completion, SupervisorError};
    use std::sync::Arc;

    struct ScriptedSupervisor {
        reply: Result<String, String>,
    }

    #[async_trait]
    impl Supervisor for ScriptedSupervisor {
        async fn call(
            &self,
            _cancel: &CancellationToken,
            _prompt: &str,
            _model: &str,
            _max_tokens: u32,
        ) -> Result<Completion, SupervisorError> {
            match &self.reply {
                Ok(text) => Ok(Completion::from_text(text.clone())),
                Err(e) => Err(SupervisorError::Transport(e.clone())),
            }
        }
    }

    fn detector(reply: Result<&str, &str>) -> AiDetector {
        AiDetector::new(
            Arc::new(ScriptedSupervisor {
                reply: reply.map(String::from).map_err(String::from),
            }),
            "test-model",
        )
    }

    fn artifact(content: &str) -> Artifact {
        Artifact::new("analysis", content, "ctx")
    }

    #[tokio::test]
    async fn confident_verdict_passes_through() {
        let d = detector(Ok(
            r#"{"converged":true,"confidence":0.92,"reasoning":"stable","diff_size":"minimal","marginal":"none"}"#,
        ));
        let decision = d
            .check(&CancellationToken::new(), &artifact("a"), &artifact("b"))
            .await
            .unwrap();
        assert!(decision.converged);
        assert!((decision.confidence - 0.92).abs() < 1e-9);
        assert_eq!(decision.strategy, "ai");
    }

    #[tokio::test]
    async fn uncertain_verdict_is_rewritten() {
        let d = detector(Ok(
            r#"{"converged":true,"confidence":0.5,"reasoning":"maybe","diff_size":"small","marginal":"low"}"#,
        ));
        let decision = d
            .check(&CancellationToken::new(), &artifact("a"), &artifact("b"))
            .await
            .unwrap();
        assert!(!decision.converged);
        assert!((decision.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let d = detector(Err("backend down"));
        let err = d
            .check(&CancellationToken::new(), &artifact("a"), &artifact("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectorError::Ai(_)));
    }

    #[tokio::test]
    async fn malformed_reply_propagates_as_parse_error() {
        let d = detector(Ok("I think it looks pretty good!"));
        let err = d
            .check(&CancellationToken::new(), &artifact("a"), &artifact("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectorError::Ai(_)));
    }

    #[test]
    fn truncation_appends_marker() {
        let long = "x".repeat(4000);
        let cut = truncate_marked(&long, CONTENT_LIMIT);
        assert!(cut.contains("truncated"));
        assert!(cut.len() < long.len());
    }
}
