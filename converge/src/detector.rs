//! Convergence detectors: has an artifact stabilized?
//!
//! Detectors are advisory. A detector failure never fails refinement; the
//! chained detector falls through to the next strategy and the engine's
//! max-iteration bound is the final safety net.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::artifact::{Artifact, ConvergenceDecision};
use crate::diff::{diff_lines, DiffOptions};
use crate::error::DetectorError;

/// Default change threshold for the diff detector: under 5% changed lines
/// counts as converged.
pub const DEFAULT_DIFF_THRESHOLD: f64 = 0.05;

/// Default confidence floor for accepting a chained detector's decision.
pub const DEFAULT_CHAIN_CONFIDENCE: f64 = 0.7;

/// Decide whether `current` has stabilized relative to `previous`.
#[async_trait]
pub trait ConvergenceDetector: Send + Sync {
    async fn check(
        &self,
        cancel: &CancellationToken,
        current: &Artifact,
        previous: &Artifact,
    ) -> Result<ConvergenceDecision, DetectorError>;
}

/// Pure line-diff detector: converged when the changed fraction of the
/// current snapshot falls below a threshold.
#[derive(Debug, Clone)]
pub struct DiffDetector {
    pub threshold: f64,
    pub options: DiffOptions,
}

impl Default for DiffDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DIFF_THRESHOLD,
            options: DiffOptions::default(),
        }
    }
}

impl DiffDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            options: DiffOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl ConvergenceDetector for DiffDetector {
    async fn check(
        &self,
        _cancel: &CancellationToken,
        current: &Artifact,
        previous: &Artifact,
    ) -> Result<ConvergenceDecision, DetectorError> {
        if current.content.is_empty() {
            return Ok(ConvergenceDecision {
                converged: false,
                confidence: 1.0,
                reasoning: "empty artifact".into(),
                strategy: "diff".into(),
            });
        }

        let stats = diff_lines(&previous.content, &current.content, &self.options);
        let ratio = stats.change_ratio();
        let converged = ratio < self.threshold;
        // Distance from the threshold is the confidence signal: near the
        // boundary the call is a coin flip and a chained AI detector should
        // get the final word.
        let confidence = ((ratio - self.threshold).abs() / self.threshold).min(1.0);

        Ok(ConvergenceDecision {
            converged,
            confidence,
            reasoning: format!(
                "{:.1}% of {} lines changed (threshold {:.1}%)",
                ratio * 100.0,
                stats.current_lines,
                self.threshold * 100.0
            ),
            strategy: "diff".into(),
        })
    }
}

/// Ordered detector chain with a confidence floor.
///
/// The first detector whose decision meets the floor wins; a later
/// detector's higher confidence cannot override an earlier acceptance.
pub struct ChainedDetector {
    detectors: Vec<Box<dyn ConvergenceDetector>>,
    pub min_confidence: f64,
}

impl ChainedDetector {
    pub fn new(detectors: Vec<Box<dyn ConvergenceDetector>>) -> Self {
        Self {
            detectors,
            min_confidence: DEFAULT_CHAIN_CONFIDENCE,
        }
    }

    pub fn with_min_confidence(mut self, floor: f64) -> Self {
        self.min_confidence = floor;
        self
    }
}

#[async_trait]
impl ConvergenceDetector for ChainedDetector {
    async fn check(
        &self,
        cancel: &CancellationToken,
        current: &Artifact,
        previous: &Artifact,
    ) -> Result<ConvergenceDecision, DetectorError> {
        if self.detectors.is_empty() {
            return Err(DetectorError::Other(anyhow::anyhow!(
                "detector chain is empty"
            )));
        }

        // Track only the most recent outcome: the chain's terminal behavior
        // is keyed on the last detector when nothing met the floor.
        let mut last_decision = None;
        let mut last_error = None;

        for detector in &self.detectors {
            match detector.check(cancel, current, previous).await {
                Ok(decision) if decision.confidence >= self.min_confidence => {
                    return Ok(decision);
                }
                Ok(decision) => {
                    debug!(
                        strategy = %decision.strategy,
                        confidence = decision.confidence,
                        floor = self.min_confidence,
                        "Detector below confidence floor, trying next"
                    );
                    last_decision = Some(decision);
                    last_error = None;
                }
                Err(e) => {
                    debug!(error = %e, "Detector failed, trying next");
                    last_error = Some(e);
                    last_decision = None;
                }
            }
        }

        match (last_error, last_decision) {
            (Some(e), _) => Err(DetectorError::ChainExhausted { source: Box::new(e) }),
            (None, Some(decision)) => Ok(decision),
            // Unreachable with a non-empty chain; kept total for safety.
            (None, None) => Err(DetectorError::Other(anyhow::anyhow!(
                "detector chain produced no outcome"
            ))),
        }
    }
}
