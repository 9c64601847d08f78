//! Refinement metrics: per-iteration, per-artifact, and rolled up.
//!
//! The collector is caller-owned and borrowed mutably for a run; callers
//! that drive parallel refinements against one collector must provide
//! their own locking.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::artifact::{ConvergenceDecision, DiffMetrics};

/// Blended per-token cost estimate used for the aggregate rollup.
const COST_PER_TOKEN_USD: f64 = 8e-6;

/// Statistics for one refinement pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationMetrics {
    pub iteration: u32,
    pub lines_changed: f64,
    pub change_ratio: f64,
    pub duration_ms: u64,
    pub tokens: u32,
    /// Confidence of the convergence decision, when a check ran.
    pub confidence: Option<f64>,
    /// Strategy that produced the decision, when a check ran.
    pub strategy: Option<String>,
}

/// Statistics for one completed artifact refinement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetrics {
    pub kind: String,
    pub iterations: u32,
    pub stop_reason: String,
    pub converged: bool,
    pub duration_ms: u64,
    /// Convergence checks that errored and were skipped.
    pub check_errors: u32,
}

/// Roll-up across all artifacts seen by a collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub artifacts: usize,
    pub total_iterations: u32,
    /// Fraction of artifacts that converged before the iteration bound.
    pub convergence_rate: f64,
    pub p50_iterations: u32,
    pub p95_iterations: u32,
    pub total_duration_ms: u64,
    pub estimated_cost_usd: f64,
}

/// Nearest-rank percentile. Empty input yields 0; a singleton yields its
/// only value.
pub fn percentile(p: f64, values: &[u32]) -> u32 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

struct IterationBuilder {
    iteration: u32,
    started: Instant,
    tokens: u32,
}

/// Accumulates metrics during refinement runs.
///
/// Call `iteration_start` / `iteration_end` around each pass and
/// `artifact_complete` when a run finishes, then `aggregate` for the rollup.
#[derive(Default)]
pub struct MetricsCollector {
    current: Option<IterationBuilder>,
    pending_check_errors: u32,
    iterations: Vec<IterationMetrics>,
    artifacts: Vec<ArtifactMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iteration_start(&mut self, iteration: u32) {
        self.current = Some(IterationBuilder {
            iteration,
            started: Instant::now(),
            tokens: 0,
        });
    }

    /// Record token usage attributed to the in-flight iteration.
    pub fn record_tokens(&mut self, tokens: u32) {
        if let Some(ref mut current) = self.current {
            current.tokens += tokens;
        }
    }

    /// Record an errored convergence check. Advisory: counted, never fatal.
    pub fn record_check_error(&mut self, iteration: u32, message: &str) {
        tracing::warn!(iteration, error = message, "Convergence check failed, continuing");
        self.pending_check_errors += 1;
    }

    pub fn iteration_end(
        &mut self,
        iteration: u32,
        diff: DiffMetrics,
        decision: Option<&ConvergenceDecision>,
    ) {
        let (duration_ms, tokens) = match self.current.take() {
            Some(builder) if builder.iteration == iteration => {
                (builder.started.elapsed().as_millis() as u64, builder.tokens)
            }
            _ => (0, 0),
        };
        self.iterations.push(IterationMetrics {
            iteration,
            lines_changed: diff.lines_changed,
            change_ratio: diff.change_ratio,
            duration_ms,
            tokens,
            confidence: decision.map(|d| d.confidence),
            strategy: decision.map(|d| d.strategy.clone()),
        });
    }

    pub fn artifact_complete(
        &mut self,
        kind: &str,
        iterations: u32,
        stop_reason: &str,
        converged: bool,
        elapsed: Duration,
    ) {
        self.current = None;
        self.artifacts.push(ArtifactMetrics {
            kind: kind.to_string(),
            iterations,
            stop_reason: stop_reason.to_string(),
            converged,
            duration_ms: elapsed.as_millis() as u64,
            check_errors: std::mem::take(&mut self.pending_check_errors),
        });
    }

    pub fn iterations(&self) -> &[IterationMetrics] {
        &self.iterations
    }

    pub fn artifacts(&self) -> &[ArtifactMetrics] {
        &self.artifacts
    }

    pub fn aggregate(&self) -> AggregateMetrics {
        let iteration_counts: Vec<u32> = self.artifacts.iter().map(|a| a.iterations).collect();
        let converged = self.artifacts.iter().filter(|a| a.converged).count();
        let total_tokens: u64 = self.iterations.iter().map(|i| i.tokens as u64).sum();

        AggregateMetrics {
            artifacts: self.artifacts.len(),
            total_iterations: iteration_counts.iter().sum(),
            convergence_rate: if self.artifacts.is_empty() {
                0.0
            } else {
                converged as f64 / self.artifacts.len() as f64
            },
            p50_iterations: percentile(50.0, &iteration_counts),
            p95_iterations: percentile(95.0, &iteration_counts),
            total_duration_ms: self.artifacts.iter().map(|a| a.duration_ms).sum(),
            estimated_cost_usd: total_tokens as f64 * COST_PER_TOKEN_USD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_zero() {
        assert_eq!(percentile(50.0, &[]), 0);
        assert_eq!(percentile(95.0, &[]), 0);
    }

    #[test]
    fn percentile_of_singleton_is_the_value() {
        assert_eq!(percentile(50.0, &[7]), 7);
        assert_eq!(percentile(95.0, &[7]), 7);
    }

    #[test]
    fn percentile_nearest_rank() {
        let values = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(percentile(50.0, &values), 5);
        assert_eq!(percentile(95.0, &values), 10);
    }

    #[test]
    fn aggregate_rolls_up_artifacts() {
        let mut collector = MetricsCollector::new();

        collector.iteration_start(1);
        collector.record_tokens(500);
        collector.iteration_end(1, DiffMetrics::default(), None);
        collector.artifact_complete("analysis", 3, "AI convergence", true, Duration::from_secs(2));
        collector.artifact_complete("assessment", 5, "max iterations", false, Duration::from_secs(4));

        let agg = collector.aggregate();
        assert_eq!(agg.artifacts, 2);
        assert_eq!(agg.total_iterations, 8);
        assert!((agg.convergence_rate - 0.5).abs() < 1e-9);
        assert_eq!(agg.p50_iterations, 3);
        assert_eq!(agg.p95_iterations, 5);
        assert_eq!(agg.total_duration_ms, 6000);
        assert!(agg.estimated_cost_usd > 0.0);
    }

    #[test]
    fn check_errors_attach_to_the_completing_artifact() {
        let mut collector = MetricsCollector::new();
        collector.record_check_error(2, "detector down");
        collector.record_check_error(3, "detector down");
        collector.artifact_complete("analysis", 4, "max iterations", false, Duration::ZERO);
        collector.artifact_complete("analysis", 2, "AI convergence", true, Duration::ZERO);

        assert_eq!(collector.artifacts()[0].check_errors, 2);
        assert_eq!(collector.artifacts()[1].check_errors, 0);
    }
}
