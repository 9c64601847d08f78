//! Core value types for convergent refinement.
//!
//! An [`Artifact`] is an immutable snapshot of AI-generated text. Refiners
//! never mutate in place: each pass yields a new artifact, and the engine
//! compares snapshots to decide whether iteration has stabilized.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A typed snapshot of text under iterative refinement.
///
/// `kind` tags what the artifact is ("analysis", "assessment", ...);
/// `context` carries the rationale the refiner should keep in view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: String,
    pub content: String,
    pub context: String,
}

impl Artifact {
    pub fn new(
        kind: impl Into<String>,
        content: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
            context: context.into(),
        }
    }
}

/// Bounds for a single refinement run.
///
/// `max_iterations` is the hard safety net: the loop never runs past it,
/// whatever the detectors report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementConfig {
    /// Iterations to run before convergence checks begin.
    pub min_iterations: u32,
    /// Hard upper bound on refinement passes. Must be > 0 and >= min.
    pub max_iterations: u32,
    /// When the first pass returns the artifact unchanged, stop immediately.
    pub skip_simple: bool,
    /// Optional wall-clock ceiling for the whole loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            min_iterations: 1,
            max_iterations: 5,
            skip_simple: true,
            timeout: None,
        }
    }
}

/// A detector's judgment on whether further iteration has diminishing value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceDecision {
    pub converged: bool,
    /// Confidence in the judgment, clamped to [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    /// Which detection strategy produced this decision ("diff", "ai", ...).
    pub strategy: String,
}

/// Outcome of a completed refinement run.
#[derive(Debug, Clone)]
pub struct ConvergenceResult {
    pub artifact: Artifact,
    /// Refinement passes fully performed. 0 only for the skip-simple path.
    pub iterations: u32,
    pub converged: bool,
    pub elapsed: Duration,
}

/// Pre-computed line-diff signal handed to detectors and metrics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiffMetrics {
    /// Weighted count of changed lines between the two snapshots.
    pub lines_changed: f64,
    /// Changed lines relative to the current snapshot's line count.
    pub change_ratio: f64,
}
