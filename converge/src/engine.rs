//! The `Converge` driver: bounded, convergence-aware iteration.
//!
//! The engine calls a refiner, diffs the result against the previous pass,
//! and asks the refiner's convergence check whether to stop. Convergence
//! checking is advisory: a detector bug must never wedge refinement, so
//! check errors are recorded and the iteration bound is the safety net.
//! A failed refinement pass is fatal: there is no valid artifact to
//! continue from.

use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::artifact::{Artifact, ConvergenceDecision, ConvergenceResult, RefinementConfig};
use crate::diff::{diff_lines, DiffOptions};
use crate::error::{ConvergeError, DetectorError};
use crate::metrics::MetricsCollector;

/// Stop reason recorded when a detector ends the loop.
pub const REASON_CONVERGED: &str = "AI convergence";
/// Stop reason recorded when the iteration bound ends the loop.
pub const REASON_MAX_ITERATIONS: &str = "max iterations";
/// Stop reason recorded when the first pass returned the artifact unchanged.
pub const REASON_SKIPPED: &str = "skipped (simple)";

/// A pluggable refinement strategy.
///
/// `refine` produces the next snapshot; `check_convergence` judges whether
/// the latest pass still moved the artifact meaningfully.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(
        &self,
        cancel: &CancellationToken,
        current: &Artifact,
    ) -> anyhow::Result<Artifact>;

    async fn check_convergence(
        &self,
        cancel: &CancellationToken,
        current: &Artifact,
        previous: &Artifact,
    ) -> Result<ConvergenceDecision, DetectorError>;
}

/// Bounded-iteration refinement driver.
pub struct Converge {
    config: RefinementConfig,
    diff_options: DiffOptions,
}

impl Converge {
    pub fn new(config: RefinementConfig) -> Self {
        Self {
            config,
            diff_options: DiffOptions::default(),
        }
    }

    pub fn with_diff_options(mut self, options: DiffOptions) -> Self {
        self.diff_options = options;
        self
    }

    fn validate(&self) -> Result<(), ConvergeError> {
        if self.config.max_iterations == 0 {
            return Err(ConvergeError::InvalidConfig(
                "max_iterations must be greater than 0".into(),
            ));
        }
        if self.config.max_iterations < self.config.min_iterations {
            return Err(ConvergeError::InvalidConfig(format!(
                "max_iterations ({}) must be >= min_iterations ({})",
                self.config.max_iterations, self.config.min_iterations
            )));
        }
        Ok(())
    }

    /// Drive `refiner` until convergence, the iteration bound, cancellation,
    /// or a fatal refine failure.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        initial: Artifact,
        refiner: &dyn Refiner,
        mut collector: Option<&mut MetricsCollector>,
    ) -> Result<ConvergenceResult, ConvergeError> {
        self.validate()?;

        let start = Instant::now();
        let kind = initial.kind.clone();

        // Timeout-scoped child token: the deadline cancels the loop and any
        // in-flight refiner call; the watchdog is dropped on normal exit.
        let cancel = cancel.child_token();
        let deadline = self.config.timeout.map(|timeout| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        });
        let result = self
            .run_inner(&cancel, initial, refiner, collector.as_deref_mut(), start, &kind)
            .await;
        if let Some(watchdog) = deadline {
            watchdog.abort();
        }
        result
    }

    async fn run_inner(
        &self,
        cancel: &CancellationToken,
        initial: Artifact,
        refiner: &dyn Refiner,
        mut collector: Option<&mut MetricsCollector>,
        start: Instant,
        kind: &str,
    ) -> Result<ConvergenceResult, ConvergeError> {
        let mut current = initial;

        for i in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(ConvergeError::Canceled { completed: i - 1 });
            }
            if let Some(c) = collector.as_deref_mut() {
                c.iteration_start(i);
            }
            debug!(iteration = i, kind, "Refinement iteration starting");

            let refined = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ConvergeError::Canceled { completed: i - 1 });
                }
                result = refiner.refine(cancel, &current) => result
                    .map_err(|source| ConvergeError::RefineFailed { iteration: i, source })?,
            };
            let previous = std::mem::replace(&mut current, refined);

            // A first pass that hands back the identical artifact means the
            // refiner judged it too simple to need work.
            if i == 1 && self.config.skip_simple && current == previous {
                let elapsed = start.elapsed();
                info!(kind, "Refinement skipped, artifact unchanged on first pass");
                if let Some(c) = collector.as_deref_mut() {
                    c.iteration_end(i, Default::default(), None);
                    c.artifact_complete(kind, 0, REASON_SKIPPED, true, elapsed);
                }
                return Ok(ConvergenceResult {
                    artifact: current,
                    iterations: 0,
                    converged: true,
                    elapsed,
                });
            }

            let diff = diff_lines(&previous.content, &current.content, &self.diff_options).metrics();

            let mut decision = None;
            if i >= self.config.min_iterations {
                let checked = tokio::select! {
                    _ = cancel.cancelled() => Err(DetectorError::Other(
                        anyhow::anyhow!("convergence check canceled"),
                    )),
                    result = refiner.check_convergence(cancel, &current, &previous) => result,
                };
                match checked {
                    Ok(d) if d.converged => {
                        let elapsed = start.elapsed();
                        info!(
                            iteration = i,
                            kind,
                            confidence = d.confidence,
                            strategy = %d.strategy,
                            "Refinement converged"
                        );
                        if let Some(c) = collector.as_deref_mut() {
                            c.iteration_end(i, diff, Some(&d));
                            c.artifact_complete(kind, i, REASON_CONVERGED, true, elapsed);
                        }
                        return Ok(ConvergenceResult {
                            artifact: current,
                            iterations: i,
                            converged: true,
                            elapsed,
                        });
                    }
                    Ok(d) => decision = Some(d),
                    Err(e) => {
                        // Advisory: a broken detector must not fail refinement.
                        if let Some(c) = collector.as_deref_mut() {
                            c.record_check_error(i, &e.to_string());
                        } else {
                            tracing::warn!(iteration = i, error = %e, "Convergence check failed, continuing");
                        }
                    }
                }
            }

            if let Some(c) = collector.as_deref_mut() {
                c.iteration_end(i, diff, decision.as_ref());
            }
        }

        let elapsed = start.elapsed();
        info!(
            iterations = self.config.max_iterations,
            kind, "Refinement hit the iteration bound without converging"
        );
        if let Some(c) = collector.as_deref_mut() {
            c.artifact_complete(
                kind,
                self.config.max_iterations,
                REASON_MAX_ITERATIONS,
                false,
                elapsed,
            );
        }
        Ok(ConvergenceResult {
            artifact: current,
            iterations: self.config.max_iterations,
            converged: false,
            elapsed,
        })
    }
}
