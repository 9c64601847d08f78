//! Autonomy loop: drive the execution pipeline across ready issues until
//! blocked.
//!
//! The loop is bounded three ways: an iteration cap, a wall-clock timeout,
//! and a consecutive-error threshold. Errors are consecutive, not
//! cumulative: any completed or partial run resets the counter, so a long
//! stable session cannot be terminated by failures spread thin across it.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::IssueExecutor;
use crate::tracker::{IssueTracker, WorkFilter};

/// Bounds for one autonomy run. Out-of-range values are clamped.
#[derive(Debug, Clone, Copy)]
pub struct AutonomyOptions {
    /// Issues to attempt at most (1..=100).
    pub max_iterations: u32,
    /// Wall-clock ceiling in minutes (1..=480).
    pub timeout_minutes: u32,
    /// Consecutive failures that stop the loop (1..=10).
    pub error_threshold: u32,
}

impl Default for AutonomyOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout_minutes: 120,
            error_threshold: 3,
        }
    }
}

impl AutonomyOptions {
    pub fn clamped(self) -> Self {
        Self {
            max_iterations: self.max_iterations.clamp(1, 100),
            timeout_minutes: self.timeout_minutes.clamp(1, 480),
            error_threshold: self.error_threshold.clamp(1, 10),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_minutes) * 60)
    }
}

/// Accumulated outcome of an autonomy run.
#[derive(Debug, Clone)]
pub struct AutonomyReport {
    pub stop_reason: String,
    /// Pipeline attempts performed. A threshold trip includes the failing
    /// attempt; a scan that found no ready work adds nothing.
    pub iterations: u32,
    pub elapsed: Duration,
    pub completed: Vec<String>,
    pub partial: Vec<String>,
    pub failed: Vec<String>,
}

impl AutonomyReport {
    pub fn render(&self) -> String {
        let mut out = String::from("Autonomous execution finished\n");
        out.push_str(&format!("Stopped: {}\n", self.stop_reason));
        out.push_str(&format!(
            "Iterations: {} (elapsed {}s)\n",
            self.iterations,
            self.elapsed.as_secs_f64().round() as u64
        ));
        for (label, ids) in [
            ("Completed", &self.completed),
            ("Partial", &self.partial),
            ("Failed", &self.failed),
        ] {
            out.push_str(&format!("\n{} ({}):\n", label, ids.len()));
            for id in ids {
                out.push_str(&format!("  - {id}\n"));
            }
        }
        out
    }
}

/// Repeatedly claim and execute ready work until a stop condition fires.
///
/// A tracker failure while scanning for ready work is surfaced immediately;
/// pipeline failures are absorbed into the consecutive-error accounting.
pub async fn continue_until_blocked(
    cancel: &CancellationToken,
    executor: &IssueExecutor,
    tracker: &dyn IssueTracker,
    options: AutonomyOptions,
) -> Result<AutonomyReport> {
    let options = options.clamped();
    let started = Instant::now();

    // Timeout-scoped child token covering the whole loop.
    let cancel = cancel.child_token();
    let watchdog = {
        let token = cancel.clone();
        let timeout = options.timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        })
    };

    let mut completed: Vec<String> = Vec::new();
    let mut partial: Vec<String> = Vec::new();
    let mut failed: Vec<String> = Vec::new();
    let mut consecutive_errors = 0u32;
    let mut iterations = 0u32;

    info!(
        max_iterations = options.max_iterations,
        timeout_minutes = options.timeout_minutes,
        error_threshold = options.error_threshold,
        "Autonomy loop starting"
    );

    let stop_reason = loop {
        if cancel.is_cancelled() {
            break "timeout or interruption".to_string();
        }
        if iterations >= options.max_iterations {
            break "max iterations reached".to_string();
        }

        let ready = tracker
            .get_ready_work(WorkFilter { limit: 1 })
            .await
            .context("failed to scan for ready work")?;
        let Some(issue) = ready.into_iter().next() else {
            break "no more ready work".to_string();
        };

        info!(iteration = iterations + 1, issue = %issue.id, "Executing ready issue");
        match executor.execute(&cancel, &issue.id).await {
            Err(e) => {
                iterations += 1;
                failed.push(issue.id.clone());
                consecutive_errors += 1;
                warn!(
                    issue = %issue.id,
                    consecutive_errors,
                    threshold = options.error_threshold,
                    "Pipeline failed: {e}"
                );
                if consecutive_errors >= options.error_threshold {
                    break format!(
                        "error threshold exceeded ({consecutive_errors} consecutive errors)"
                    );
                }
            }
            Ok(result) if !result.gates_passed => {
                iterations += 1;
                failed.push(issue.id.clone());
                consecutive_errors += 1;
                warn!(
                    issue = %issue.id,
                    consecutive_errors,
                    "Quality gates failed"
                );
                if consecutive_errors >= options.error_threshold {
                    break format!(
                        "error threshold exceeded ({consecutive_errors} consecutive errors)"
                    );
                }
            }
            Ok(result) if result.completed => {
                iterations += 1;
                completed.push(issue.id.clone());
                consecutive_errors = 0;
            }
            Ok(_) => {
                // Gates passed but the issue stayed open.
                iterations += 1;
                partial.push(issue.id.clone());
                consecutive_errors = 0;
            }
        }
    };

    watchdog.abort();
    let report = AutonomyReport {
        stop_reason,
        iterations,
        elapsed: started.elapsed(),
        completed,
        partial,
        failed,
    };
    info!(
        stop_reason = %report.stop_reason,
        iterations = report.iterations,
        completed = report.completed.len(),
        partial = report.partial.len(),
        failed = report.failed.len(),
        "Autonomy loop finished"
    );
    Ok(report)
}
