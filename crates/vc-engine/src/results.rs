//! Post-execution results processing: classify the agent run, apply quality
//! gates, extract discovered follow-on work, and update the tracker.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::spawner::AgentResult;
use crate::tracker::{Issue, IssueTracker, NewIssue};

/// Tri-state outcome of a processed run.
///
/// Encoded as additive fields rather than a mutually-exclusive enum because
/// downstream reporting reads them independently: the autonomy loop routes
/// on `gates_passed` first, then `completed`.
#[derive(Debug, Clone, Default)]
pub struct IssueExecutionResult {
    pub completed: bool,
    pub gates_passed: bool,
    pub discovered: Vec<String>,
}

/// Classify an agent run and apply its effects to the tracker.
#[async_trait]
pub trait ResultsProcessor: Send + Sync {
    async fn process(
        &self,
        cancel: &CancellationToken,
        issue: &Issue,
        result: &AgentResult,
    ) -> Result<IssueExecutionResult>;
}

/// Standard processor: marker-based classification over the agent's output.
///
/// The prompt asks agents to report `DISCOVERED: <title>`, `GATES: fail`,
/// and `STATUS: partial` lines; everything else is inferred from the exit
/// state.
pub struct StandardResultsProcessor {
    tracker: Arc<dyn IssueTracker>,
    actor: String,
    gates_enabled: bool,
    discovered_re: Regex,
}

impl StandardResultsProcessor {
    pub fn new(tracker: Arc<dyn IssueTracker>, actor: impl Into<String>) -> Self {
        Self {
            tracker,
            actor: actor.into(),
            gates_enabled: true,
            // Compiled once; the pattern is static so this cannot fail.
            discovered_re: Regex::new(r"^DISCOVERED:\s*(.+)$").unwrap(),
        }
    }

    pub fn with_gates_enabled(mut self, enabled: bool) -> Self {
        self.gates_enabled = enabled;
        self
    }

    /// Create tracker issues for each `DISCOVERED:` line.
    async fn create_discovered(&self, issue: &Issue, result: &AgentResult) -> Vec<String> {
        let mut ids = Vec::new();
        for line in &result.output_lines {
            let Some(caps) = self.discovered_re.captures(line.trim()) else {
                continue;
            };
            let title = caps[1].trim().to_string();
            if title.is_empty() {
                continue;
            }
            match self.tracker.create_issue(NewIssue::task(&title)).await {
                Ok(created) => {
                    info!(issue = %issue.id, discovered = %created.id, title = %title, "Filed discovered issue");
                    let _ = self
                        .tracker
                        .add_comment(
                            &created.id,
                            &self.actor,
                            &format!("Discovered while executing {}", issue.id),
                        )
                        .await;
                    ids.push(created.id);
                }
                Err(e) => {
                    warn!(issue = %issue.id, title = %title, "Failed to file discovered issue: {e}");
                }
            }
        }
        ids
    }

    fn tail(lines: &[String], n: usize) -> String {
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

#[async_trait]
impl ResultsProcessor for StandardResultsProcessor {
    async fn process(
        &self,
        _cancel: &CancellationToken,
        issue: &Issue,
        result: &AgentResult,
    ) -> Result<IssueExecutionResult> {
        let discovered = self.create_discovered(issue, result).await;

        if !result.success {
            let comment = format!(
                "Agent run failed (exit code {}):\n{}",
                result.exit_code,
                Self::tail(&result.error_lines, 5)
            );
            self.tracker
                .release_and_reopen(&issue.id, &self.actor, &comment)
                .await?;
            return Ok(IssueExecutionResult {
                completed: false,
                gates_passed: false,
                discovered,
            });
        }

        let gates_failed_marker = result
            .output_lines
            .iter()
            .any(|l| l.trim().eq_ignore_ascii_case("GATES: fail"));
        let partial_marker = result
            .output_lines
            .iter()
            .any(|l| l.trim().eq_ignore_ascii_case("STATUS: partial"));

        let gates_passed = !self.gates_enabled || !gates_failed_marker;
        if !gates_passed {
            self.tracker
                .release_and_reopen(
                    &issue.id,
                    &self.actor,
                    "Agent run finished but quality gates failed",
                )
                .await?;
            return Ok(IssueExecutionResult {
                completed: false,
                gates_passed: false,
                discovered,
            });
        }

        if partial_marker {
            self.tracker
                .release_and_reopen(
                    &issue.id,
                    &self.actor,
                    "Agent made progress but reported the task as partial, reopened for a follow-up run",
                )
                .await?;
            return Ok(IssueExecutionResult {
                completed: false,
                gates_passed: true,
                discovered,
            });
        }

        self.tracker
            .close_issue(&issue.id, &self.actor, "Completed by agent run")
            .await?;
        info!(issue = %issue.id, discovered = discovered.len(), "Issue completed and closed");
        Ok(IssueExecutionResult {
            completed: true,
            gates_passed: true,
            discovered,
        })
    }
}
