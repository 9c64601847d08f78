//! Per-issue execution pipeline.
//!
//! Strictly ordered stages: validate → claim → gather context → build
//! prompt → spawn agent → wait → process results. Ownership is the pivot:
//! nothing before `claim_issue` needs recovery, and every failure after it
//! runs the atomic release-and-reopen epilogue so no issue is ever left
//! in-progress without an owner.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::prompt::{ContextGatherer, PromptBuilder};
use crate::results::{IssueExecutionResult, ResultsProcessor};
use crate::spawner::{AgentSpawnConfig, AgentSpawner};
use crate::tracker::{Issue, IssueStatus, IssueTracker};

/// Pipeline stage names, used in errors and release comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GatherContext,
    BuildPrompt,
    Spawn,
    Wait,
    ProcessResults,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GatherContext => "gather-context",
            Self::BuildPrompt => "build-prompt",
            Self::Spawn => "spawn",
            Self::Wait => "wait",
            Self::ProcessResults => "process-results",
        };
        write!(f, "{s}")
    }
}

/// Failures of a single pipeline run.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Pre-claim refusal. The message is user-facing and names the issue
    /// and the reason; no ownership was taken, nothing to recover.
    #[error("{0}")]
    Rejected(String),

    /// The issue could not be loaded for validation (pre-claim).
    #[error("failed to load issue {id}: {source}")]
    Lookup {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The tracker refused the claim (lost race or store error). Ownership
    /// was never acquired, so no release runs.
    #[error("failed to claim issue {id}: {source}")]
    ClaimFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A post-claim stage failed. Release-and-reopen has already run by the
    /// time this error is visible to the caller.
    #[error("execution of issue {id} failed at {stage}: {source}")]
    Pipeline {
        id: String,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

/// Orchestrates one issue through the execution pipeline.
pub struct IssueExecutor {
    tracker: Arc<dyn IssueTracker>,
    spawner: Arc<dyn AgentSpawner>,
    gatherer: Arc<dyn ContextGatherer>,
    builder: Arc<dyn PromptBuilder>,
    processor: Arc<dyn ResultsProcessor>,
    actor: String,
    working_dir: PathBuf,
    debug_prompts: bool,
}

impl IssueExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        spawner: Arc<dyn AgentSpawner>,
        gatherer: Arc<dyn ContextGatherer>,
        builder: Arc<dyn PromptBuilder>,
        processor: Arc<dyn ResultsProcessor>,
        actor: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tracker,
            spawner,
            gatherer,
            builder,
            processor,
            actor: actor.into(),
            working_dir: working_dir.into(),
            debug_prompts: false,
        }
    }

    pub fn with_debug_prompts(mut self, enabled: bool) -> Self {
        self.debug_prompts = enabled;
        self
    }

    /// Executor instance identity used for claims.
    pub fn instance_id(&self) -> String {
        format!("conversation-{}", self.actor)
    }

    /// Pre-claim validation. Returns a user-facing refusal for any issue
    /// that is not plainly executable.
    pub async fn validate(&self, issue: &Issue) -> Option<String> {
        match issue.status {
            IssueStatus::Open => None,
            IssueStatus::Closed => Some(format!(
                "Cannot execute issue {}: already closed",
                issue.id
            )),
            IssueStatus::InProgress => Some(format!(
                "Cannot execute issue {}: already in progress (may be claimed by another executor)",
                issue.id
            )),
            IssueStatus::Blocked => {
                let blockers: Vec<String> = match self.tracker.get_dependencies(&issue.id).await {
                    Ok(deps) => deps
                        .into_iter()
                        .filter(|d| d.status != IssueStatus::Closed)
                        .map(|d| d.id)
                        .collect(),
                    Err(e) => {
                        warn!(issue = %issue.id, "Failed to fetch dependencies for blocked issue: {e}");
                        Vec::new()
                    }
                };
                if blockers.is_empty() {
                    Some(format!("Cannot execute issue {}: blocked", issue.id))
                } else {
                    Some(format!(
                        "Cannot execute issue {}: blocked by [{}]",
                        issue.id,
                        blockers.join(", ")
                    ))
                }
            }
        }
    }

    /// Release-and-reopen epilogue plus error wrapping for a failed
    /// post-claim stage. The release is best-effort: a canceled context or
    /// a dead tracker must not mask the original failure.
    async fn fail(&self, id: &str, stage: Stage, source: anyhow::Error, summary: &str) -> ExecuteError {
        error!(issue = id, %stage, "Execution failed: {source:#}");
        let comment = format!("{summary}: {source}");
        if let Err(release_err) = self
            .tracker
            .release_and_reopen(id, &self.actor, &comment)
            .await
        {
            error!(issue = id, "Release-and-reopen failed: {release_err:#}");
        } else {
            info!(issue = id, "Issue released and reopened after failure");
        }
        ExecuteError::Pipeline {
            id: id.to_string(),
            stage,
            source,
        }
    }

    /// Run one issue through the pipeline.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        issue_id: &str,
    ) -> Result<IssueExecutionResult, ExecuteError> {
        // --- Validate (pre-claim) ---
        let issue = self
            .tracker
            .get_issue(issue_id)
            .await
            .map_err(|source| ExecuteError::Lookup {
                id: issue_id.to_string(),
                source,
            })?;
        if let Some(refusal) = self.validate(&issue).await {
            return Err(ExecuteError::Rejected(refusal));
        }

        // --- Claim ---
        let instance = self.instance_id();
        self.tracker
            .claim_issue(&issue.id, &instance)
            .await
            .map_err(|source| ExecuteError::ClaimFailed {
                id: issue.id.clone(),
                source,
            })?;
        info!(issue = %issue.id, instance = %instance, "Claimed issue");
        // Best-effort breadcrumb for operators watching the tracker.
        if let Err(e) = self
            .tracker
            .update_execution_state(&issue.id, "executing")
            .await
        {
            warn!(issue = %issue.id, "Failed to record execution state: {e}");
        }

        // --- Gather context ---
        let context = match self.gatherer.gather(cancel, &issue).await {
            Ok(context) => context,
            Err(e) => {
                return Err(self
                    .fail(&issue.id, Stage::GatherContext, e, "Failed to gather context")
                    .await)
            }
        };

        // --- Build prompt ---
        let prompt = match self.builder.build(&context) {
            Ok(prompt) => prompt,
            Err(e) => {
                return Err(self
                    .fail(&issue.id, Stage::BuildPrompt, e, "Failed to build prompt")
                    .await)
            }
        };
        if self.debug_prompts {
            debug!(issue = %issue.id, prompt = %prompt, "Agent prompt");
        }

        // --- Spawn agent ---
        let spawn_config = AgentSpawnConfig::for_issue(&self.working_dir, &issue.id);
        let handle = match self.spawner.spawn(cancel, spawn_config, &prompt).await {
            Ok(handle) => handle,
            Err(e) => {
                return Err(self
                    .fail(&issue.id, Stage::Spawn, e, "Failed to spawn agent")
                    .await)
            }
        };

        // --- Wait ---
        let agent_result = match handle.wait(cancel).await {
            Ok(result) => result,
            Err(e) => {
                return Err(self
                    .fail(&issue.id, Stage::Wait, e, "Agent run did not finish")
                    .await)
            }
        };

        // --- Process results ---
        match self.processor.process(cancel, &issue, &agent_result).await {
            Ok(result) => {
                info!(
                    issue = %issue.id,
                    completed = result.completed,
                    gates_passed = result.gates_passed,
                    discovered = result.discovered.len(),
                    "Execution finished"
                );
                Ok(result)
            }
            Err(e) => Err(self
                .fail(
                    &issue.id,
                    Stage::ProcessResults,
                    e,
                    "Failed to process agent results",
                )
                .await),
        }
    }
}
