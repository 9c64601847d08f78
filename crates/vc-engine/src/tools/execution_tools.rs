//! Execution tools: drive the pipeline for one issue or until blocked.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::{bool_or, int_or, opt_str, EngineTool, ToolDefinition, ToolError};
use crate::autonomy::{continue_until_blocked, AutonomyOptions};
use crate::executor::{ExecuteError, IssueExecutor};
use crate::results::IssueExecutionResult;
use crate::tracker::{IssueTracker, WorkFilter};

fn render_outcome(issue_id: &str, result: &IssueExecutionResult) -> String {
    let mut text = if result.completed {
        format!("Issue {issue_id} completed and closed")
    } else if result.gates_passed {
        format!("Issue {issue_id} made progress but remains open")
    } else {
        format!("Issue {issue_id} failed quality gates and was reopened")
    };
    if !result.discovered.is_empty() {
        text.push_str(&format!(
            "\nDiscovered follow-on issues: {}",
            result.discovered.join(", ")
        ));
    }
    text
}

// ---------------------------------------------------------------------------
// continue_execution
// ---------------------------------------------------------------------------

pub struct ContinueExecutionTool {
    tracker: Arc<dyn IssueTracker>,
    executor: Arc<IssueExecutor>,
}

impl ContinueExecutionTool {
    pub fn new(tracker: Arc<dyn IssueTracker>, executor: Arc<IssueExecutor>) -> Self {
        Self { tracker, executor }
    }
}

#[async_trait]
impl EngineTool for ContinueExecutionTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "continue_execution".into(),
            description: "Execute one issue through the agent pipeline. Picks \
                          the highest-priority ready issue unless issue_id is \
                          given."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "issue_id": {
                        "type": "string",
                        "description": "Specific issue to execute"
                    },
                    "async": {
                        "type": "boolean",
                        "description": "Run in the background. Not yet supported."
                    }
                }
            }),
        }
    }

    async fn call(
        &self,
        cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        if bool_or(&args, "async", false)? {
            return Err(ToolError::NotImplemented(
                "async execution is not implemented yet; run without async".into(),
            ));
        }

        let issue_id = match opt_str(&args, "issue_id")? {
            Some(id) => id.to_string(),
            None => {
                let ready = self
                    .tracker
                    .get_ready_work(WorkFilter { limit: 1 })
                    .await
                    .map_err(ToolError::Internal)?;
                match ready.into_iter().next() {
                    Some(issue) => issue.id,
                    None => return Ok("No ready work available".into()),
                }
            }
        };

        match self.executor.execute(cancel, &issue_id).await {
            Ok(result) => Ok(render_outcome(&issue_id, &result)),
            // Pre-claim refusals are answers, not failures: the model should
            // read them and move on without an error flag.
            Err(ExecuteError::Rejected(refusal)) => Ok(refusal),
            Err(e) => Err(ToolError::Internal(anyhow::Error::new(e))),
        }
    }
}

// ---------------------------------------------------------------------------
// continue_until_blocked
// ---------------------------------------------------------------------------

pub struct ContinueUntilBlockedTool {
    tracker: Arc<dyn IssueTracker>,
    executor: Arc<IssueExecutor>,
}

impl ContinueUntilBlockedTool {
    pub fn new(tracker: Arc<dyn IssueTracker>, executor: Arc<IssueExecutor>) -> Self {
        Self { tracker, executor }
    }
}

#[async_trait]
impl EngineTool for ContinueUntilBlockedTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "continue_until_blocked".into(),
            description: "Keep executing ready issues until there is no more \
                          ready work, an error threshold trips, or a bound is \
                          hit."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "max_iterations": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 100,
                        "description": "Issues to attempt at most. Defaults to 10."
                    },
                    "timeout_minutes": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 480,
                        "description": "Wall-clock ceiling. Defaults to 120."
                    },
                    "error_threshold": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 10,
                        "description": "Consecutive failures that stop the loop. Defaults to 3."
                    }
                }
            }),
        }
    }

    async fn call(
        &self,
        cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let defaults = AutonomyOptions::default();
        let options = AutonomyOptions {
            max_iterations: int_or(&args, "max_iterations", i64::from(defaults.max_iterations))?
                .try_into()
                .map_err(|_| ToolError::InvalidInput("max_iterations must be positive".into()))?,
            timeout_minutes: int_or(
                &args,
                "timeout_minutes",
                i64::from(defaults.timeout_minutes),
            )?
            .try_into()
            .map_err(|_| ToolError::InvalidInput("timeout_minutes must be positive".into()))?,
            error_threshold: int_or(
                &args,
                "error_threshold",
                i64::from(defaults.error_threshold),
            )?
            .try_into()
            .map_err(|_| ToolError::InvalidInput("error_threshold must be positive".into()))?,
        };

        let report = continue_until_blocked(cancel, &self.executor, self.tracker.as_ref(), options)
            .await
            .map_err(ToolError::Internal)?;
        Ok(report.render())
    }
}
