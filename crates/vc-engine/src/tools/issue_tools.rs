//! Issue management tools: create, link, query, and report.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::{
    issue_type_or, limit_or, opt_str, priority_or, reject_params, require_str, status_filter,
    EngineTool, ToolDefinition, ToolError,
};
use crate::tracker::{
    Dependency, DependencyKind, Issue, IssueTracker, IssueType, NewIssue, SearchFilter, WorkFilter,
};

/// Actor recorded on tool-created tracker entities.
const TOOL_ACTOR: &str = "conversation";

fn issue_line(issue: &Issue) -> String {
    format!(
        "{} [P{}] ({}) {}",
        issue.id, issue.priority, issue.issue_type, issue.title
    )
}

// ---------------------------------------------------------------------------
// create_issue
// ---------------------------------------------------------------------------

pub struct CreateIssueTool {
    tracker: Arc<dyn IssueTracker>,
}

impl CreateIssueTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl EngineTool for CreateIssueTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_issue".into(),
            description: "Create a new issue in the tracker.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "Short issue title"
                    },
                    "description": {
                        "type": "string",
                        "description": "Longer description of the work"
                    },
                    "type": {
                        "type": "string",
                        "enum": ["bug", "feature", "task", "chore"],
                        "description": "Kind of work. Defaults to task."
                    },
                    "priority": {
                        "type": "integer",
                        "minimum": 0,
                        "maximum": 4,
                        "description": "0 is highest. Defaults to 2."
                    }
                },
                "required": ["title"]
            }),
        }
    }

    async fn call(
        &self,
        _cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let title = require_str(&args, "title")?.to_string();
        let description = opt_str(&args, "description")?.unwrap_or_default().to_string();
        let issue_type = issue_type_or(&args, "type", IssueType::Task)?;
        let priority = priority_or(&args, "priority", 2)?;

        let issue = self
            .tracker
            .create_issue(NewIssue {
                title: title.clone(),
                description,
                design: String::new(),
                acceptance_criteria: String::new(),
                issue_type,
                priority,
            })
            .await
            .map_err(ToolError::Internal)?;
        Ok(format!("Created {issue_type} {}: {title}", issue.id))
    }
}

// ---------------------------------------------------------------------------
// create_epic
// ---------------------------------------------------------------------------

pub struct CreateEpicTool {
    tracker: Arc<dyn IssueTracker>,
}

impl CreateEpicTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl EngineTool for CreateEpicTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_epic".into(),
            description: "Create an epic that will contain child issues.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "Short epic title"
                    },
                    "description": {
                        "type": "string",
                        "description": "What this epic covers"
                    },
                    "priority": {
                        "type": "integer",
                        "minimum": 0,
                        "maximum": 4,
                        "description": "0 is highest. Defaults to 1."
                    }
                },
                "required": ["title"]
            }),
        }
    }

    async fn call(
        &self,
        _cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let title = require_str(&args, "title")?.to_string();
        let description = opt_str(&args, "description")?.unwrap_or_default().to_string();
        let priority = priority_or(&args, "priority", 1)?;

        let issue = self
            .tracker
            .create_issue(NewIssue {
                title: title.clone(),
                description,
                design: String::new(),
                acceptance_criteria: String::new(),
                issue_type: IssueType::Epic,
                priority,
            })
            .await
            .map_err(ToolError::Internal)?;
        Ok(format!("Created epic {}: {title}", issue.id))
    }
}

// ---------------------------------------------------------------------------
// add_child_to_epic
// ---------------------------------------------------------------------------

pub struct AddChildToEpicTool {
    tracker: Arc<dyn IssueTracker>,
}

impl AddChildToEpicTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl EngineTool for AddChildToEpicTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "add_child_to_epic".into(),
            description: "Attach an existing issue to an epic. By default the \
                          child also blocks the epic from closing."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "epic_id": {
                        "type": "string",
                        "description": "ID of the epic"
                    },
                    "child_issue_id": {
                        "type": "string",
                        "description": "ID of the issue to attach"
                    },
                    "blocks": {
                        "type": "boolean",
                        "description": "Whether the child blocks the epic. Defaults to true."
                    }
                },
                "required": ["epic_id", "child_issue_id"]
            }),
        }
    }

    async fn call(
        &self,
        _cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let epic_id = require_str(&args, "epic_id")?.to_string();
        let child_id = require_str(&args, "child_issue_id")?.to_string();
        let blocks = super::bool_or(&args, "blocks", true)?;

        self.tracker
            .add_dependency(Dependency::new(
                &child_id,
                &epic_id,
                DependencyKind::ParentChild,
                TOOL_ACTOR,
            ))
            .await
            .map_err(ToolError::Internal)?;
        if blocks {
            self.tracker
                .add_dependency(Dependency::new(
                    &epic_id,
                    &child_id,
                    DependencyKind::Blocks,
                    TOOL_ACTOR,
                ))
                .await
                .map_err(ToolError::Internal)?;
        }

        Ok(if blocks {
            format!("Added {child_id} to epic {epic_id} (blocking)")
        } else {
            format!("Added {child_id} to epic {epic_id}")
        })
    }
}

// ---------------------------------------------------------------------------
// get_ready_work
// ---------------------------------------------------------------------------

pub struct GetReadyWorkTool {
    tracker: Arc<dyn IssueTracker>,
}

impl GetReadyWorkTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl EngineTool for GetReadyWorkTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_ready_work".into(),
            description: "List open issues whose blockers are all closed, \
                          highest priority first."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum issues to return. Defaults to 5."
                    }
                }
            }),
        }
    }

    async fn call(
        &self,
        _cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let limit = limit_or(&args, "limit", 5)?;
        let issues = self
            .tracker
            .get_ready_work(WorkFilter { limit })
            .await
            .map_err(ToolError::Internal)?;
        if issues.is_empty() {
            return Ok("No ready work found".into());
        }
        Ok(issues
            .iter()
            .map(issue_line)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// ---------------------------------------------------------------------------
// get_issue
// ---------------------------------------------------------------------------

pub struct GetIssueTool {
    tracker: Arc<dyn IssueTracker>,
}

impl GetIssueTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl EngineTool for GetIssueTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_issue".into(),
            description: "Fetch one issue with every field, as JSON.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "issue_id": {
                        "type": "string",
                        "description": "ID of the issue"
                    }
                },
                "required": ["issue_id"]
            }),
        }
    }

    async fn call(
        &self,
        _cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let id = require_str(&args, "issue_id")?;
        let issue = self.tracker.get_issue(id).await.map_err(ToolError::Internal)?;
        serde_json::to_string_pretty(&issue)
            .map_err(|e| ToolError::Internal(anyhow::anyhow!("failed to render issue: {e}")))
    }
}

// ---------------------------------------------------------------------------
// get_status
// ---------------------------------------------------------------------------

pub struct GetStatusTool {
    tracker: Arc<dyn IssueTracker>,
}

impl GetStatusTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl EngineTool for GetStatusTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_status".into(),
            description: "Tracker-wide issue statistics. Takes no parameters.".into(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    async fn call(
        &self,
        _cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        reject_params(&args)?;
        let stats = self
            .tracker
            .get_statistics()
            .await
            .map_err(ToolError::Internal)?;
        Ok(stats.render())
    }
}

// ---------------------------------------------------------------------------
// get_blocked_issues
// ---------------------------------------------------------------------------

pub struct GetBlockedIssuesTool {
    tracker: Arc<dyn IssueTracker>,
}

impl GetBlockedIssuesTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl EngineTool for GetBlockedIssuesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_blocked_issues".into(),
            description: "List issues that are waiting on open blockers.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum issues to return. Defaults to 10."
                    }
                }
            }),
        }
    }

    async fn call(
        &self,
        _cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let limit = limit_or(&args, "limit", 10)?;
        // The tracker call has no limit parameter; truncate in memory.
        let mut blocked = self
            .tracker
            .get_blocked_issues()
            .await
            .map_err(ToolError::Internal)?;
        blocked.truncate(limit);
        if blocked.is_empty() {
            return Ok("No blocked issues".into());
        }
        Ok(blocked
            .iter()
            .map(|b| {
                format!(
                    "{} blocked by [{}]",
                    issue_line(&b.issue),
                    b.open_blockers.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// ---------------------------------------------------------------------------
// search_issues
// ---------------------------------------------------------------------------

pub struct SearchIssuesTool {
    tracker: Arc<dyn IssueTracker>,
}

impl SearchIssuesTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

/// Byte cap on rendered descriptions in search output.
const DESCRIPTION_PREVIEW: usize = 100;

fn preview(text: &str) -> String {
    if text.len() <= DESCRIPTION_PREVIEW {
        return text.to_string();
    }
    let mut cut = DESCRIPTION_PREVIEW;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

#[async_trait]
impl EngineTool for SearchIssuesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_issues".into(),
            description: "Search issues by text, optionally filtered by status.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Text to search for"
                    },
                    "status": {
                        "type": "string",
                        "enum": ["open", "in_progress", "blocked", "closed", "any"],
                        "description": "Status filter. Defaults to any."
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results. Defaults to 10."
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(
        &self,
        _cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let query = require_str(&args, "query")?;
        let status = status_filter(&args, "status")?;
        let limit = limit_or(&args, "limit", 10)?;

        let issues = self
            .tracker
            .search_issues(query, SearchFilter { status, limit })
            .await
            .map_err(ToolError::Internal)?;
        if issues.is_empty() {
            return Ok(format!("No issues matched {query:?}"));
        }
        Ok(issues
            .iter()
            .map(|issue| {
                if issue.description.is_empty() {
                    issue_line(issue)
                } else {
                    format!("{}\n    {}", issue_line(issue), preview(&issue.description))
                }
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

// ---------------------------------------------------------------------------
// get_recent_activity
// ---------------------------------------------------------------------------

pub struct GetRecentActivityTool {
    tracker: Arc<dyn IssueTracker>,
}

impl GetRecentActivityTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl EngineTool for GetRecentActivityTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_recent_activity".into(),
            description: "Recent agent events, optionally for one issue.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "issue_id": {
                        "type": "string",
                        "description": "Restrict to a single issue"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum events to return. Defaults to 20."
                    }
                }
            }),
        }
    }

    async fn call(
        &self,
        _cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError> {
        let limit = limit_or(&args, "limit", 20)?;
        let events = match opt_str(&args, "issue_id")? {
            Some(id) => self.tracker.get_events_for_issue(id, limit).await,
            None => self.tracker.get_recent_events(limit).await,
        }
        .map_err(ToolError::Internal)?;

        if events.is_empty() {
            return Ok("No recent activity".into());
        }
        Ok(events
            .iter()
            .map(|event| {
                // Severity is rendered only when it carries signal.
                let severity = if event.severity.is_info() {
                    String::new()
                } else {
                    format!(" [{}]", event.severity)
                };
                format!(
                    "{} {} {}{}: {}",
                    event.timestamp.to_rfc3339(),
                    event.issue_id,
                    event.kind,
                    severity,
                    event.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
