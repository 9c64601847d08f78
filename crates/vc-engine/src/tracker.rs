//! Issue tracker data model and interface.
//!
//! The tracker is the engine's only shared mutable state: claims, releases,
//! and status changes all go through it, and its atomic `claim_issue` /
//! `release_and_reopen` are the synchronization primitives that keep
//! at-most-one-executor-per-issue true across processes.
//!
//! `BeadsTracker` implements the interface over the beads CLI (`bd`).
//! Tests provide an in-memory implementation.

use std::fmt;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work an issue represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Bug,
    Feature,
    Task,
    Chore,
    Epic,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Task => "task",
            Self::Chore => "chore",
            Self::Epic => "epic",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IssueType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bug" => Ok(Self::Bug),
            "feature" => Ok(Self::Feature),
            "task" => Ok(Self::Task),
            "chore" => Ok(Self::Chore),
            "epic" => Ok(Self::Epic),
            other => anyhow::bail!("unknown issue type: {other}"),
        }
    }
}

/// Lifecycle status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "closed" => Ok(Self::Closed),
            other => anyhow::bail!("unknown issue status: {other}"),
        }
    }
}

/// An issue as stored by the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub design: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    /// 0 is the highest priority, 4 the lowest.
    pub priority: u8,
    pub status: IssueStatus,
    /// Executor instance holding the claim, when in progress.
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub notes: String,
}

/// Fields for creating a new issue.
#[derive(Debug, Clone, Serialize)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub design: String,
    pub acceptance_criteria: String,
    pub issue_type: IssueType,
    pub priority: u8,
}

impl NewIssue {
    pub fn task(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            issue_type: IssueType::Task,
            priority: 2,
        }
    }
}

/// Partial update applied to an existing issue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueUpdate {
    pub status: Option<IssueStatus>,
    pub priority: Option<u8>,
    pub notes: Option<String>,
}

/// Kind of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyKind {
    /// Containment: the `from` issue is a child of the `to` epic.
    #[serde(rename = "parent-child")]
    ParentChild,
    /// Ordering: the `from` issue waits on the `to` issue.
    #[serde(rename = "blocks")]
    Blocks,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParentChild => write!(f, "parent-child"),
            Self::Blocks => write!(f, "blocks"),
        }
    }
}

/// A directed dependency edge between two issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub from_id: String,
    pub to_id: String,
    pub kind: DependencyKind,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Dependency {
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        kind: DependencyKind,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            kind,
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }
}

/// Query filter for `search_issues`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to a status; `None` searches all.
    pub status: Option<IssueStatus>,
    pub limit: usize,
}

/// Query filter for `get_ready_work`.
#[derive(Debug, Clone)]
pub struct WorkFilter {
    pub limit: usize,
}

/// A blocked issue together with its non-closed blockers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedIssue {
    pub issue: Issue,
    pub open_blockers: Vec<String>,
}

/// Tracker-wide counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub closed: usize,
}

impl Statistics {
    pub fn render(&self) -> String {
        format!(
            "Issues: {} total\n  open: {}\n  in progress: {}\n  blocked: {}\n  closed: {}",
            self.total, self.open, self.in_progress, self.blocked, self.closed
        )
    }
}

/// Severity of an agent event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn is_info(self) -> bool {
        matches!(self, Self::Info)
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// An event recorded by an agent run against an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub timestamp: DateTime<Utc>,
    pub issue_id: String,
    pub kind: String,
    pub severity: EventSeverity,
    pub message: String,
}

/// Abstraction over issue tracking backends.
///
/// Errors are opaque to the engine and propagate as-is. `claim_issue` and
/// `release_and_reopen` must be atomic at the backend.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(&self, new: NewIssue) -> Result<Issue>;
    async fn get_issue(&self, id: &str) -> Result<Issue>;
    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<()>;
    async fn close_issue(&self, id: &str, actor: &str, reason: &str) -> Result<()>;

    async fn add_dependency(&self, dependency: Dependency) -> Result<()>;
    /// Issues the given issue depends on, with their current status.
    async fn get_dependencies(&self, id: &str) -> Result<Vec<Issue>>;

    async fn search_issues(&self, query: &str, filter: SearchFilter) -> Result<Vec<Issue>>;
    /// Open issues with no non-closed blockers, priority-ordered.
    async fn get_ready_work(&self, filter: WorkFilter) -> Result<Vec<Issue>>;
    async fn get_blocked_issues(&self) -> Result<Vec<BlockedIssue>>;
    async fn get_statistics(&self) -> Result<Statistics>;

    async fn get_recent_events(&self, limit: usize) -> Result<Vec<AgentEvent>>;
    async fn get_events_for_issue(&self, id: &str, limit: usize) -> Result<Vec<AgentEvent>>;

    /// Atomically assert ownership of an open issue for `instance`.
    async fn claim_issue(&self, id: &str, instance: &str) -> Result<()>;
    /// Clear ownership without touching status.
    async fn release_issue(&self, id: &str) -> Result<()>;
    /// Atomic three-way recovery: clear ownership, set status open, append
    /// an error comment.
    async fn release_and_reopen(&self, id: &str, actor: &str, error_comment: &str) -> Result<()>;

    async fn update_execution_state(&self, id: &str, state: &str) -> Result<()>;
    async fn add_comment(&self, id: &str, actor: &str, text: &str) -> Result<()>;
}

/// Bridge to the beads CLI binary (`bd`).
///
/// beads is a binary-only tool, so every operation shells out with `--json`
/// where output is consumed. The binary name is read from `VC_BEADS_BIN`,
/// defaulting to `"bd"`.
pub struct BeadsTracker {
    bin: String,
}

impl Default for BeadsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BeadsTracker {
    pub fn new() -> Self {
        Self {
            bin: std::env::var("VC_BEADS_BIN").unwrap_or_else(|_| "bd".into()),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = tokio::process::Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run `{} {}`", self.bin, args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} {} failed: {stderr}", self.bin, args.join(" "));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_json<T: serde::de::DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let stdout = self.run(args).await?;
        serde_json::from_str(&stdout)
            .with_context(|| format!("failed to parse `{} {}` output", self.bin, args.join(" ")))
    }
}

#[async_trait]
impl IssueTracker for BeadsTracker {
    async fn create_issue(&self, new: NewIssue) -> Result<Issue> {
        let title = format!("--title={}", new.title);
        let issue_type = format!("--type={}", new.issue_type);
        let priority = format!("--priority={}", new.priority);
        let description = format!("--description={}", new.description);
        self.run_json(&["create", &title, &issue_type, &priority, &description, "--json"])
            .await
    }

    async fn get_issue(&self, id: &str) -> Result<Issue> {
        self.run_json(&["show", id, "--json"]).await
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<()> {
        let mut args = vec!["update".to_string(), id.to_string()];
        if let Some(status) = update.status {
            args.push(format!("--status={status}"));
        }
        if let Some(priority) = update.priority {
            args.push(format!("--priority={priority}"));
        }
        if let Some(notes) = update.notes {
            args.push(format!("--notes={notes}"));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args).await.map(drop)
    }

    async fn close_issue(&self, id: &str, actor: &str, reason: &str) -> Result<()> {
        let actor = format!("--actor={actor}");
        let reason = format!("--reason={reason}");
        self.run(&["close", id, &actor, &reason]).await.map(drop)
    }

    async fn add_dependency(&self, dependency: Dependency) -> Result<()> {
        let kind = format!("--type={}", dependency.kind);
        let actor = format!("--actor={}", dependency.created_by);
        self.run(&[
            "dep",
            "add",
            &dependency.from_id,
            &dependency.to_id,
            &kind,
            &actor,
        ])
        .await
        .map(drop)
    }

    async fn get_dependencies(&self, id: &str) -> Result<Vec<Issue>> {
        self.run_json(&["dep", "list", id, "--json"]).await
    }

    async fn search_issues(&self, query: &str, filter: SearchFilter) -> Result<Vec<Issue>> {
        let query = format!("--search={query}");
        let limit = format!("--limit={}", filter.limit);
        let status = filter.status.map(|s| format!("--status={s}"));
        let mut args: Vec<&str> = vec!["list", &query, &limit, "--json"];
        if let Some(ref status) = status {
            args.push(status);
        }
        self.run_json(&args).await
    }

    async fn get_ready_work(&self, filter: WorkFilter) -> Result<Vec<Issue>> {
        let limit = format!("--limit={}", filter.limit);
        self.run_json(&["ready", &limit, "--json"]).await
    }

    async fn get_blocked_issues(&self) -> Result<Vec<BlockedIssue>> {
        self.run_json(&["blocked", "--json"]).await
    }

    async fn get_statistics(&self) -> Result<Statistics> {
        self.run_json(&["stats", "--json"]).await
    }

    async fn get_recent_events(&self, limit: usize) -> Result<Vec<AgentEvent>> {
        let limit = format!("--limit={limit}");
        self.run_json(&["activity", &limit, "--json"]).await
    }

    async fn get_events_for_issue(&self, id: &str, limit: usize) -> Result<Vec<AgentEvent>> {
        let issue = format!("--issue={id}");
        let limit = format!("--limit={limit}");
        self.run_json(&["activity", &issue, &limit, "--json"]).await
    }

    async fn claim_issue(&self, id: &str, instance: &str) -> Result<()> {
        let instance = format!("--instance={instance}");
        self.run(&["claim", id, &instance]).await.map(drop)
    }

    async fn release_issue(&self, id: &str) -> Result<()> {
        self.run(&["release", id]).await.map(drop)
    }

    async fn release_and_reopen(&self, id: &str, actor: &str, error_comment: &str) -> Result<()> {
        let actor = format!("--actor={actor}");
        let comment = format!("--comment={error_comment}");
        self.run(&["release", id, "--reopen", &actor, &comment])
            .await
            .map(drop)
    }

    async fn update_execution_state(&self, id: &str, state: &str) -> Result<()> {
        let state = format!("--exec-state={state}");
        self.run(&["update", id, &state]).await.map(drop)
    }

    async fn add_comment(&self, id: &str, actor: &str, text: &str) -> Result<()> {
        let actor = format!("--actor={actor}");
        let message = format!("--message={text}");
        self.run(&["comment", id, &actor, &message]).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_type_round_trips_through_strings() {
        for (s, t) in [
            ("bug", IssueType::Bug),
            ("feature", IssueType::Feature),
            ("task", IssueType::Task),
            ("chore", IssueType::Chore),
            ("epic", IssueType::Epic),
        ] {
            assert_eq!(s.parse::<IssueType>().unwrap(), t);
            assert_eq!(t.to_string(), s);
        }
        assert!("story".parse::<IssueType>().is_err());
    }

    #[test]
    fn issue_status_serde_uses_snake_case() {
        let json = serde_json::to_string(&IssueStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let back: IssueStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(back, IssueStatus::Blocked);
    }

    #[test]
    fn issue_deserializes_with_sparse_fields() {
        let issue: Issue = serde_json::from_str(
            r#"{"id":"vc-1","title":"Fix the parser","type":"bug","priority":1,"status":"open"}"#,
        )
        .unwrap();
        assert_eq!(issue.id, "vc-1");
        assert_eq!(issue.issue_type, IssueType::Bug);
        assert!(issue.description.is_empty());
        assert!(issue.assignee.is_none());
    }

    #[test]
    fn dependency_kind_serde_uses_hyphenated_tags() {
        let json = serde_json::to_string(&DependencyKind::ParentChild).unwrap();
        assert_eq!(json, "\"parent-child\"");
    }

    #[test]
    fn statistics_render_lists_all_buckets() {
        let stats = Statistics {
            total: 10,
            open: 4,
            in_progress: 1,
            blocked: 2,
            closed: 3,
        };
        let text = stats.render();
        assert!(text.contains("10 total"));
        assert!(text.contains("blocked: 2"));
    }
}
