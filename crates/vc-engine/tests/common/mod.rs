#![allow(dead_code)]

//! Shared test doubles: an in-memory tracker and a scripted agent spawner.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use vc_engine::{
    AgentEvent, AgentHandle, AgentResult, AgentSpawnConfig, AgentSpawner, BlockedIssue,
    Dependency, DependencyKind, Issue, IssueStatus, IssueTracker, IssueType, IssueUpdate,
    NewIssue, SearchFilter, Statistics, WorkFilter,
};

// ---------------------------------------------------------------------------
// MemoryTracker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TrackerState {
    issues: HashMap<String, Issue>,
    dependencies: Vec<Dependency>,
    comments: HashMap<String, Vec<String>>,
    events: Vec<AgentEvent>,
    exec_states: HashMap<String, String>,
    next_id: u32,
}

/// In-memory `IssueTracker` with atomic claim semantics and failure knobs.
#[derive(Default)]
pub struct MemoryTracker {
    state: Mutex<TrackerState>,
    /// When set, `get_ready_work` fails (simulates a dead store).
    pub fail_ready: AtomicBool,
    /// When set, `claim_issue` fails (simulates a lost race).
    pub fail_claim: AtomicBool,
    /// Total successful claims, for at-most-one-executor assertions.
    pub claims: AtomicUsize,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, issue: Issue) {
        self.state.lock().await.issues.insert(issue.id.clone(), issue);
    }

    pub async fn insert_event(&self, event: AgentEvent) {
        self.state.lock().await.events.push(event);
    }

    pub async fn issue(&self, id: &str) -> Issue {
        self.state.lock().await.issues[id].clone()
    }

    pub async fn comments(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .comments
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn dependency_count(&self) -> usize {
        self.state.lock().await.dependencies.len()
    }

    pub async fn dependencies(&self) -> Vec<Dependency> {
        self.state.lock().await.dependencies.clone()
    }
}

pub fn issue(id: &str, title: &str, status: IssueStatus, priority: u8) -> Issue {
    Issue {
        id: id.into(),
        title: title.into(),
        description: String::new(),
        design: String::new(),
        acceptance_criteria: String::new(),
        issue_type: IssueType::Task,
        priority,
        status,
        assignee: None,
        notes: String::new(),
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    async fn create_issue(&self, new: NewIssue) -> Result<Issue> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let created = Issue {
            id: format!("vc-{}", state.next_id),
            title: new.title,
            description: new.description,
            design: new.design,
            acceptance_criteria: new.acceptance_criteria,
            issue_type: new.issue_type,
            priority: new.priority,
            status: IssueStatus::Open,
            assignee: None,
            notes: String::new(),
        };
        state.issues.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_issue(&self, id: &str) -> Result<Issue> {
        self.state
            .lock()
            .await
            .issues
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such issue: {id}"))
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        let issue = state
            .issues
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("no such issue: {id}"))?;
        if let Some(status) = update.status {
            issue.status = status;
        }
        if let Some(priority) = update.priority {
            issue.priority = priority;
        }
        if let Some(notes) = update.notes {
            issue.notes = notes;
        }
        Ok(())
    }

    async fn close_issue(&self, id: &str, _actor: &str, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let issue = state
            .issues
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("no such issue: {id}"))?;
        issue.status = IssueStatus::Closed;
        issue.assignee = None;
        state
            .comments
            .entry(id.to_string())
            .or_default()
            .push(reason.to_string());
        Ok(())
    }

    async fn add_dependency(&self, dependency: Dependency) -> Result<()> {
        self.state.lock().await.dependencies.push(dependency);
        Ok(())
    }

    async fn get_dependencies(&self, id: &str) -> Result<Vec<Issue>> {
        let state = self.state.lock().await;
        Ok(state
            .dependencies
            .iter()
            .filter(|d| d.from_id == id)
            .filter_map(|d| state.issues.get(&d.to_id).cloned())
            .collect())
    }

    async fn search_issues(&self, query: &str, filter: SearchFilter) -> Result<Vec<Issue>> {
        let state = self.state.lock().await;
        let needle = query.to_lowercase();
        let mut matches: Vec<Issue> = state
            .issues
            .values()
            .filter(|i| {
                i.title.to_lowercase().contains(&needle)
                    || i.description.to_lowercase().contains(&needle)
            })
            .filter(|i| filter.status.map(|s| i.status == s).unwrap_or(true))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches.truncate(filter.limit);
        Ok(matches)
    }

    async fn get_ready_work(&self, filter: WorkFilter) -> Result<Vec<Issue>> {
        if self.fail_ready.load(Ordering::SeqCst) {
            anyhow::bail!("tracker unavailable");
        }
        let state = self.state.lock().await;
        let mut ready: Vec<Issue> = state
            .issues
            .values()
            .filter(|i| i.status == IssueStatus::Open)
            .filter(|i| {
                // An issue is ready when every blocks-edge target is closed.
                !state.dependencies.iter().any(|d| {
                    d.from_id == i.id
                        && d.kind == DependencyKind::Blocks
                        && state
                            .issues
                            .get(&d.to_id)
                            .map(|dep| dep.status != IssueStatus::Closed)
                            .unwrap_or(false)
                })
            })
            .cloned()
            .collect();
        ready.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        ready.truncate(filter.limit);
        Ok(ready)
    }

    async fn get_blocked_issues(&self) -> Result<Vec<BlockedIssue>> {
        let state = self.state.lock().await;
        Ok(state
            .issues
            .values()
            .filter(|i| i.status == IssueStatus::Blocked)
            .map(|i| BlockedIssue {
                issue: i.clone(),
                open_blockers: state
                    .dependencies
                    .iter()
                    .filter(|d| d.from_id == i.id && d.kind == DependencyKind::Blocks)
                    .filter(|d| {
                        state
                            .issues
                            .get(&d.to_id)
                            .map(|dep| dep.status != IssueStatus::Closed)
                            .unwrap_or(false)
                    })
                    .map(|d| d.to_id.clone())
                    .collect(),
            })
            .collect())
    }

    async fn get_statistics(&self) -> Result<Statistics> {
        let state = self.state.lock().await;
        let mut stats = Statistics {
            total: state.issues.len(),
            ..Default::default()
        };
        for issue in state.issues.values() {
            match issue.status {
                IssueStatus::Open => stats.open += 1,
                IssueStatus::InProgress => stats.in_progress += 1,
                IssueStatus::Blocked => stats.blocked += 1,
                IssueStatus::Closed => stats.closed += 1,
            }
        }
        Ok(stats)
    }

    async fn get_recent_events(&self, limit: usize) -> Result<Vec<AgentEvent>> {
        let state = self.state.lock().await;
        Ok(state.events.iter().rev().take(limit).cloned().collect())
    }

    async fn get_events_for_issue(&self, id: &str, limit: usize) -> Result<Vec<AgentEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.issue_id == id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim_issue(&self, id: &str, instance: &str) -> Result<()> {
        if self.fail_claim.load(Ordering::SeqCst) {
            anyhow::bail!("claim rejected by store");
        }
        let mut state = self.state.lock().await;
        let issue = state
            .issues
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("no such issue: {id}"))?;
        if issue.status != IssueStatus::Open || issue.assignee.is_some() {
            anyhow::bail!("issue {id} is not claimable");
        }
        issue.status = IssueStatus::InProgress;
        issue.assignee = Some(instance.to_string());
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release_issue(&self, id: &str) -> Result<()> {
        // Clears ownership only; status is untouched.
        let mut state = self.state.lock().await;
        let issue = state
            .issues
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("no such issue: {id}"))?;
        issue.assignee = None;
        Ok(())
    }

    async fn release_and_reopen(&self, id: &str, _actor: &str, error_comment: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        let issue = state
            .issues
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("no such issue: {id}"))?;
        issue.assignee = None;
        issue.status = IssueStatus::Open;
        state
            .comments
            .entry(id.to_string())
            .or_default()
            .push(error_comment.to_string());
        Ok(())
    }

    async fn update_execution_state(&self, id: &str, exec_state: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .exec_states
            .insert(id.to_string(), exec_state.to_string());
        Ok(())
    }

    async fn add_comment(&self, id: &str, _actor: &str, text: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .comments
            .entry(id.to_string())
            .or_default()
            .push(text.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedSpawner
// ---------------------------------------------------------------------------

/// One scripted agent run.
pub enum ScriptedRun {
    /// Spawn succeeds, wait yields this result.
    Finish(AgentResult),
    /// Spawn itself fails.
    SpawnFailure(&'static str),
    /// Spawn succeeds, wait fails.
    WaitFailure(&'static str),
}

/// Spawner that replays a queue of scripted runs in order.
pub struct ScriptedSpawner {
    runs: Mutex<VecDeque<ScriptedRun>>,
    pub spawned: AtomicUsize,
}

impl ScriptedSpawner {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            spawned: AtomicUsize::new(0),
        }
    }

    /// A spawner whose every run succeeds with the given output lines.
    pub fn always(output_lines: Vec<&str>) -> Self {
        let result = agent_output(output_lines);
        Self {
            runs: Mutex::new(
                std::iter::repeat_with(|| ScriptedRun::Finish(result.clone()))
                    .take(64)
                    .collect(),
            ),
            spawned: AtomicUsize::new(0),
        }
    }
}

pub fn agent_output(lines: Vec<&str>) -> AgentResult {
    AgentResult {
        success: true,
        exit_code: 0,
        output_lines: lines.into_iter().map(String::from).collect(),
        error_lines: vec![],
        duration: Duration::from_millis(10),
    }
}

pub fn agent_failure(lines: Vec<&str>) -> AgentResult {
    AgentResult {
        success: false,
        exit_code: 1,
        output_lines: vec![],
        error_lines: lines.into_iter().map(String::from).collect(),
        duration: Duration::from_millis(10),
    }
}

struct ScriptedHandle {
    outcome: Result<AgentResult>,
}

#[async_trait]
impl AgentHandle for ScriptedHandle {
    async fn wait(self: Box<Self>, _cancel: &CancellationToken) -> Result<AgentResult> {
        self.outcome
    }
}

#[async_trait]
impl AgentSpawner for ScriptedSpawner {
    async fn spawn(
        &self,
        _cancel: &CancellationToken,
        _config: AgentSpawnConfig,
        _prompt: &str,
    ) -> Result<Box<dyn AgentHandle>> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let run = self
            .runs
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted spawner ran out of runs"))?;
        match run {
            ScriptedRun::Finish(result) => Ok(Box::new(ScriptedHandle {
                outcome: Ok(result),
            })),
            ScriptedRun::SpawnFailure(message) => Err(anyhow::anyhow!(message)),
            ScriptedRun::WaitFailure(message) => Ok(Box::new(ScriptedHandle {
                outcome: Err(anyhow::anyhow!(message)),
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor wiring
// ---------------------------------------------------------------------------

/// Build an executor over the shared doubles with the standard gatherer,
/// builder, and results processor.
pub fn executor(
    tracker: Arc<MemoryTracker>,
    spawner: Arc<ScriptedSpawner>,
) -> vc_engine::IssueExecutor {
    vc_engine::IssueExecutor::new(
        tracker.clone(),
        spawner,
        Arc::new(vc_engine::TrackerContextGatherer::new(tracker.clone())),
        Arc::new(vc_engine::MarkdownPromptBuilder),
        Arc::new(vc_engine::StandardResultsProcessor::new(tracker, "vc")),
        "vc",
        "/tmp",
    )
}

pub fn event(issue_id: &str, kind: &str, severity: vc_engine::EventSeverity, message: &str) -> AgentEvent {
    AgentEvent {
        timestamp: Utc::now(),
        issue_id: issue_id.into(),
        kind: kind.into(),
        severity,
        message: message.into(),
    }
}
