//! Prompt construction: gather context for an issue, render it to a single
//! prompt string for the agent subprocess.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::tracker::{Issue, IssueStatus, IssueTracker};

/// Everything the prompt builder needs about an issue.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub issue: Issue,
    /// Dependencies that are not yet closed, for the agent's awareness.
    pub open_dependencies: Vec<Issue>,
}

/// Produce a structured context from an issue and linked tracker data.
#[async_trait]
pub trait ContextGatherer: Send + Sync {
    async fn gather(&self, cancel: &CancellationToken, issue: &Issue) -> Result<PromptContext>;
}

/// Render a gathered context into one prompt string.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, context: &PromptContext) -> Result<String>;
}

/// Gatherer backed by the issue tracker.
pub struct TrackerContextGatherer {
    tracker: Arc<dyn IssueTracker>,
}

impl TrackerContextGatherer {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl ContextGatherer for TrackerContextGatherer {
    async fn gather(&self, _cancel: &CancellationToken, issue: &Issue) -> Result<PromptContext> {
        let open_dependencies = self
            .tracker
            .get_dependencies(&issue.id)
            .await?
            .into_iter()
            .filter(|dep| dep.status != IssueStatus::Closed)
            .collect();
        Ok(PromptContext {
            issue: issue.clone(),
            open_dependencies,
        })
    }
}

/// Default markdown prompt rendering.
#[derive(Debug, Default)]
pub struct MarkdownPromptBuilder;

impl PromptBuilder for MarkdownPromptBuilder {
    fn build(&self, context: &PromptContext) -> Result<String> {
        let issue = &context.issue;
        let mut prompt = String::new();

        prompt.push_str(&format!("# Task: {}\n\n", issue.title));
        prompt.push_str(&format!(
            "**Issue:** {} | **Type:** {} | **Priority:** P{}\n\n",
            issue.id, issue.issue_type, issue.priority
        ));

        if !issue.description.is_empty() {
            prompt.push_str("## Description\n");
            prompt.push_str(&issue.description);
            prompt.push_str("\n\n");
        }

        if !issue.design.is_empty() {
            prompt.push_str("## Design\n");
            prompt.push_str(&issue.design);
            prompt.push_str("\n\n");
        }

        if !issue.acceptance_criteria.is_empty() {
            prompt.push_str("## Acceptance Criteria\n");
            prompt.push_str(&issue.acceptance_criteria);
            prompt.push_str("\n\n");
        }

        if !issue.notes.is_empty() {
            prompt.push_str("## Notes\n");
            prompt.push_str(&issue.notes);
            prompt.push_str("\n\n");
        }

        if !context.open_dependencies.is_empty() {
            prompt.push_str("## Related open dependencies\n");
            for dep in &context.open_dependencies {
                prompt.push_str(&format!("- {} ({}): {}\n", dep.id, dep.status, dep.title));
            }
            prompt.push('\n');
        }

        prompt.push_str(
            "## Reporting\n\
             When you finish, print a final summary. Report each piece of newly \
             discovered follow-on work on its own line as `DISCOVERED: <title>`. \
             If quality gates (tests, lint) fail and you cannot fix them, print \
             `GATES: fail`. If the task is only partially done, print \
             `STATUS: partial`.\n",
        );

        Ok(prompt)
    }
}
