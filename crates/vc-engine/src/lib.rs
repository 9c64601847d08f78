//! Supervised execution engine for AI-orchestrated coding work.
//!
//! The engine claims issues from a tracker, spawns external coding-agent
//! subprocesses under timeout and cancellation, processes their results,
//! and feeds discovered work back into the tracker. A bounded autonomy
//! loop drives the per-issue pipeline until blocked, and a tool dispatcher
//! exposes the whole surface to a conversational LLM.

pub mod autonomy;
pub mod config;
pub mod executor;
pub mod prompt;
pub mod results;
pub mod spawner;
pub mod supervisor_http;
pub mod tools;
pub mod tracker;

pub use autonomy::{continue_until_blocked, AutonomyOptions, AutonomyReport};
pub use config::{CleanupStrategy, ConfigError, EngineConfig};
pub use executor::{ExecuteError, IssueExecutor, Stage};
pub use prompt::{
    ContextGatherer, MarkdownPromptBuilder, PromptBuilder, PromptContext, TrackerContextGatherer,
};
pub use results::{IssueExecutionResult, ResultsProcessor, StandardResultsProcessor};
pub use spawner::{
    AgentHandle, AgentKind, AgentResult, AgentSpawnConfig, AgentSpawner, SubprocessSpawner,
    AGENT_TIMEOUT,
};
pub use supervisor_http::HttpSupervisor;
pub use tools::{EngineTool, ToolDefinition, ToolDispatcher, ToolError, ToolInput, ToolReply};
pub use tracker::{
    AgentEvent, BeadsTracker, BlockedIssue, Dependency, DependencyKind, EventSeverity, Issue,
    IssueStatus, IssueTracker, IssueType, IssueUpdate, NewIssue, SearchFilter, Statistics,
    WorkFilter,
};
