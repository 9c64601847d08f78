//! Tool dispatch: the bridge between a conversational LLM's tool-use
//! protocol and the engine's operations.
//!
//! Each tool carries a name, a description, and a JSON-schema parameter
//! spec; the catalog is the wire contract to the model and is emitted
//! verbatim. Handler errors become flagged tool results; a bad tool call
//! never aborts the conversation.

pub mod execution_tools;
pub mod issue_tools;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::executor::IssueExecutor;
use crate::tracker::{IssueStatus, IssueTracker, IssueType};

/// A tool's wire description, emitted verbatim to the LLM.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Tool-layer failures. All of these surface as flagged tool results.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool input: {0}")]
    InvalidInput(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Raw tool input as it arrives from the conversation transport.
///
/// Transports deliver arguments three ways: already decoded, as raw JSON
/// bytes, or as a deferred payload decoded lazily. All three funnel into a
/// JSON object; any other shape is rejected.
pub enum ToolInput {
    Map(Map<String, Value>),
    Bytes(Vec<u8>),
    Raw(Box<serde_json::value::RawValue>),
}

impl ToolInput {
    fn decode(self) -> Result<Map<String, Value>, ToolError> {
        let value = match self {
            Self::Map(map) => return Ok(map),
            Self::Bytes(bytes) => {
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    // Transports send empty payloads for zero-argument tools.
                    return Ok(Map::new());
                }
                serde_json::from_slice(&bytes)
                    .map_err(|e| ToolError::InvalidInput(format!("undecodable JSON bytes: {e}")))?
            }
            Self::Raw(raw) => {
                let text = raw.get();
                if text.trim().is_empty() {
                    return Ok(Map::new());
                }
                serde_json::from_str(text)
                    .map_err(|e| ToolError::InvalidInput(format!("undecodable JSON payload: {e}")))?
            }
        };
        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            other => Err(ToolError::InvalidInput(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Result delivered back to the conversation transport.
#[derive(Debug, Clone)]
pub struct ToolReply {
    pub text: String,
    pub is_error: bool,
}

/// A named, schema-described engine operation callable by the LLM.
#[async_trait]
pub trait EngineTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(
        &self,
        cancel: &CancellationToken,
        args: Map<String, Value>,
    ) -> Result<String, ToolError>;
}

/// Routes `(name, input)` pairs to registered tools.
pub struct ToolDispatcher {
    tools: Vec<Arc<dyn EngineTool>>,
}

impl ToolDispatcher {
    pub fn new(tools: Vec<Arc<dyn EngineTool>>) -> Self {
        Self { tools }
    }

    /// The full catalog wired to a tracker and executor.
    pub fn standard(tracker: Arc<dyn IssueTracker>, executor: Arc<IssueExecutor>) -> Self {
        Self::new(vec![
            Arc::new(issue_tools::CreateIssueTool::new(tracker.clone())),
            Arc::new(issue_tools::CreateEpicTool::new(tracker.clone())),
            Arc::new(issue_tools::AddChildToEpicTool::new(tracker.clone())),
            Arc::new(issue_tools::GetReadyWorkTool::new(tracker.clone())),
            Arc::new(issue_tools::GetIssueTool::new(tracker.clone())),
            Arc::new(issue_tools::GetStatusTool::new(tracker.clone())),
            Arc::new(issue_tools::GetBlockedIssuesTool::new(tracker.clone())),
            Arc::new(issue_tools::SearchIssuesTool::new(tracker.clone())),
            Arc::new(issue_tools::GetRecentActivityTool::new(tracker.clone())),
            Arc::new(execution_tools::ContinueExecutionTool::new(
                tracker.clone(),
                executor.clone(),
            )),
            Arc::new(execution_tools::ContinueUntilBlockedTool::new(
                tracker, executor,
            )),
        ])
    }

    /// The catalog in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Dispatch one tool call. Never fails the conversation: every error is
    /// folded into a flagged [`ToolReply`].
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        name: &str,
        input: ToolInput,
    ) -> ToolReply {
        let outcome = self.dispatch_inner(cancel, name, input).await;
        match outcome {
            Ok(text) => {
                info!(tool = name, outcome = "success", "Tool invocation");
                ToolReply {
                    text,
                    is_error: false,
                }
            }
            Err(e) => {
                info!(tool = name, outcome = "error", "Tool invocation");
                ToolReply {
                    text: e.to_string(),
                    is_error: true,
                }
            }
        }
    }

    async fn dispatch_inner(
        &self,
        cancel: &CancellationToken,
        name: &str,
        input: ToolInput,
    ) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.definition().name == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = input.decode()?;
        tool.call(cancel, args).await
    }
}

// ── Argument extraction helpers ──────────────────────────────────────────────

/// Reject any parameters at all: used by tools that take none.
pub(crate) fn reject_params(args: &Map<String, Value>) -> Result<(), ToolError> {
    if args.is_empty() {
        Ok(())
    } else {
        let keys: Vec<&str> = args.keys().map(String::as_str).collect();
        Err(ToolError::InvalidInput(format!(
            "takes no parameters, got: {}",
            keys.join(", ")
        )))
    }
}

pub(crate) fn require_str<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    opt_str(args, key)?
        .ok_or_else(|| ToolError::InvalidInput(format!("missing required parameter: {key}")))
}

pub(crate) fn opt_str<'a>(
    args: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ToolError::InvalidInput(format!(
            "{key} must be a string, got {}",
            json_kind(other)
        ))),
    }
}

/// Narrow a JSON number to an integer. Tool-use transports deliver numbers
/// as 64-bit floats, so `5.0` must round-trip to `5` while `5.5` fails.
pub(crate) fn opt_int(args: &Map<String, Value>, key: &str) -> Result<Option<i64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i))
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(Some(f as i64))
                } else {
                    Err(ToolError::InvalidInput(format!(
                        "{key} must be an integer, got {f}"
                    )))
                }
            } else {
                Err(ToolError::InvalidInput(format!("{key} is not a number")))
            }
        }
        Some(other) => Err(ToolError::InvalidInput(format!(
            "{key} must be a number, got {}",
            json_kind(other)
        ))),
    }
}

pub(crate) fn int_or(args: &Map<String, Value>, key: &str, default: i64) -> Result<i64, ToolError> {
    Ok(opt_int(args, key)?.unwrap_or(default))
}

pub(crate) fn bool_or(
    args: &Map<String, Value>,
    key: &str,
    default: bool,
) -> Result<bool, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ToolError::InvalidInput(format!(
            "{key} must be a boolean, got {}",
            json_kind(other)
        ))),
    }
}

/// Positive limit with a default, bounded to keep replies readable.
pub(crate) fn limit_or(
    args: &Map<String, Value>,
    key: &str,
    default: usize,
) -> Result<usize, ToolError> {
    let value = int_or(args, key, default as i64)?;
    if value < 1 {
        return Err(ToolError::InvalidInput(format!(
            "{key} must be at least 1, got {value}"
        )));
    }
    Ok(value as usize)
}

/// Priority in [0, 4], narrowed from a float.
pub(crate) fn priority_or(
    args: &Map<String, Value>,
    key: &str,
    default: u8,
) -> Result<u8, ToolError> {
    let value = int_or(args, key, i64::from(default))?;
    if !(0..=4).contains(&value) {
        return Err(ToolError::InvalidInput(format!(
            "{key} must be between 0 and 4, got {value}"
        )));
    }
    Ok(value as u8)
}

/// Issue type from the creatable set. Epics have their own tool.
pub(crate) fn issue_type_or(
    args: &Map<String, Value>,
    key: &str,
    default: IssueType,
) -> Result<IssueType, ToolError> {
    match opt_str(args, key)? {
        None => Ok(default),
        Some("bug") => Ok(IssueType::Bug),
        Some("feature") => Ok(IssueType::Feature),
        Some("task") => Ok(IssueType::Task),
        Some("chore") => Ok(IssueType::Chore),
        Some(other) => Err(ToolError::InvalidInput(format!(
            "{key} must be one of bug, feature, task, chore; got {other:?}"
        ))),
    }
}

/// Status filter: a concrete status or "any" / absent for no filter.
pub(crate) fn status_filter(
    args: &Map<String, Value>,
    key: &str,
) -> Result<Option<IssueStatus>, ToolError> {
    match opt_str(args, key)? {
        None | Some("any") => Ok(None),
        Some(s) => s
            .parse::<IssueStatus>()
            .map(Some)
            .map_err(|_| {
                ToolError::InvalidInput(format!(
                    "{key} must be one of open, in_progress, blocked, closed, any; got {s:?}"
                ))
            }),
    }
}
