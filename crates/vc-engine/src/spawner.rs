//! Agent subprocess spawning and supervision.
//!
//! A spawned agent is an external coding CLI run against a working
//! directory with a single prompt on stdin. Stdout is streamed to the
//! diagnostic log in real time while the handle accumulates it; the child
//! is killed on cancellation or when the per-issue ceiling expires.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Hard per-issue ceiling for an agent run. A design constant, not a
/// tunable: raising it is a deliberate code change.
pub const AGENT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Which agent CLI to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    ClaudeCode,
}

impl AgentKind {
    /// Program name and fixed arguments for a one-shot non-interactive run.
    fn command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::ClaudeCode => ("claude", &["-p", "--output-format", "text"]),
        }
    }
}

/// Configuration for one agent run.
#[derive(Debug, Clone)]
pub struct AgentSpawnConfig {
    pub kind: AgentKind,
    pub working_dir: PathBuf,
    pub issue_id: String,
    /// Structured event streaming. The execution pipeline runs with this
    /// off; raw stdout is logged either way.
    pub stream: bool,
    pub timeout: Duration,
}

impl AgentSpawnConfig {
    pub fn for_issue(working_dir: impl Into<PathBuf>, issue_id: impl Into<String>) -> Self {
        Self {
            kind: AgentKind::ClaudeCode,
            working_dir: working_dir.into(),
            issue_id: issue_id.into(),
            stream: false,
            timeout: AGENT_TIMEOUT,
        }
    }
}

/// Outcome of a finished (or killed) agent subprocess.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub success: bool,
    pub exit_code: i32,
    pub output_lines: Vec<String>,
    pub error_lines: Vec<String>,
    pub duration: Duration,
}

/// A running agent. `wait` consumes the handle.
#[async_trait]
pub trait AgentHandle: Send {
    async fn wait(self: Box<Self>, cancel: &CancellationToken) -> Result<AgentResult>;
}

/// Launch an agent subprocess for a prompt.
#[async_trait]
pub trait AgentSpawner: Send + Sync {
    async fn spawn(
        &self,
        cancel: &CancellationToken,
        config: AgentSpawnConfig,
        prompt: &str,
    ) -> Result<Box<dyn AgentHandle>>;
}

/// Real subprocess spawner over [`tokio::process`].
#[derive(Debug, Default)]
pub struct SubprocessSpawner;

struct SubprocessHandle {
    child: tokio::process::Child,
    stdout_task: JoinHandle<Vec<String>>,
    stderr_task: JoinHandle<Vec<String>>,
    issue_id: String,
    timeout: Duration,
    started: Instant,
}

/// Read lines from a child stream, mirroring each to the diagnostic log.
fn collect_lines<R>(reader: R, issue_id: String, stream_name: &'static str) -> JoinHandle<Vec<String>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(reader).lines();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    info!(issue = %issue_id, stream = stream_name, "{line}");
                    lines.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(issue = %issue_id, stream = stream_name, "read error: {e}");
                    break;
                }
            }
        }
        lines
    })
}

#[async_trait]
impl AgentSpawner for SubprocessSpawner {
    async fn spawn(
        &self,
        _cancel: &CancellationToken,
        config: AgentSpawnConfig,
        prompt: &str,
    ) -> Result<Box<dyn AgentHandle>> {
        let (program, args) = config.kind.command();
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program} for issue {}", config.issue_id))?;

        // Hand the prompt over on stdin from a task: a prompt larger than
        // the pipe buffer must not deadlock against unread agent output.
        let mut stdin = child
            .stdin
            .take()
            .context("agent child has no stdin pipe")?;
        let prompt = prompt.to_string();
        let stdin_issue = config.issue_id.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                warn!(issue = %stdin_issue, "failed to write prompt to agent stdin: {e}");
            }
            // Dropping stdin closes the pipe and signals end of input.
        });

        let stdout = child
            .stdout
            .take()
            .context("agent child has no stdout pipe")?;
        let stderr = child
            .stderr
            .take()
            .context("agent child has no stderr pipe")?;

        info!(
            issue = %config.issue_id,
            program,
            working_dir = %config.working_dir.display(),
            timeout_secs = config.timeout.as_secs(),
            "Agent spawned"
        );

        Ok(Box::new(SubprocessHandle {
            stdout_task: collect_lines(stdout, config.issue_id.clone(), "stdout"),
            stderr_task: collect_lines(stderr, config.issue_id.clone(), "stderr"),
            child,
            issue_id: config.issue_id,
            timeout: config.timeout,
            started: Instant::now(),
        }))
    }
}

impl SubprocessHandle {
    async fn drain(self) -> (Vec<String>, Vec<String>) {
        let output_lines = self.stdout_task.await.unwrap_or_default();
        let error_lines = self.stderr_task.await.unwrap_or_default();
        (output_lines, error_lines)
    }
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Canceled,
    TimedOut,
}

#[async_trait]
impl AgentHandle for SubprocessHandle {
    async fn wait(mut self: Box<Self>, cancel: &CancellationToken) -> Result<AgentResult> {
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        // `Child::wait` is cancel-safe, so racing it and killing afterwards
        // loses nothing.
        let outcome = tokio::select! {
            status = self.child.wait() => WaitOutcome::Exited(status),
            _ = cancel.cancelled() => WaitOutcome::Canceled,
            _ = &mut deadline => WaitOutcome::TimedOut,
        };

        match outcome {
            WaitOutcome::Canceled => {
                warn!(issue = %self.issue_id, "Cancellation requested, terminating agent");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
                anyhow::bail!("agent run for issue {} was canceled", self.issue_id)
            }
            WaitOutcome::TimedOut => {
                warn!(
                    issue = %self.issue_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Agent exceeded its time ceiling, terminating"
                );
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
                let duration = self.started.elapsed();
                let timeout = self.timeout;
                let (output_lines, mut error_lines) = self.drain().await;
                error_lines.push(format!(
                    "agent terminated after exceeding the {}s ceiling",
                    timeout.as_secs()
                ));
                Ok(AgentResult {
                    success: false,
                    exit_code: -1,
                    output_lines,
                    error_lines,
                    duration,
                })
            }
            WaitOutcome::Exited(status) => {
                let status = status.context("failed to wait for agent subprocess")?;
                let duration = self.started.elapsed();
                let issue_id = self.issue_id.clone();
                let (output_lines, error_lines) = self.drain().await;
                let exit_code = status.code().unwrap_or(-1);
                info!(
                    issue = %issue_id,
                    exit_code,
                    duration_secs = duration.as_secs(),
                    output_lines = output_lines.len(),
                    "Agent exited"
                );
                Ok(AgentResult {
                    success: status.success(),
                    exit_code,
                    output_lines,
                    error_lines,
                    duration,
                })
            }
        }
    }
}
