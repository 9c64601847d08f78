use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vc_engine::{
    continue_until_blocked, AutonomyOptions, BeadsTracker, EngineConfig, ExecuteError,
    IssueExecutor, IssueTracker, MarkdownPromptBuilder, StandardResultsProcessor,
    SubprocessSpawner, ToolDispatcher, TrackerContextGatherer,
};

#[derive(Parser)]
#[command(name = "vc-engine", about = "Supervised execution engine for coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a single issue through the agent pipeline.
    Execute {
        /// Issue ID to execute.
        issue_id: String,
    },
    /// Execute ready issues until blocked.
    Run {
        #[arg(long, default_value_t = 10)]
        max_iterations: u32,
        #[arg(long, default_value_t = 120)]
        timeout_minutes: u32,
        #[arg(long, default_value_t = 3)]
        error_threshold: u32,
    },
    /// Print tracker statistics.
    Status,
    /// Print the tool catalog as JSON.
    Tools,
}

fn build_executor(config: &EngineConfig, tracker: Arc<dyn IssueTracker>) -> Result<IssueExecutor> {
    let working_dir = std::env::current_dir()?;
    Ok(IssueExecutor::new(
        tracker.clone(),
        Arc::new(SubprocessSpawner),
        Arc::new(TrackerContextGatherer::new(tracker.clone())),
        Arc::new(MarkdownPromptBuilder),
        Arc::new(StandardResultsProcessor::new(tracker, &config.actor)),
        &config.actor,
        working_dir,
    )
    .with_debug_prompts(config.debug_prompts))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    let cli = Cli::parse();
    let tracker: Arc<dyn IssueTracker> = Arc::new(BeadsTracker::new());

    // Ctrl-C cancels in-flight work cooperatively; agents get a kill signal.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, canceling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Execute { issue_id } => {
            let executor = build_executor(&config, tracker)?;
            match executor.execute(&cancel, &issue_id).await {
                Ok(result) => {
                    info!(
                        issue = %issue_id,
                        completed = result.completed,
                        gates_passed = result.gates_passed,
                        "Execution finished"
                    );
                    println!(
                        "completed={} gates_passed={} discovered=[{}]",
                        result.completed,
                        result.gates_passed,
                        result.discovered.join(", ")
                    );
                }
                Err(ExecuteError::Rejected(refusal)) => println!("{refusal}"),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Run {
            max_iterations,
            timeout_minutes,
            error_threshold,
        } => {
            let executor = build_executor(&config, tracker.clone())?;
            let options = AutonomyOptions {
                max_iterations,
                timeout_minutes,
                error_threshold,
            };
            let report =
                continue_until_blocked(&cancel, &executor, tracker.as_ref(), options).await?;
            println!("{}", report.render());
        }
        Command::Status => {
            let stats = tracker.get_statistics().await?;
            println!("{}", stats.render());
        }
        Command::Tools => {
            let executor = Arc::new(build_executor(&config, tracker.clone())?);
            let dispatcher = ToolDispatcher::standard(tracker, executor);
            println!("{}", serde_json::to_string_pretty(&dispatcher.definitions())?);
        }
    }

    Ok(())
}
