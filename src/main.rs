//! Dossier 命令行入口
//!
//! 子命令：run（启动运行）、resume（提交审阅决定）、continue（继续中断的运行）、cancel、show、history、pending。
//! 审阅挂起的运行保存在 SQLite 中，可在另一次进程调用里 resume。

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use dossier::config::load_config;
use dossier::workflow::{Outcome, ReviewDecision, RunState};
use dossier::{observability, OrchestratorBuilder};

#[derive(Parser)]
#[command(name = "dossier")]
#[command(version, about = "Research a topic, optionally pause for review, render a document")]
struct Cli {
    /// Extra config file layered over config/default.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run
    Run {
        query: String,
        /// Defaults to a fresh UUID
        #[arg(long)]
        thread_id: Option<String>,
        /// Approve the research review automatically
        #[arg(long)]
        auto_approve: bool,
        /// Skip the review step entirely
        #[arg(long, conflicts_with = "auto_approve")]
        no_review: bool,
    },
    /// Submit a review decision for a suspended run
    Resume {
        thread_id: String,
        #[arg(long, conflicts_with = "reject", required_unless_present = "reject")]
        approve: bool,
        #[arg(long)]
        reject: bool,
        #[arg(long, default_value = "")]
        comments: String,
    },
    /// Drive a run that was interrupted mid-step (e.g. the process exited)
    Continue { thread_id: String },
    /// Cancel a run
    Cancel { thread_id: String },
    /// Print the latest state of a run as JSON
    Show { thread_id: String },
    /// Print the update journal of a run, one JSON object per line
    History { thread_id: String },
    /// List runs awaiting review
    Pending,
}

fn print_summary(state: &RunState) {
    println!("thread_id: {}", state.thread_id);
    match state.outcome {
        Some(Outcome::Completed) => {
            if let Some(path) = state.document_path() {
                println!("completed: {}", path.display());
            }
        }
        Some(Outcome::Failed) => {
            let reason = state
                .error
                .as_ref()
                .map(|e| format!("{} at {}: {}", e.kind, e.step, e.message))
                .unwrap_or_default();
            println!("failed: {}", reason);
        }
        Some(outcome) => println!("{}", outcome),
        None if state.is_awaiting_review() => {
            println!("awaiting review");
            if let Some(request) = &state.pending_review {
                println!("{}", request.content);
            }
            println!(
                "submit with: dossier resume {} --approve | --reject --comments \"...\"",
                state.thread_id
            );
        }
        None => println!("in progress"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.clone()).context("Failed to load config")?;
    if let Commands::Run {
        auto_approve,
        no_review,
        ..
    } = &cli.command
    {
        config.workflow.auto_approve |= *auto_approve;
        if *no_review {
            config.workflow.review_required = false;
        }
    }

    let orchestrator = OrchestratorBuilder::from_config(&config)
        .context("Failed to assemble pipeline")?
        .build()
        .context("Failed to build orchestrator")?;

    match cli.command {
        Commands::Run { query, thread_id, .. } => {
            let thread_id = thread_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let state = orchestrator
                .process(&query, &thread_id)
                .await
                .with_context(|| format!("Run {} failed", thread_id))?;
            print_summary(&state);
        }
        Commands::Resume {
            thread_id,
            approve,
            comments,
            ..
        } => {
            let decision = if approve {
                ReviewDecision::approve(comments)
            } else {
                ReviewDecision::reject(comments)
            };
            let state = orchestrator
                .resume_review(&thread_id, decision)
                .await
                .with_context(|| format!("Resume {} failed", thread_id))?;
            print_summary(&state);
        }
        Commands::Continue { thread_id } => {
            let state = orchestrator
                .continue_run(&thread_id)
                .await
                .with_context(|| format!("Continue {} failed", thread_id))?;
            print_summary(&state);
        }
        Commands::Cancel { thread_id } => {
            let state = orchestrator
                .cancel(&thread_id)
                .await
                .with_context(|| format!("Cancel {} failed", thread_id))?;
            print_summary(&state);
        }
        Commands::Show { thread_id } => {
            let state = orchestrator.snapshot(&thread_id).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::History { thread_id } => {
            for update in orchestrator.history(&thread_id).await? {
                println!("{}", serde_json::to_string(&update)?);
            }
        }
        Commands::Pending => {
            for thread_id in orchestrator.awaiting_review().await? {
                println!("{}", thread_id);
            }
        }
    }

    Ok(())
}
