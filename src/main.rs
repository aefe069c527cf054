//! `fixloop` - unattended find-fix-verify loop for AI coding agents.
//!
//! Entry point for the application.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info};

use fixloop::cli::Args;
use fixloop::console;
use fixloop::core::{
    ProcessSlot, Runner, RunnerOptions, ShellCommandRunner, StreamingAgent, check_agent_command,
};
use fixloop::fs::Environment;
use fixloop::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            console::error(&format!("Error: {e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    let env = Environment::discover(&cwd)?;

    if args.list {
        println!("Available tasks in {}:", env.runner_dir.display());
        for (name, task) in &env.tasks {
            println!("  {name:30} [{}]", task.mode());
        }
        return Ok(());
    }

    let name = args.task.as_deref().context("no task given")?;
    let task = env.task(name)?.clone();
    let agent_command = env.agent_command_for(&task).to_string();

    if !args.dry_run {
        let program = check_agent_command(&agent_command)?;
        debug!(program = %program.display(), "agent command resolved");
    }

    let slot = ProcessSlot::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(slot.clone(), shutdown_tx)?;

    let commands = Arc::new(ShellCommandRunner::new(&env.project_dir));
    let agent = Arc::new(StreamingAgent::new(
        &agent_command,
        &task.agent_flags,
        &env.project_dir,
        slot,
    ));

    let options = RunnerOptions {
        limit: args.limit,
        time_limit: args.time_limit,
        dry_run: args.dry_run,
        verbose: args.verbose,
        hash_filter: args.hash_filter(),
        ..RunnerOptions::default()
    };

    let mut runner = Runner::new(
        task,
        env.config.clone(),
        env.task_id,
        options,
        commands,
        agent,
        shutdown_rx,
    )?;
    let summary = runner.run().await?;
    info!(
        iterations = summary.iterations,
        finished = summary.outcomes.len(),
        stop = ?summary.stop,
        "run complete"
    );
    Ok(())
}

/// Installs signal handling.
///
/// SIGQUIT requests a graceful stop after the current iteration. SIGINT and
/// SIGTERM kill the running agent's process group and exit with status 1.
#[cfg(unix)]
fn spawn_signal_handler(slot: ProcessSlot, shutdown_tx: watch::Sender<bool>) -> Result<()> {
    let handler = fixloop::signals::SignalHandler::install()?;
    tokio::spawn(async move {
        handler.run(&slot, &shutdown_tx).await;
        std::process::exit(1);
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handler(slot: ProcessSlot, _shutdown_tx: watch::Sender<bool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            slot.terminate();
            std::process::exit(1);
        }
    });
    Ok(())
}
