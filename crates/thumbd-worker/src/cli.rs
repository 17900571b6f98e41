//! Command line surface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::AppConfig;
use crate::console;
use crate::context::AppContext;
use crate::error::WorkerResult;
use crate::process_table::{PsProcessTable, WORKER_SUBCOMMAND};
use crate::requirements;
use crate::runner::Runner;
use crate::supervisor::{Scope, Supervisor};

#[derive(Debug, Parser)]
#[command(name = "thumbd", version, about = "Thumbnail worker pool")]
pub struct Cli {
    /// Configuration file (default: ./config.yaml, then next to the binary)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Report the state of the worker pool
    Check {
        /// Print the observation as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start workers up to the configured pool size
    Start,
    /// Kill every worker
    Stop,
    /// Stop, then start
    Restart,
    /// Run the worker loop in this process
    #[command(name = WORKER_SUBCOMMAND, alias = "up")]
    ApplicationStart,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Check { .. } => "check",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Restart => "restart",
            Command::ApplicationStart => WORKER_SUBCOMMAND,
        }
    }
}

/// Run `cli.command` to completion.
pub async fn execute(cli: Cli) -> WorkerResult<()> {
    match cli.command {
        Command::Stop => {
            requirements::check_user()?;
            stop(cli.config).await
        }
        Command::Check { json } => {
            let ctx = prepare(cli.config).await?;
            check(&ctx, json).await
        }
        Command::Start => {
            let ctx = prepare(cli.config).await?;
            start(&ctx).await
        }
        Command::Restart => {
            let ctx = prepare(cli.config.clone()).await?;
            stop(cli.config).await?;
            start(&ctx).await
        }
        Command::ApplicationStart => {
            let ctx = prepare(cli.config).await?;
            ctx.ensure_cache_dirs().await?;
            Runner::new(&ctx).run().await
        }
    }
}

/// Preconditions, configuration, context and store preflight.
async fn prepare(config_path: Option<PathBuf>) -> WorkerResult<AppContext> {
    let config = AppConfig::load(config_path.as_deref())?;
    requirements::check_all(&config.paths.pid_dir)?;

    let ctx = AppContext::connect(config).await?;
    ctx.preflight().await?;
    Ok(ctx)
}

async fn check(ctx: &AppContext, json: bool) -> WorkerResult<()> {
    let observation = ctx.supervisor().observe(Scope::External).await;
    if json {
        println!("{}", console::to_json(&observation));
    } else {
        for line in console::observation_lines(&observation) {
            println!("{}", line);
        }
    }
    Ok(())
}

async fn start(ctx: &AppContext) -> WorkerResult<()> {
    let outcome = ctx.supervisor().reconcile(Scope::External).await?;
    info!(outcome = ?outcome, "Start finished");
    println!("{}", console::outcome_line(&outcome));
    Ok(())
}

async fn stop(config_path: Option<PathBuf>) -> WorkerResult<()> {
    let processes = PsProcessTable::for_current_process(config_path)?;
    // Target and stop file play no part in stopping
    let supervisor = Supervisor::new(Arc::new(processes), PathBuf::new(), 0);
    let report = supervisor.stop().await?;
    for line in console::stop_lines(&report) {
        println!("{}", line);
    }
    Ok(())
}
