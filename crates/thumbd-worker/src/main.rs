//! Thumbnail worker binary.

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use thumbd_worker::cli::{self, Cli};
use thumbd_worker::{console, logging};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    logging::init_tracing();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        console::exit_fatal(format!("{:#}", err));
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.name();
    debug!(command, "Starting thumbd");

    cli::execute(cli)
        .await
        .with_context(|| format!("{} failed", command))?;

    info!(command, "Done");
    Ok(())
}
