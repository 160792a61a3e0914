//! Command-line client for a local Strata context store.

mod commands;

use anyhow::Context;
use clap::Parser;
use commands::{Cli, execute, load_config};
use log::warn;
use strata::Coordination;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    strata::init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let default_limit = config.store.default_search_limit;
    let coordination = Coordination::connect(config).await;

    let health = coordination.health().await;
    if let Some(reason) = &health.reason {
        warn!(
            "running without durable storage (backend={}, reason={})",
            health.backend, reason
        );
    }

    let coordinator = coordination.coordinator();
    let outcome = execute(coordinator.as_ref(), cli.command, default_limit).await;
    coordination
        .shutdown()
        .await
        .context("failed to drain write-behind queue")?;
    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}
