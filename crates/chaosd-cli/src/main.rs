//! # chaosd — chaos daemon host agent
//!
//! Resolves orchestrator container ids to workload PIDs and runs helper
//! commands inside the target container's namespaces.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod commands;

use clap::Parser;

use crate::commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::execute(cli).await
}
