//! `chaosd kill` — Kill a container's main process.

use clap::Args;

use super::{GlobalArgs, Session};

/// Arguments for the `kill` command.
#[derive(Args, Debug)]
pub struct KillArgs {
    /// Runtime-qualified container id.
    pub container: String,
}

/// Executes the `kill` command.
///
/// # Errors
///
/// Returns an error if the id is malformed or the runtime refuses the kill.
pub async fn execute(args: KillArgs, global: &GlobalArgs, session: &Session) -> anyhow::Result<()> {
    global
        .deadline(session.client.container_kill_by_container_id(&args.container))
        .await?;
    tracing::info!(container = %args.container, "container killed");
    Ok(())
}
