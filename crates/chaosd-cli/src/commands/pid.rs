//! `chaosd pid` — Resolve a container id to a PID.

use chaosd_common::types::ResolveMode;
use clap::Args;

use super::{GlobalArgs, Session};

/// Arguments for the `pid` command.
#[derive(Args, Debug)]
pub struct PidArgs {
    /// Runtime-qualified container id, e.g. `containerd://abc123`.
    pub container: String,

    /// Return the runtime-reported PID (cgroup owner) without descending.
    #[arg(long)]
    pub stress: bool,
}

impl PidArgs {
    pub(crate) const fn mode(&self) -> ResolveMode {
        if self.stress {
            ResolveMode::StressTarget
        } else {
            ResolveMode::Default
        }
    }
}

/// Executes the `pid` command.
///
/// # Errors
///
/// Returns an error if the id is malformed or resolution fails.
pub async fn execute(args: PidArgs, global: &GlobalArgs, session: &Session) -> anyhow::Result<()> {
    let pid = global
        .deadline(session.client.get_pid_from_container_id(&args.container, args.mode()))
        .await?;
    #[allow(clippy::print_stdout)]
    {
        println!("{pid}");
    }
    Ok(())
}
