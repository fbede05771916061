//! `chaosd exec` — Run a command inside a container's namespaces.

use chaosd_bpm::{NamespaceKind, NamespaceOption, ProcessBuilder};
use chaosd_common::config::HelperPaths;
use chaosd_common::types::ResolveMode;
use clap::Args;

use super::{GlobalArgs, Session};

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Runtime-qualified container id.
    pub container: String,

    /// Namespaces to enter, in entry order (`mnt,net,pid,ipc,uts,cgroup`).
    #[arg(long = "ns", value_delimiter = ',', default_value = "net")]
    pub namespaces: Vec<NamespaceKind>,

    /// Enter the mount namespace with local propagation.
    #[arg(long)]
    pub local_mount: bool,

    /// Anchor the namespaces with the pause placeholder.
    #[arg(long)]
    pub pause: bool,

    /// Target the runtime-reported PID instead of the workload descendant.
    #[arg(long)]
    pub stress: bool,

    /// Correlation identifier for logs.
    #[arg(long)]
    pub id: Option<String>,

    /// Command to execute.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    /// Assembles the helper process for `pid`.
    fn builder(&self, pid: u32, helpers: HelperPaths) -> ProcessBuilder {
        let (program, args) = self
            .command
            .split_first()
            .map_or(("", &[][..]), |(program, args)| (program.as_str(), args));
        let mut builder = ProcessBuilder::new(program)
            .args(args)
            .namespaces(
                self.namespaces
                    .iter()
                    .map(|kind| NamespaceOption::for_pid(*kind, pid)),
            )
            .local_mount(self.local_mount)
            .pause(self.pause)
            .helpers(helpers);
        if let Some(id) = &self.id {
            builder = builder.identifier(id);
        }
        builder
    }
}

/// Executes the `exec` command.
///
/// Resolves the container PID, starts the helper inside its namespaces,
/// and exits with the helper's exit code. Ctrl-C kills the helper.
///
/// # Errors
///
/// Returns an error if resolution fails or the helper cannot be started.
pub async fn execute(args: ExecArgs, global: &GlobalArgs, session: &Session) -> anyhow::Result<()> {
    let mode = if args.stress {
        ResolveMode::StressTarget
    } else {
        ResolveMode::Default
    };
    let pid = global
        .deadline(session.client.get_pid_from_container_id(&args.container, mode))
        .await?;
    tracing::info!(container = %args.container, pid, namespaces = ?args.namespaces, "entering container");

    let mut process = args.builder(pid, session.config.helpers.clone()).build();
    let _ = process.start()?;

    let status = tokio::select! {
        status = process.wait() => status?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(identifier = %process.identifier(), "interrupted, killing helper");
            process.kill().await?;
            std::process::exit(130);
        }
    };

    std::process::exit(status.code().unwrap_or(-1));
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ExecArgs,
    }

    fn parse(argv: &[&str]) -> ExecArgs {
        Harness::try_parse_from(std::iter::once("exec").chain(argv.iter().copied()))
            .unwrap()
            .args
    }

    #[test]
    fn defaults_to_network_namespace() {
        let args = parse(&["containerd://abc", "--", "tc", "qdisc", "show"]);
        assert_eq!(args.namespaces, vec![NamespaceKind::Network]);
        assert_eq!(args.command, vec!["tc", "qdisc", "show"]);
    }

    #[test]
    fn builds_nsexec_line_for_resolved_pid() {
        let args = parse(&[
            "docker://abc",
            "--ns",
            "mnt,net",
            "--local-mount",
            "--id",
            "fault-7",
            "--",
            "ip",
            "link",
        ]);
        let process = args.builder(4242, HelperPaths::default()).build();
        assert_eq!(process.identifier(), "fault-7");
        assert_eq!(
            process.command_line(),
            vec![
                "nice",
                "-n",
                "19",
                "/usr/local/bin/nsexec",
                "-l",
                "-m",
                "/proc/4242/ns/mnt",
                "-n",
                "/proc/4242/ns/net",
                "--",
                "ip",
                "link",
            ]
        );
    }

    #[test]
    fn command_is_required() {
        assert!(Harness::try_parse_from(["exec", "docker://abc"]).is_err());
    }
}
