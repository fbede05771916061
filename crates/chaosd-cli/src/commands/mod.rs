//! CLI command definitions and dispatch.

pub mod exec;
pub mod kill;
pub mod pid;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chaosd_common::config::ChaosdConfig;
use chaosd_common::constants::PGREP_BINARY;
use chaosd_common::types::RuntimeKind;
use chaosd_crclients::{ConnectionTarget, ContainerRuntimeClient, PgrepProcessTable, PidResolver};
use clap::{Args, Parser, Subcommand};

/// chaosd — run fault-injection helpers inside container namespaces.
#[derive(Parser, Debug)]
#[command(name = "chaosd", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Runtime connection options.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// JSON configuration file.
    #[arg(long, global = true, env = "CHAOSD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Container runtime (`docker` or `containerd`).
    #[arg(long, global = true, env = "CHAOSD_RUNTIME")]
    pub runtime: Option<RuntimeKind>,

    /// containerd socket path.
    #[arg(long, global = true)]
    pub containerd_socket: Option<PathBuf>,

    /// containerd namespace.
    #[arg(long, global = true)]
    pub containerd_namespace: Option<String>,

    /// Docker Engine endpoint.
    #[arg(long, global = true)]
    pub docker_host: Option<String>,

    /// Deadline for runtime lookups, in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout: u64,
}

impl GlobalArgs {
    /// Loads the configuration file (if any) and applies flag overrides.
    fn load_config(&self) -> anyhow::Result<ChaosdConfig> {
        let mut config = match &self.config {
            Some(path) => ChaosdConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ChaosdConfig::default(),
        };
        if let Some(runtime) = self.runtime {
            config.runtime = runtime;
        }
        if let Some(socket) = &self.containerd_socket {
            config.containerd.socket.clone_from(socket);
        }
        if let Some(namespace) = &self.containerd_namespace {
            config.containerd.namespace.clone_from(namespace);
        }
        if let Some(host) = &self.docker_host {
            config.docker.host.clone_from(host);
        }
        config.validate()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Bounds `future` by the `--timeout` deadline. Dropping the future on
    /// expiry aborts the in-flight runtime or `pgrep` call.
    async fn deadline<T>(
        &self,
        future: impl Future<Output = chaosd_common::error::Result<T>>,
    ) -> anyhow::Result<T> {
        let limit = Duration::from_secs(self.timeout);
        tokio::time::timeout(limit, future)
            .await
            .with_context(|| format!("timed out after {}s", self.timeout))?
            .map_err(Into::into)
    }
}

/// Configuration plus a connected runtime client.
pub struct Session {
    /// Effective configuration.
    pub config: ChaosdConfig,
    /// Client for the configured runtime.
    pub client: Arc<dyn ContainerRuntimeClient>,
}

impl Session {
    /// Loads configuration and connects to the runtime.
    async fn open(global: &GlobalArgs) -> anyhow::Result<Self> {
        let config = global.load_config()?;
        let table = PgrepProcessTable::locate().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "falling back to pgrep on PATH at call time");
            PgrepProcessTable::with_binary(PGREP_BINARY)
        });
        let resolver = Arc::new(PidResolver::from_settings(Arc::new(table), &config.resolver));
        let target = ConnectionTarget::from_config(&config);
        let client = global
            .deadline(chaosd_crclients::connect(target, resolver))
            .await?;
        Ok(Self { config, client })
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the PID whose namespaces a fault for the container should enter.
    Pid(pid::PidArgs),
    /// Send SIGKILL to a container's main process.
    Kill(kill::KillArgs),
    /// Run a command inside a container's namespaces.
    Exec(exec::ExecArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let session = Session::open(&cli.global).await?;
    match cli.command {
        Command::Pid(args) => pid::execute(args, &cli.global, &session).await,
        Command::Kill(args) => kill::execute(args, &cli.global, &session).await,
        Command::Exec(args) => exec::execute(args, &cli.global, &session).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "chaosd",
            "--runtime",
            "docker",
            "--docker-host",
            "tcp://10.0.0.1:2375",
            "pid",
            "docker://abc",
        ])
        .unwrap();
        let config = cli.global.load_config().unwrap();
        assert_eq!(config.runtime, RuntimeKind::Docker);
        assert_eq!(config.docker.host, "tcp://10.0.0.1:2375");
    }

    #[test]
    fn unknown_runtime_is_rejected() {
        assert!(Cli::try_parse_from(["chaosd", "--runtime", "cri-o", "pid", "x"]).is_err());
    }
}
