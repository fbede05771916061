//! # chaosd-crclients
//!
//! Uniform access to the container runtimes found on a node.
//!
//! A [`ContainerRuntimeClient`] accepts the `<scheme>://<id>` container ids
//! reported by the orchestrator and can:
//! - resolve them to the PID whose namespaces a fault should enter, and
//! - `SIGKILL` the container's main process.
//!
//! The Docker and containerd variants share one trait and are picked by
//! the [`ConnectionTarget`] handed to [`connect`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod containerd;
pub mod docker;
pub mod resolver;

use std::sync::Arc;

use async_trait::async_trait;
use chaosd_common::config::ChaosdConfig;
use chaosd_common::error::Result;
use chaosd_common::types::{ResolveMode, RuntimeKind};

pub use containerd::{ContainerdClient, ContainerdConnection};
pub use docker::{DockerClient, DockerConnection};
pub use resolver::{PgrepProcessTable, PidResolver, ProcessEntry, ProcessTable};

/// Operations every container runtime client provides.
///
/// Implementations hold no per-request state and are safe to share
/// across tasks.
#[async_trait]
pub trait ContainerRuntimeClient: Send + Sync {
    /// Runtime this client talks to.
    fn runtime(&self) -> RuntimeKind;

    /// Strips the runtime's scheme prefix from `container_id`.
    ///
    /// # Errors
    ///
    /// Returns [`chaosd_common::error::ChaosdError::MalformedContainerId`]
    /// if the prefix is missing.
    fn format_container_id<'a>(&self, container_id: &'a str) -> Result<&'a str> {
        self.runtime().strip_prefix(container_id)
    }

    /// Resolves `container_id` to the PID whose namespaces to enter.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is malformed, the runtime lookup fails,
    /// the container is not running, or PID resolution fails.
    async fn get_pid_from_container_id(&self, container_id: &str, mode: ResolveMode) -> Result<u32>;

    /// Sends `SIGKILL` to the container's main process.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is malformed or the runtime call fails.
    async fn container_kill_by_container_id(&self, container_id: &str) -> Result<()>;
}

/// Where to reach a container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// Docker Engine API endpoint.
    Docker(DockerConnection),
    /// containerd gRPC socket.
    Containerd(ContainerdConnection),
}

impl ConnectionTarget {
    /// Selects the target for the configured runtime.
    #[must_use]
    pub fn from_config(config: &ChaosdConfig) -> Self {
        match config.runtime {
            RuntimeKind::Docker => Self::Docker(DockerConnection::from(&config.docker)),
            RuntimeKind::Containerd => {
                Self::Containerd(ContainerdConnection::from(&config.containerd))
            }
        }
    }

    /// Runtime this target belongs to.
    #[must_use]
    pub const fn runtime(&self) -> RuntimeKind {
        match self {
            Self::Docker(_) => RuntimeKind::Docker,
            Self::Containerd(_) => RuntimeKind::Containerd,
        }
    }
}

/// Connects to the runtime described by `target`.
///
/// # Errors
///
/// Returns [`chaosd_common::error::ChaosdError::Construction`] if the
/// runtime client cannot be created.
pub async fn connect(
    target: ConnectionTarget,
    resolver: Arc<PidResolver>,
) -> Result<Arc<dyn ContainerRuntimeClient>> {
    tracing::info!(runtime = %target.runtime(), "connecting to container runtime");
    Ok(match target {
        ConnectionTarget::Docker(conn) => Arc::new(DockerClient::new(&conn, resolver)?),
        ConnectionTarget::Containerd(conn) => {
            Arc::new(ContainerdClient::connect(&conn, resolver).await?)
        }
    })
}

/// Applies `mode` to a PID reported by a runtime.
async fn resolve_reported_pid(
    resolver: &PidResolver,
    container_id: &str,
    reported: u32,
    mode: ResolveMode,
) -> Result<u32> {
    match mode {
        ResolveMode::StressTarget => {
            tracing::info!(container_id, pid = reported, "stress target, using reported pid");
            Ok(reported)
        }
        ResolveMode::Default => {
            let pid = resolver.resolve(reported).await.inspect_err(|err| {
                tracing::warn!(container_id, reported, error = %err, "pid resolution failed");
            })?;
            tracing::info!(container_id, reported, pid, "resolved container pid");
            Ok(pid)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    #[test]
    fn target_follows_configured_runtime() {
        let mut config = ChaosdConfig::default();
        match ConnectionTarget::from_config(&config) {
            ConnectionTarget::Containerd(conn) => {
                assert_eq!(conn.socket, PathBuf::from("/run/containerd/containerd.sock"));
                assert_eq!(conn.namespace, "k8s.io");
            }
            other => panic!("unexpected target: {other:?}"),
        }

        config.runtime = RuntimeKind::Docker;
        config.docker.timeout_secs = 5;
        let target = ConnectionTarget::from_config(&config);
        assert_eq!(target.runtime(), RuntimeKind::Docker);
        match target {
            ConnectionTarget::Docker(conn) => {
                assert_eq!(conn.host, "unix:///var/run/docker.sock");
                assert_eq!(conn.timeout, Duration::from_secs(5));
            }
            other => panic!("unexpected target: {other:?}"),
        }
    }
}
