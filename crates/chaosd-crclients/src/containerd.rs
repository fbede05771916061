//! containerd client.
//!
//! Containers live in a containerd namespace (`k8s.io` for Kubernetes);
//! every request carries it in the `containerd-namespace` metadata entry.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chaosd_common::config::ContainerdSettings;
use chaosd_common::error::{ChaosdError, Result};
use chaosd_common::types::{ResolveMode, RuntimeKind};
use containerd_client::services::v1::containers_client::ContainersClient;
use containerd_client::services::v1::tasks_client::TasksClient;
use containerd_client::services::v1::{GetContainerRequest, GetRequest, KillRequest};
use nix::sys::signal::Signal;
use tonic::Request;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;

use crate::resolver::PidResolver;
use crate::{ContainerRuntimeClient, resolve_reported_pid};

/// containerd gRPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerdConnection {
    /// Socket path.
    pub socket: PathBuf,
    /// containerd namespace to look containers up in.
    pub namespace: String,
}

impl From<&ContainerdSettings> for ContainerdConnection {
    fn from(settings: &ContainerdSettings) -> Self {
        Self {
            socket: settings.socket.clone(),
            namespace: settings.namespace.clone(),
        }
    }
}

/// containerd calls used by [`ContainerdClient`].
#[async_trait]
pub trait ContainerdApi: Send + Sync {
    /// Loads container `id` and returns the PID of its primary task.
    async fn task_pid(&self, id: &str) -> Result<u32>;

    /// Signals the primary task of container `id`.
    async fn kill_task(&self, id: &str, signal: u32) -> Result<()>;
}

fn grpc_error(id: &str, status: &tonic::Status) -> ChaosdError {
    ChaosdError::RuntimeLookup {
        runtime: RuntimeKind::Containerd,
        id: id.to_string(),
        message: format!("{}: {}", status.code(), status.message()),
    }
}

const NAMESPACE_KEY: &str = "containerd-namespace";

fn namespace_value(namespace: &str) -> Result<MetadataValue<Ascii>> {
    namespace.parse().map_err(|_| ChaosdError::Construction {
        runtime: RuntimeKind::Containerd,
        message: format!("namespace {namespace:?} is not a valid metadata value"),
    })
}

/// [`ContainerdApi`] over a gRPC channel.
#[derive(Debug, Clone)]
pub struct ContainerdGrpc {
    channel: Channel,
    namespace: MetadataValue<Ascii>,
}

impl ContainerdGrpc {
    /// Dials the containerd socket.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosdError::Construction`] if the namespace cannot be sent
    /// as request metadata or the socket cannot be reached.
    pub async fn connect(conn: &ContainerdConnection) -> Result<Self> {
        let namespace = namespace_value(&conn.namespace)?;
        let channel = containerd_client::connect(&conn.socket)
            .await
            .map_err(|e| ChaosdError::Construction {
                runtime: RuntimeKind::Containerd,
                message: format!("{}: {e}", conn.socket.display()),
            })?;
        tracing::info!(socket = %conn.socket.display(), namespace = %conn.namespace, "connected to containerd");
        Ok(Self { channel, namespace })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        let _ = request
            .metadata_mut()
            .insert(NAMESPACE_KEY, self.namespace.clone());
        request
    }
}

#[async_trait]
impl ContainerdApi for ContainerdGrpc {
    async fn task_pid(&self, id: &str) -> Result<u32> {
        let mut containers = ContainersClient::new(self.channel.clone());
        let req = self.request(GetContainerRequest { id: id.to_string() });
        let _ = containers.get(req).await.map_err(|e| grpc_error(id, &e))?;

        let mut tasks = TasksClient::new(self.channel.clone());
        let req = self.request(GetRequest {
            container_id: id.to_string(),
            ..Default::default()
        });
        let process = tasks
            .get(req)
            .await
            .map_err(|e| grpc_error(id, &e))?
            .into_inner()
            .process
            .ok_or_else(|| ChaosdError::RuntimeLookup {
                runtime: RuntimeKind::Containerd,
                id: id.to_string(),
                message: "task has no process".into(),
            })?;
        Ok(process.pid)
    }

    async fn kill_task(&self, id: &str, signal: u32) -> Result<()> {
        let mut tasks = TasksClient::new(self.channel.clone());
        let req = self.request(KillRequest {
            container_id: id.to_string(),
            signal,
            ..Default::default()
        });
        let _ = tasks.kill(req).await.map_err(|e| grpc_error(id, &e))?;
        Ok(())
    }
}

/// Runtime client for containerd.
pub struct ContainerdClient {
    api: Arc<dyn ContainerdApi>,
    resolver: Arc<PidResolver>,
}

impl std::fmt::Debug for ContainerdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerdClient")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl ContainerdClient {
    /// Connects to containerd at `conn`.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosdError::Construction`] if the socket cannot be reached.
    pub async fn connect(conn: &ContainerdConnection, resolver: Arc<PidResolver>) -> Result<Self> {
        Self::with_connector(conn, resolver, |conn| async move {
            Ok(Arc::new(ContainerdGrpc::connect(&conn).await?) as Arc<dyn ContainerdApi>)
        })
        .await
    }

    /// Builds the API handle through `connect` instead of gRPC.
    ///
    /// # Errors
    ///
    /// Returns whatever `connect` returns.
    pub async fn with_connector<F, Fut>(
        conn: &ContainerdConnection,
        resolver: Arc<PidResolver>,
        connect: F,
    ) -> Result<Self>
    where
        F: FnOnce(ContainerdConnection) -> Fut,
        Fut: Future<Output = Result<Arc<dyn ContainerdApi>>>,
    {
        let api = connect(conn.clone()).await?;
        Ok(Self::from_api(api, resolver))
    }

    /// Wraps an existing API handle.
    #[must_use]
    pub fn from_api(api: Arc<dyn ContainerdApi>, resolver: Arc<PidResolver>) -> Self {
        Self { api, resolver }
    }
}

#[async_trait]
impl ContainerRuntimeClient for ContainerdClient {
    fn runtime(&self) -> RuntimeKind {
        RuntimeKind::Containerd
    }

    async fn get_pid_from_container_id(&self, container_id: &str, mode: ResolveMode) -> Result<u32> {
        let id = self.format_container_id(container_id)?;
        let reported = self.api.task_pid(id).await?;
        resolve_reported_pid(&self.resolver, container_id, reported, mode).await
    }

    async fn container_kill_by_container_id(&self, container_id: &str) -> Result<()> {
        let id = self.format_container_id(container_id)?;
        tracing::info!(container_id, "killing containerd task");
        self.api.kill_task(id, Signal::SIGKILL as u32).await
    }
}
