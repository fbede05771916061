//! Docker Engine client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::query_parameters::{InspectContainerOptions, KillContainerOptionsBuilder};
use bollard::{API_DEFAULT_VERSION, BollardRequest, ClientVersion, Docker};
use chaosd_common::config::DockerSettings;
use chaosd_common::error::{ChaosdError, Result};
use chaosd_common::types::{ResolveMode, RuntimeKind};
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::rt::TokioExecutor;
use hyperlocal::UnixConnector;
use nix::sys::signal::Signal;

use crate::resolver::PidResolver;
use crate::{ContainerRuntimeClient, resolve_reported_pid};

/// Docker Engine endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerConnection {
    /// `unix://` socket or `tcp://`/`http://` address.
    pub host: String,
    /// API version such as `1.41`; `None` uses the client default.
    pub api_version: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Extra HTTP headers sent with every request.
    pub headers: HashMap<String, String>,
}

impl From<&DockerSettings> for DockerConnection {
    fn from(settings: &DockerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            api_version: settings.api_version.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            headers: settings.headers.clone(),
        }
    }
}

/// The slice of container state the client needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspection {
    /// Main process PID, 0 when the container is not running.
    pub pid: i64,
    /// Status string such as `running` or `exited`.
    pub status: String,
}

/// Docker Engine calls used by [`DockerClient`].
#[async_trait]
pub trait DockerApi: Send + Sync {
    /// Inspects a container by native id.
    async fn container_inspect(&self, id: &str) -> Result<ContainerInspection>;

    /// Sends `signal` (e.g. `SIGKILL`) to a container's main process.
    async fn container_kill(&self, id: &str, signal: &str) -> Result<()>;
}

fn lookup_error(id: &str, err: &bollard::errors::Error) -> ChaosdError {
    ChaosdError::RuntimeLookup {
        runtime: RuntimeKind::Docker,
        id: id.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl DockerApi for Docker {
    async fn container_inspect(&self, id: &str) -> Result<ContainerInspection> {
        let response = self
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| lookup_error(id, &e))?;
        let state = response.state.unwrap_or_default();
        Ok(ContainerInspection {
            pid: state.pid.unwrap_or_default(),
            status: state.status.map(|s| s.to_string()).unwrap_or_default(),
        })
    }

    async fn container_kill(&self, id: &str, signal: &str) -> Result<()> {
        let options = KillContainerOptionsBuilder::new().signal(signal).build();
        self.kill_container(id, Some(options))
            .await
            .map_err(|e| lookup_error(id, &e))
    }
}

/// Parses `major.minor` into a client version.
fn parse_api_version(version: &str) -> Result<ClientVersion> {
    let invalid = || ChaosdError::Config {
        message: format!("invalid docker API version: {version}"),
    };
    let version = version.trim_start_matches('v');
    let (major, minor) = version.split_once('.').ok_or_else(invalid)?;
    Ok(ClientVersion {
        major_version: major.parse().map_err(|_| invalid())?,
        minor_version: minor.parse().map_err(|_| invalid())?,
    })
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let invalid = || ChaosdError::Construction {
            runtime: RuntimeKind::Docker,
            message: format!("invalid HTTP header {name}: {value:?}"),
        };
        let name = HeaderName::try_from(name.as_str()).map_err(|_| invalid())?;
        let value = HeaderValue::try_from(value.as_str()).map_err(|_| invalid())?;
        let _ = map.insert(name, value);
    }
    Ok(map)
}

/// Routes `bollard` requests through a `hyper` client that stamps
/// `headers` on each of them.
fn connect_with_headers<C>(
    connector: C,
    client_addr: String,
    headers: HeaderMap,
    timeout: u64,
    version: &ClientVersion,
) -> std::result::Result<Docker, bollard::errors::Error>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let client = Arc::new(Client::builder(TokioExecutor::new()).build(connector));
    let headers = Arc::new(headers);
    let transport = move |mut request: BollardRequest| {
        for (name, value) in headers.iter() {
            let _ = request.headers_mut().insert(name.clone(), value.clone());
        }
        let client = Arc::clone(&client);
        async move {
            client
                .request(request)
                .await
                .map_err(bollard::errors::Error::from)
        }
    };
    Docker::connect_with_custom_transport(transport, Some(client_addr), timeout, version)
}

/// Connects `bollard` to the endpoint.
///
/// # Errors
///
/// Returns [`ChaosdError::Construction`] if the version or a header is
/// invalid, or the client cannot be created.
pub fn connect_bollard(conn: &DockerConnection) -> Result<Docker> {
    let construction = |message: String| ChaosdError::Construction {
        runtime: RuntimeKind::Docker,
        message,
    };
    let parsed = conn
        .api_version
        .as_deref()
        .map(parse_api_version)
        .transpose()
        .map_err(|e| construction(e.to_string()))?;
    let version = parsed.as_ref().unwrap_or(API_DEFAULT_VERSION);
    let timeout = conn.timeout.as_secs();

    let docker = if conn.headers.is_empty() {
        if conn.host.starts_with("unix://") {
            Docker::connect_with_socket(&conn.host, timeout, version)
        } else {
            Docker::connect_with_http(&conn.host, timeout, version)
        }
    } else {
        let headers = header_map(&conn.headers)?;
        if let Some(socket) = conn.host.strip_prefix("unix://") {
            // hyperlocal addresses a socket by its hex-encoded path.
            let uri: hyper::Uri = hyperlocal::Uri::new(socket, "/").into();
            let host = uri.host().unwrap_or_default();
            connect_with_headers(UnixConnector, format!("unix://{host}"), headers, timeout, version)
        } else {
            let address = conn.host.replacen("tcp://", "", 1).replacen("http://", "", 1);
            connect_with_headers(
                HttpConnector::new(),
                format!("http://{address}"),
                headers,
                timeout,
                version,
            )
        }
    };
    docker.map_err(|e| construction(format!("{}: {e}", conn.host)))
}

/// Runtime client for Docker-compatible engines.
pub struct DockerClient {
    api: Arc<dyn DockerApi>,
    resolver: Arc<PidResolver>,
}

impl std::fmt::Debug for DockerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerClient")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl DockerClient {
    /// Connects to the Docker Engine at `conn`.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosdError::Construction`] if the client cannot be created.
    pub fn new(conn: &DockerConnection, resolver: Arc<PidResolver>) -> Result<Self> {
        Self::with_connector(conn, resolver, |conn| {
            Ok(Arc::new(connect_bollard(conn)?) as Arc<dyn DockerApi>)
        })
    }

    /// Builds the API handle through `connect` instead of `bollard`.
    ///
    /// # Errors
    ///
    /// Returns whatever `connect` returns.
    pub fn with_connector<F>(
        conn: &DockerConnection,
        resolver: Arc<PidResolver>,
        connect: F,
    ) -> Result<Self>
    where
        F: FnOnce(&DockerConnection) -> Result<Arc<dyn DockerApi>>,
    {
        let api = connect(conn)?;
        tracing::debug!(host = %conn.host, "docker client ready");
        Ok(Self::from_api(api, resolver))
    }

    /// Wraps an existing API handle.
    #[must_use]
    pub fn from_api(api: Arc<dyn DockerApi>, resolver: Arc<PidResolver>) -> Self {
        Self { api, resolver }
    }
}

#[async_trait]
impl ContainerRuntimeClient for DockerClient {
    fn runtime(&self) -> RuntimeKind {
        RuntimeKind::Docker
    }

    async fn get_pid_from_container_id(&self, container_id: &str, mode: ResolveMode) -> Result<u32> {
        let id = self.format_container_id(container_id)?;
        let inspection = self.api.container_inspect(id).await?;
        if inspection.pid == 0 {
            return Err(ChaosdError::ContainerNotRunning {
                id: id.to_string(),
                status: inspection.status,
            });
        }
        let reported = u32::try_from(inspection.pid).map_err(|_| ChaosdError::RuntimeLookup {
            runtime: RuntimeKind::Docker,
            id: id.to_string(),
            message: format!("invalid pid {}", inspection.pid),
        })?;
        resolve_reported_pid(&self.resolver, container_id, reported, mode).await
    }

    async fn container_kill_by_container_id(&self, container_id: &str) -> Result<()> {
        let id = self.format_container_id(container_id)?;
        tracing::info!(container_id, "killing docker container");
        self.api.container_kill(id, Signal::SIGKILL.as_str()).await
    }
}
