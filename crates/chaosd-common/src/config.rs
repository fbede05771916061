//! Configuration model for the chaos daemon core.
//!
//! Every section has defaults matching a stock Kubernetes node, so an
//! empty JSON object is a valid configuration file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{ChaosdError, Result};
use crate::types::RuntimeKind;

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosdConfig {
    /// Runtime the node's containers are managed by.
    pub runtime: RuntimeKind,
    /// Docker Engine connection.
    pub docker: DockerSettings,
    /// containerd connection.
    pub containerd: ContainerdSettings,
    /// External helper binaries used to build managed processes.
    pub helpers: HelperPaths,
    /// PID resolver tuning.
    pub resolver: ResolverSettings,
}

impl Default for ChaosdConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Containerd,
            docker: DockerSettings::default(),
            containerd: ContainerdSettings::default(),
            helpers: HelperPaths::default(),
            resolver: ResolverSettings::default(),
        }
    }
}

impl ChaosdConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ChaosdError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosdError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !(-20..=19).contains(&self.helpers.niceness) {
            return Err(ChaosdError::Config {
                message: format!("niceness {} is outside -20..=19", self.helpers.niceness),
            });
        }
        if self.resolver.max_depth == 0 {
            return Err(ChaosdError::Config {
                message: "resolver.max_depth must be at least 1".into(),
            });
        }
        if self.containerd.namespace.is_empty() {
            return Err(ChaosdError::Config {
                message: "containerd.namespace must not be empty".into(),
            });
        }
        // Sent as a gRPC metadata value on every containerd request.
        if !self.containerd.namespace.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(ChaosdError::Config {
                message: format!(
                    "containerd.namespace {:?} must be visible ASCII",
                    self.containerd.namespace
                ),
            });
        }
        Ok(())
    }
}

/// Docker Engine connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Endpoint, `unix://` socket or `tcp://`/`http://` address.
    pub host: String,
    /// API version such as `1.41`. `None` uses the client default.
    pub api_version: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra HTTP headers sent with every Engine API request.
    pub headers: HashMap<String, String>,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_DOCKER_HOST.into(),
            api_version: None,
            timeout_secs: constants::DEFAULT_DOCKER_TIMEOUT_SECS,
            headers: HashMap::new(),
        }
    }
}

/// containerd connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerdSettings {
    /// gRPC socket path.
    pub socket: PathBuf,
    /// containerd namespace the orchestrator places containers in.
    pub namespace: String,
}

impl Default for ContainerdSettings {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(constants::DEFAULT_CONTAINERD_SOCKET),
            namespace: constants::DEFAULT_CONTAINERD_NAMESPACE.into(),
        }
    }
}

/// Locations of the external binaries a managed process is wrapped in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperPaths {
    /// Namespace-entry helper.
    pub nsexec: PathBuf,
    /// Namespace-holding placeholder.
    pub pause: PathBuf,
    /// Scheduling wrapper.
    pub nice: PathBuf,
    /// Niceness passed to the scheduling wrapper.
    pub niceness: i32,
}

impl Default for HelperPaths {
    fn default() -> Self {
        Self {
            nsexec: PathBuf::from(constants::NSEXEC_PATH),
            pause: PathBuf::from(constants::PAUSE_PATH),
            nice: PathBuf::from(constants::NICE_BINARY),
            niceness: constants::DEFAULT_NICENESS,
        }
    }
}

/// PID resolver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Maximum supervisor hops walked below the reported PID.
    pub max_depth: usize,
    /// Substrings of a process name that mark the workload process.
    pub workload_markers: Vec<String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_depth: constants::DEFAULT_RESOLVE_MAX_DEPTH,
            workload_markers: constants::DEFAULT_WORKLOAD_MARKERS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}
