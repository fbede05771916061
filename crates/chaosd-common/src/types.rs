//! Domain primitive types used across the chaosd workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{CONTAINERD_PROTOCOL_PREFIX, DOCKER_PROTOCOL_PREFIX};
use crate::error::ChaosdError;

/// Container runtime a client speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Docker-compatible engine.
    Docker,
    /// containerd.
    Containerd,
}

impl RuntimeKind {
    /// Scheme prefix carried by this runtime's container ids.
    #[must_use]
    pub const fn protocol_prefix(self) -> &'static str {
        match self {
            Self::Docker => DOCKER_PROTOCOL_PREFIX,
            Self::Containerd => CONTAINERD_PROTOCOL_PREFIX,
        }
    }

    /// Strips this runtime's scheme prefix from `container_id`.
    ///
    /// An id consisting of the bare prefix yields an empty native id.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosdError::MalformedContainerId`] if the id is shorter
    /// than the prefix or starts with anything else.
    pub fn strip_prefix(self, container_id: &str) -> crate::error::Result<&str> {
        let prefix = self.protocol_prefix();
        container_id
            .strip_prefix(prefix)
            .ok_or_else(|| ChaosdError::MalformedContainerId {
                id: container_id.to_string(),
                expected: prefix,
            })
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Containerd => write!(f, "containerd"),
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = ChaosdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(Self::Docker),
            "containerd" => Ok(Self::Containerd),
            other => Err(ChaosdError::Config {
                message: format!("unknown container runtime: {other}"),
            }),
        }
    }
}

/// How a container's PID is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResolveMode {
    /// Walk from the reported PID down to the workload process.
    #[default]
    Default,
    /// Return the runtime-reported PID untouched. Resource stress must land
    /// on the process that owns the container cgroup.
    StressTarget,
}
