//! Unified error types for the chaosd workspace.
//!
//! Every failure is returned to the caller with the container id, PID, or
//! process identifier it concerns. Nothing in the workspace retries.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RuntimeKind;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ChaosdError {
    /// The container id does not carry the runtime's scheme prefix.
    #[error("malformed container id {id:?}: expected prefix {expected}")]
    MalformedContainerId {
        /// The id as received.
        id: String,
        /// The scheme prefix the runtime expects.
        expected: &'static str,
    },

    /// A call into the container runtime failed.
    #[error("{runtime} lookup failed for {id}: {message}")]
    RuntimeLookup {
        /// Runtime that reported the failure.
        runtime: RuntimeKind,
        /// Runtime-native container id.
        id: String,
        /// Message reported by the runtime client.
        message: String,
    },

    /// The runtime reports no live process for the container.
    #[error("container {id} is not running, status: {status}")]
    ContainerNotRunning {
        /// Runtime-native container id.
        id: String,
        /// Status string reported by the runtime.
        status: String,
    },

    /// The PID resolver found no child to descend into.
    #[error("no descendant process found under pid {pid}")]
    NoDescendant {
        /// PID whose children were enumerated.
        pid: u32,
    },

    /// The PID resolver walked more hops than allowed.
    #[error("process tree under pid {pid} is deeper than {max_depth} levels")]
    DepthExceeded {
        /// PID the walk started from.
        pid: u32,
        /// Configured hop limit.
        max_depth: usize,
    },

    /// The PID resolver met a PID it had already visited.
    #[error("process tree cycle detected at pid {pid}")]
    Cycle {
        /// PID seen twice.
        pid: u32,
    },

    /// Child process enumeration failed.
    #[error("failed to enumerate children of pid {pid}: {message}")]
    Enumeration {
        /// PID whose children were requested.
        pid: u32,
        /// Description of the failure.
        message: String,
    },

    /// A runtime client could not be constructed.
    #[error("failed to construct {runtime} client: {message}")]
    Construction {
        /// Runtime the client targets.
        runtime: RuntimeKind,
        /// Description of the failure.
        message: String,
    },

    /// Starting, signaling, or reaping a managed process failed.
    #[error("managed process {identifier}: {source}")]
    Process {
        /// Caller-assigned identifier of the process.
        identifier: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ChaosdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_id_names_expected_prefix() {
        let err = ChaosdError::MalformedContainerId {
            id: "cri-o://abc".into(),
            expected: "docker://",
        };
        let msg = err.to_string();
        assert!(msg.contains("cri-o://abc"));
        assert!(msg.contains("docker://"));
    }

    #[test]
    fn not_running_carries_status() {
        let err = ChaosdError::ContainerNotRunning {
            id: "abc".into(),
            status: "exited".into(),
        };
        assert_eq!(err.to_string(), "container abc is not running, status: exited");
    }

    #[test]
    fn lookup_error_names_runtime() {
        let err = ChaosdError::RuntimeLookup {
            runtime: RuntimeKind::Containerd,
            id: "abc".into(),
            message: "not found".into(),
        };
        assert_eq!(err.to_string(), "containerd lookup failed for abc: not found");
    }
}
