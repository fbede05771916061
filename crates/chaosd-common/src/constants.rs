//! System-wide constants and default paths.

/// Scheme prefix carried by Docker container identifiers.
pub const DOCKER_PROTOCOL_PREFIX: &str = "docker://";

/// Scheme prefix carried by containerd container identifiers.
pub const CONTAINERD_PROTOCOL_PREFIX: &str = "containerd://";

/// Namespace-entry helper. Grammar: `[-l] (-<flag> <path>)* -- <cmd> [args...]`.
pub const NSEXEC_PATH: &str = "/usr/local/bin/nsexec";

/// Placeholder process that only holds namespaces open.
pub const PAUSE_PATH: &str = "/usr/local/bin/pause";

/// Scheduling wrapper every managed process runs under.
pub const NICE_BINARY: &str = "nice";

/// Static niceness passed to the scheduling wrapper (least favored).
pub const DEFAULT_NICENESS: i32 = 19;

/// Child enumeration tool used by the PID resolver.
pub const PGREP_BINARY: &str = "pgrep";

/// Process names that mark the real workload when walking a container's
/// process tree.
pub const DEFAULT_WORKLOAD_MARKERS: &[&str] = &["java"];

/// Upper bound on supervisor hops walked by the PID resolver.
pub const DEFAULT_RESOLVE_MAX_DEPTH: usize = 16;

/// Default containerd socket.
pub const DEFAULT_CONTAINERD_SOCKET: &str = "/run/containerd/containerd.sock";

/// containerd namespace used by Kubernetes CRI.
pub const DEFAULT_CONTAINERD_NAMESPACE: &str = "k8s.io";

/// Default Docker Engine endpoint.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Request timeout applied to Docker Engine API calls, in seconds.
pub const DEFAULT_DOCKER_TIMEOUT_SECS: u64 = 120;
