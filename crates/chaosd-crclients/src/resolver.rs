//! Walks from a runtime-reported PID to the workload process.
//!
//! Runtimes usually report a shim or init process rather than the
//! application itself. The resolver follows the first child at each level
//! until it meets a process whose name carries a workload marker, or a
//! process without children.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chaosd_common::config::ResolverSettings;
use chaosd_common::constants::{DEFAULT_RESOLVE_MAX_DEPTH, DEFAULT_WORKLOAD_MARKERS, PGREP_BINARY};
use chaosd_common::error::{ChaosdError, Result};
use tokio::process::Command;

/// A direct child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process ID.
    pub pid: u32,
    /// Process name as reported by the kernel (`comm`).
    pub name: String,
}

/// Source of parent/child relationships.
#[async_trait]
pub trait ProcessTable: Send + Sync {
    /// Lists the immediate children of `pid`, lowest PID first.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosdError::Enumeration`] if the listing cannot be produced.
    async fn children(&self, pid: u32) -> Result<Vec<ProcessEntry>>;
}

/// Process table backed by `pgrep -l -P <pid>`.
#[derive(Debug, Clone)]
pub struct PgrepProcessTable {
    binary: PathBuf,
}

impl PgrepProcessTable {
    /// Finds `pgrep` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosdError::Config`] if `pgrep` is not installed.
    pub fn locate() -> Result<Self> {
        let binary = which::which(PGREP_BINARY).map_err(|e| ChaosdError::Config {
            message: format!("{PGREP_BINARY} not found: {e}"),
        })?;
        Ok(Self { binary })
    }

    /// Uses an explicit `pgrep` binary.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ProcessTable for PgrepProcessTable {
    async fn children(&self, pid: u32) -> Result<Vec<ProcessEntry>> {
        let output = Command::new(&self.binary)
            .args(["-l", "-P", &pid.to_string()])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ChaosdError::Enumeration {
                pid,
                message: e.to_string(),
            })?;

        match output.status.code() {
            Some(0) => Ok(parse_pgrep_output(&String::from_utf8_lossy(&output.stdout))),
            // pgrep exits 1 when nothing matched.
            Some(1) => Ok(Vec::new()),
            _ => Err(ChaosdError::Enumeration {
                pid,
                message: format!(
                    "{} exited with {}: {}",
                    self.binary.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
        }
    }
}

/// Parses `pgrep -l` lines of the form `<pid> <name>`.
fn parse_pgrep_output(stdout: &str) -> Vec<ProcessEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let (pid, name) = line.trim().split_once(' ')?;
            Some(ProcessEntry {
                pid: pid.parse().ok()?,
                name: name.trim().to_string(),
            })
        })
        .collect()
}

/// Bounded, cycle-safe walk down a container's process tree.
pub struct PidResolver {
    table: Arc<dyn ProcessTable>,
    max_depth: usize,
    markers: Vec<String>,
}

impl std::fmt::Debug for PidResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PidResolver")
            .field("max_depth", &self.max_depth)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}

impl PidResolver {
    /// Creates a resolver with the default depth limit and markers.
    #[must_use]
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self {
            table,
            max_depth: DEFAULT_RESOLVE_MAX_DEPTH,
            markers: DEFAULT_WORKLOAD_MARKERS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Creates a resolver from configuration.
    #[must_use]
    pub fn from_settings(table: Arc<dyn ProcessTable>, settings: &ResolverSettings) -> Self {
        Self::new(table)
            .with_max_depth(settings.max_depth)
            .with_markers(settings.workload_markers.iter().cloned())
    }

    /// Sets the maximum number of levels walked. Zero is raised to one so
    /// the reported PID is always enumerated.
    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = if max_depth == 0 { 1 } else { max_depth };
        self
    }

    /// Replaces the workload name markers.
    #[must_use]
    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markers = markers.into_iter().map(Into::into).collect();
        self
    }

    fn is_workload(&self, name: &str) -> bool {
        self.markers.iter().any(|marker| name.contains(marker.as_str()))
    }

    /// Returns the most specific live descendant of `pid`.
    ///
    /// `pid` itself must have at least one child. Below that level, a
    /// process without children (or whose children cannot be listed) is
    /// the answer.
    ///
    /// # Errors
    ///
    /// * [`ChaosdError::NoDescendant`] if `pid` has no children.
    /// * [`ChaosdError::Cycle`] if a PID shows up twice.
    /// * [`ChaosdError::DepthExceeded`] if the tree is deeper than the limit.
    pub async fn resolve(&self, pid: u32) -> Result<u32> {
        let mut current = pid;
        let mut visited = HashSet::from([pid]);

        for depth in 0..self.max_depth {
            let children = match self.table.children(current).await {
                Ok(children) => children,
                Err(err) if depth == 0 => {
                    tracing::warn!(pid, error = %err, "cannot list children of reported pid");
                    return Err(ChaosdError::NoDescendant { pid });
                }
                Err(err) => {
                    tracing::debug!(pid = current, error = %err, "enumeration failed, stopping walk");
                    return Ok(current);
                }
            };
            tracing::debug!(pid = current, depth, ?children, "enumerated children");

            if let Some(workload) = children.iter().find(|child| self.is_workload(&child.name)) {
                tracing::info!(pid, resolved = workload.pid, name = %workload.name, "workload process found");
                return Ok(workload.pid);
            }

            let Some(first) = children.first() else {
                if depth == 0 {
                    return Err(ChaosdError::NoDescendant { pid });
                }
                tracing::info!(pid, resolved = current, "leaf process reached");
                return Ok(current);
            };

            if !visited.insert(first.pid) {
                return Err(ChaosdError::Cycle { pid: first.pid });
            }
            current = first.pid;
        }

        Err(ChaosdError::DepthExceeded {
            pid,
            max_depth: self.max_depth,
        })
    }
}
