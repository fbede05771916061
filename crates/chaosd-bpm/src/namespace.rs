//! Namespace selection for helper processes.
//!
//! A [`NamespaceOption`] names one namespace kind and the `/proc` handle
//! to join it through. The kinds map onto the single-letter flags of the
//! `nsexec` helper.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chaosd_common::error::ChaosdError;

/// Linux namespace kinds the `nsexec` helper can join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Mount table.
    Mount,
    /// Hostname and domain name.
    Uts,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Network stack.
    Network,
    /// Process ID space.
    Pid,
    /// Cgroup root.
    Cgroup,
}

impl NamespaceKind {
    /// All kinds, in the order the helper documents them.
    pub const ALL: [Self; 6] = [
        Self::Mount,
        Self::Uts,
        Self::Ipc,
        Self::Network,
        Self::Pid,
        Self::Cgroup,
    ];

    /// Flag letter understood by `nsexec`.
    #[must_use]
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Mount => "m",
            Self::Uts => "u",
            Self::Ipc => "i",
            Self::Network => "n",
            Self::Pid => "p",
            Self::Cgroup => "c",
        }
    }

    /// Entry name under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_entry(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::Network => "net",
            Self::Pid => "pid",
            Self::Cgroup => "cgroup",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_entry())
    }
}

impl FromStr for NamespaceKind {
    type Err = ChaosdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mnt" | "mount" | "m" => Ok(Self::Mount),
            "uts" | "u" => Ok(Self::Uts),
            "ipc" | "i" => Ok(Self::Ipc),
            "net" | "network" | "n" => Ok(Self::Network),
            "pid" | "p" => Ok(Self::Pid),
            "cgroup" | "c" => Ok(Self::Cgroup),
            other => Err(ChaosdError::Config {
                message: format!("unknown namespace kind: {other}"),
            }),
        }
    }
}

/// One namespace to enter and the handle to enter it through.
///
/// The handle is not checked here. If the owning process has exited by
/// the time the helper runs, the failure shows up when the managed process
/// starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceOption {
    /// Namespace kind.
    pub kind: NamespaceKind,
    /// Path to the namespace handle.
    pub path: PathBuf,
}

impl NamespaceOption {
    /// Creates an option from an explicit handle path.
    #[must_use]
    pub fn new(kind: NamespaceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Creates an option pointing at `/proc/<pid>/ns/<entry>`.
    #[must_use]
    pub fn for_pid(kind: NamespaceKind, pid: u32) -> Self {
        Self::new(kind, format!("/proc/{pid}/ns/{}", kind.proc_entry()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_pid_derives_proc_handle() {
        let opt = NamespaceOption::for_pid(NamespaceKind::Network, 100);
        assert_eq!(opt.path, PathBuf::from("/proc/100/ns/net"));
        let opt = NamespaceOption::for_pid(NamespaceKind::Mount, 7);
        assert_eq!(opt.path, PathBuf::from("/proc/7/ns/mnt"));
    }

    #[test]
    fn flags_are_distinct_single_letters() {
        let flags: std::collections::HashSet<_> =
            NamespaceKind::ALL.iter().map(|k| k.flag()).collect();
        assert_eq!(flags.len(), NamespaceKind::ALL.len());
        assert!(flags.iter().all(|f| f.len() == 1));
    }

    #[test]
    fn parses_entry_long_and_flag_names() {
        assert_eq!("net".parse::<NamespaceKind>().unwrap(), NamespaceKind::Network);
        assert_eq!("network".parse::<NamespaceKind>().unwrap(), NamespaceKind::Network);
        assert_eq!("n".parse::<NamespaceKind>().unwrap(), NamespaceKind::Network);
        assert_eq!("mount".parse::<NamespaceKind>().unwrap(), NamespaceKind::Mount);
        assert!("user".parse::<NamespaceKind>().is_err());
    }

    #[test]
    fn display_uses_proc_entry() {
        for kind in NamespaceKind::ALL {
            assert_eq!(kind.to_string().parse::<NamespaceKind>().unwrap(), kind);
        }
    }
}
