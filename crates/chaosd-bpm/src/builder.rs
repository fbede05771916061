//! Fluent construction of managed helper processes.
//!
//! The command line is assembled from the inside out:
//!
//! ```text
//! nice -n 19 [pause] [nsexec [-l] (-<flag> <path>)* --] <command> [args...]
//! ```

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::sync::Arc;

use chaosd_common::config::HelperPaths;
use tokio::process::Command;

use crate::namespace::{NamespaceKind, NamespaceOption};
use crate::process::ManagedProcess;

/// Replaces real command construction.
///
/// Receives the program and argv after namespace and pause wrapping. The
/// returned command is used as-is: no scheduling wrapper and no
/// parent-death signal are added.
pub type ProcessFactory = Arc<dyn Fn(&OsStr, &[OsString]) -> Command + Send + Sync>;

/// Builder for a [`ManagedProcess`]. Consumed by [`ProcessBuilder::build`].
pub struct ProcessBuilder {
    command: OsString,
    args: Vec<OsString>,
    namespace_options: Vec<NamespaceOption>,
    local_mount: bool,
    pause: bool,
    identifier: Option<String>,
    helpers: HelperPaths,
    factory: Option<ProcessFactory>,
}

impl fmt::Debug for ProcessBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessBuilder")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("namespace_options", &self.namespace_options)
            .field("local_mount", &self.local_mount)
            .field("pause", &self.pause)
            .field("identifier", &self.identifier)
            .field("helpers", &self.helpers)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

impl ProcessBuilder {
    /// Creates a builder for `command` with default helper paths.
    #[must_use]
    pub fn new(command: impl Into<OsString>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            namespace_options: Vec::new(),
            local_mount: false,
            pause: false,
            identifier: None,
            helpers: HelperPaths::default(),
            factory: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds a namespace to enter. Namespaces are entered in the order added.
    #[must_use]
    pub fn namespace(mut self, option: NamespaceOption) -> Self {
        self.namespace_options.push(option);
        self
    }

    /// Adds several namespaces, keeping their order.
    #[must_use]
    pub fn namespaces(mut self, options: impl IntoIterator<Item = NamespaceOption>) -> Self {
        self.namespace_options.extend(options);
        self
    }

    /// Adds the `kind` namespace of process `pid`.
    #[must_use]
    pub fn set_ns(self, pid: u32, kind: NamespaceKind) -> Self {
        self.namespace(NamespaceOption::for_pid(kind, pid))
    }

    /// Enters the mount namespace with a private (local) propagation.
    /// Ignored when no namespace is set.
    #[must_use]
    pub const fn local_mount(mut self, enabled: bool) -> Self {
        self.local_mount = enabled;
        self
    }

    /// Interposes the pause placeholder as the outermost wrapped command.
    #[must_use]
    pub const fn pause(mut self, enabled: bool) -> Self {
        self.pause = enabled;
        self
    }

    /// Sets the correlation identifier. A random UUID is used otherwise.
    #[must_use]
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Overrides helper binary locations and niceness.
    #[must_use]
    pub fn helpers(mut self, helpers: HelperPaths) -> Self {
        self.helpers = helpers;
        self
    }

    /// Installs a construction strategy used instead of the real command.
    #[must_use]
    pub fn factory<F>(self, factory: F) -> Self
    where
        F: Fn(&OsStr, &[OsString]) -> Command + Send + Sync + 'static,
    {
        self.shared_factory(Arc::new(factory))
    }

    /// Installs a construction strategy shared with other builders.
    #[must_use]
    pub fn shared_factory(mut self, factory: ProcessFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Program and argv after namespace and pause wrapping, before the
    /// scheduling wrapper.
    fn wrapped_command_line(&self) -> (OsString, Vec<OsString>) {
        let mut program = self.command.clone();
        let mut args = self.args.clone();

        if !self.namespace_options.is_empty() {
            let mut ns_args = Vec::with_capacity(2 * self.namespace_options.len() + args.len() + 3);
            if self.local_mount {
                ns_args.push(OsString::from("-l"));
            }
            // nsexec joins namespaces in flag order.
            for option in &self.namespace_options {
                ns_args.push(OsString::from(format!("-{}", option.kind.flag())));
                ns_args.push(option.path.clone().into_os_string());
            }
            ns_args.push(OsString::from("--"));
            ns_args.push(program);
            ns_args.append(&mut args);
            program = self.helpers.nsexec.clone().into_os_string();
            args = ns_args;
        }

        if self.pause {
            let mut pause_args = Vec::with_capacity(args.len() + 1);
            pause_args.push(program);
            pause_args.append(&mut args);
            program = self.helpers.pause.clone().into_os_string();
            args = pause_args;
        }

        (program, args)
    }

    /// Assembles the process. Never fails: bad paths or missing binaries
    /// surface when the process is started.
    #[must_use]
    pub fn build(self) -> ManagedProcess {
        let (program, args) = self.wrapped_command_line();
        let identifier = self
            .identifier
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Some(factory) = &self.factory {
            tracing::debug!(%identifier, "building command through factory");
            return ManagedProcess::new(identifier, factory(&program, &args));
        }

        let mut argv = Vec::with_capacity(args.len() + 3);
        argv.push(OsString::from("-n"));
        argv.push(OsString::from(self.helpers.niceness.to_string()));
        argv.push(program);
        argv.extend(args);

        tracing::info!(
            %identifier,
            command = %render(self.helpers.nice.as_os_str(), &argv),
            "build command"
        );

        let mut command = Command::new(&self.helpers.nice);
        let _ = command.args(&argv).kill_on_drop(true);
        set_parent_death_signal(&mut command);

        ManagedProcess::new(identifier, command)
    }
}

fn render(program: &OsStr, args: &[OsString]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(OsString::as_os_str))
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Delivers `SIGTERM` to the child when this process dies.
#[cfg(target_os = "linux")]
fn set_parent_death_signal(command: &mut Command) {
    use nix::sys::prctl;
    use nix::sys::signal::Signal;

    // SAFETY: the hook runs between fork and exec and only calls prctl(2),
    // which is async-signal-safe and touches no shared state.
    let _ = unsafe {
        command.pre_exec(|| prctl::set_pdeathsig(Signal::SIGTERM).map_err(std::io::Error::from))
    };
}

/// Parent-death signals are Linux-only.
#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal(_command: &mut Command) {
    tracing::warn!("parent-death signal is not supported on this platform");
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn bare_command_runs_under_nice_only() {
        let process = ProcessBuilder::new("echo").arg("hi").build();
        assert_eq!(process.command_line(), vec!["nice", "-n", "19", "echo", "hi"]);
    }

    #[test]
    fn namespaces_keep_declared_order() {
        let process = ProcessBuilder::new("echo")
            .arg("hi")
            .namespace(NamespaceOption::new(NamespaceKind::Network, "/proc/100/ns/net"))
            .namespace(NamespaceOption::new(NamespaceKind::Mount, "/proc/100/ns/mnt"))
            .build();
        assert_eq!(
            process.command_line(),
            vec![
                "nice",
                "-n",
                "19",
                "/usr/local/bin/nsexec",
                "-n",
                "/proc/100/ns/net",
                "-m",
                "/proc/100/ns/mnt",
                "--",
                "echo",
                "hi",
            ]
        );
    }

    #[test]
    fn every_flag_is_followed_by_its_path() {
        let kinds = [
            NamespaceKind::Pid,
            NamespaceKind::Mount,
            NamespaceKind::Uts,
            NamespaceKind::Ipc,
            NamespaceKind::Network,
        ];
        let builder = kinds
            .iter()
            .fold(ProcessBuilder::new("sleep").arg("1"), |b, kind| b.set_ns(42, *kind));
        let (program, args) = builder.wrapped_command_line();
        assert_eq!(program, OsString::from("/usr/local/bin/nsexec"));

        let args = strings(&args);
        let separator = args.iter().position(|a| a == "--").unwrap();
        let flags = &args[..separator];
        assert_eq!(flags.len(), kinds.len() * 2);
        for (pair, kind) in flags.chunks(2).zip(kinds) {
            assert_eq!(pair[0], format!("-{}", kind.flag()));
            assert_eq!(pair[1], format!("/proc/42/ns/{}", kind.proc_entry()));
        }
        assert_eq!(&args[separator + 1..], ["sleep", "1"]);
    }

    #[test]
    fn local_mount_flag_precedes_namespace_flags() {
        let (_, args) = ProcessBuilder::new("ls")
            .set_ns(9, NamespaceKind::Mount)
            .local_mount(true)
            .wrapped_command_line();
        assert_eq!(strings(&args), vec!["-l", "-m", "/proc/9/ns/mnt", "--", "ls"]);
    }

    #[test]
    fn local_mount_without_namespaces_is_ignored() {
        let (program, args) = ProcessBuilder::new("ls").local_mount(true).wrapped_command_line();
        assert_eq!(program, OsString::from("ls"));
        assert!(args.is_empty());
    }

    #[test]
    fn pause_wraps_plain_command() {
        let (program, args) = ProcessBuilder::new("sleep")
            .arg("60")
            .pause(true)
            .wrapped_command_line();
        assert_eq!(program, OsString::from("/usr/local/bin/pause"));
        assert_eq!(strings(&args), vec!["sleep", "60"]);
    }

    #[test]
    fn pause_is_outermost_with_namespaces() {
        let process = ProcessBuilder::new("tc")
            .args(["qdisc", "show"])
            .set_ns(5, NamespaceKind::Network)
            .pause(true)
            .build();
        assert_eq!(
            process.command_line(),
            vec![
                "nice",
                "-n",
                "19",
                "/usr/local/bin/pause",
                "/usr/local/bin/nsexec",
                "-n",
                "/proc/5/ns/net",
                "--",
                "tc",
                "qdisc",
                "show",
            ]
        );
    }

    #[test]
    fn helper_paths_and_niceness_are_configurable() {
        let helpers = HelperPaths {
            nsexec: PathBuf::from("/opt/chaos/nsexec"),
            pause: PathBuf::from("/opt/chaos/pause"),
            nice: PathBuf::from("/usr/bin/nice"),
            niceness: 10,
        };
        let process = ProcessBuilder::new("true")
            .set_ns(1, NamespaceKind::Uts)
            .helpers(helpers)
            .build();
        assert_eq!(
            process.command_line(),
            vec!["/usr/bin/nice", "-n", "10", "/opt/chaos/nsexec", "-u", "/proc/1/ns/uts", "--", "true"]
        );
    }

    #[test]
    fn factory_receives_wrapped_command_without_nice() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let process = ProcessBuilder::new("echo")
            .arg("hi")
            .set_ns(3, NamespaceKind::Pid)
            .identifier("inject-1")
            .factory(move |program, args| {
                let mut line = vec![program.to_string_lossy().into_owned()];
                line.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
                *recorder.lock().unwrap() = line;
                Command::new("true")
            })
            .build();

        assert_eq!(process.identifier(), "inject-1");
        assert_eq!(process.command_line(), vec!["true"]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["/usr/local/bin/nsexec", "-p", "/proc/3/ns/pid", "--", "echo", "hi"]
        );
    }

    #[test]
    fn missing_identifier_gets_a_uuid() {
        let a = ProcessBuilder::new("true").build();
        let b = ProcessBuilder::new("true").build();
        assert!(uuid::Uuid::parse_str(a.identifier()).is_ok());
        assert_ne!(a.identifier(), b.identifier());
    }
}
