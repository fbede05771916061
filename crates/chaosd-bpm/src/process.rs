//! Caller-owned helper process.
//!
//! A [`ManagedProcess`] is the only handle to its child. Nothing else in
//! the workspace signals or reaps it, and dropping it kills the child.

use std::io;
use std::process::ExitStatus;

use chaosd_common::error::{ChaosdError, Result};
use chrono::{DateTime, Utc};
use tokio::process::{Child, Command};

/// A built helper process and, once started, its running child.
#[derive(Debug)]
pub struct ManagedProcess {
    identifier: String,
    command: Command,
    child: Option<Child>,
    started_at: Option<DateTime<Utc>>,
}

impl ManagedProcess {
    pub(crate) const fn new(identifier: String, command: Command) -> Self {
        Self {
            identifier,
            command,
            child: None,
            started_at: None,
        }
    }

    /// Caller-assigned correlation identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Program and arguments as they will be executed.
    #[must_use]
    pub fn command_line(&self) -> Vec<String> {
        let std = self.command.as_std();
        std::iter::once(std.get_program())
            .chain(std.get_args())
            .map(|part| part.to_string_lossy().into_owned())
            .collect()
    }

    /// Mutable access to the command, for stdio or environment setup
    /// before [`start`](Self::start).
    pub fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }

    /// Spawns the process and returns its PID.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosdError::Process`] if the process was already started
    /// or cannot be spawned (missing binary, permission denied).
    pub fn start(&mut self) -> Result<u32> {
        if self.child.is_some() {
            return Err(self.error(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "process already started",
            )));
        }

        let child = self.command.spawn().map_err(|e| self.error(e))?;
        let pid = child.id().unwrap_or_default();
        self.child = Some(child);
        self.started_at = Some(Utc::now());
        tracing::info!(identifier = %self.identifier, pid, "managed process started");
        Ok(pid)
    }

    /// PID of the running child. `None` before start or after reaping.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// When the process was started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Sends `SIGKILL` and reaps the child.
    ///
    /// # Errors
    ///
    /// Returns an error if the process was never started or cannot be killed.
    pub async fn kill(&mut self) -> Result<()> {
        let identifier = self.identifier.clone();
        let child = self.running_child()?;
        child.kill().await.map_err(|source| ChaosdError::Process {
            identifier: identifier.clone(),
            source,
        })?;
        tracing::info!(%identifier, "managed process killed");
        Ok(())
    }

    /// Waits for the child to exit and returns its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the process was never started or waiting fails.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let identifier = self.identifier.clone();
        let child = self.running_child()?;
        let status = child.wait().await.map_err(|source| ChaosdError::Process {
            identifier: identifier.clone(),
            source,
        })?;
        tracing::debug!(%identifier, %status, "managed process exited");
        Ok(status)
    }

    fn running_child(&mut self) -> Result<&mut Child> {
        match self.child.as_mut() {
            Some(child) => Ok(child),
            None => Err(ChaosdError::Process {
                identifier: self.identifier.clone(),
                source: io::Error::other("process has not been started"),
            }),
        }
    }

    fn error(&self, source: io::Error) -> ChaosdError {
        ChaosdError::Process {
            identifier: self.identifier.clone(),
            source,
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::ffi::{OsStr, OsString};
    use std::time::{Duration, Instant};

    use nix::sys::signal::Signal;
    use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
    use nix::unistd::Pid;

    use crate::builder::ProcessBuilder;

    use super::*;

    fn shell(script: &'static str) -> impl Fn(&OsStr, &[OsString]) -> Command + Send + Sync + 'static {
        move |_, _| {
            let mut command = Command::new("sh");
            let _ = command.arg("-c").arg(script).kill_on_drop(true);
            command
        }
    }

    #[tokio::test]
    async fn wait_reports_exit_code() {
        let mut process = ProcessBuilder::new("ignored")
            .identifier("exit-3")
            .factory(shell("exit 3"))
            .build();
        let pid = process.start().unwrap();
        assert!(pid > 0);
        assert!(process.started_at().is_some());
        let status = process.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn command_can_be_adjusted_before_start() {
        let mut process = ProcessBuilder::new("ignored")
            .factory(shell("exit $CHAOSD_EXIT"))
            .build();
        let _ = process.command_mut().env("CHAOSD_EXIT", "7");
        let _ = process.start().unwrap();
        assert_eq!(process.wait().await.unwrap().code(), Some(7));
    }

    #[tokio::test]
    async fn real_build_runs_under_nice() {
        let mut process = ProcessBuilder::new("true").build();
        let _ = process.start().unwrap();
        assert!(process.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn kill_terminates_long_running_child() {
        let mut process = ProcessBuilder::new("ignored").factory(shell("sleep 30")).build();
        let _ = process.start().unwrap();
        assert!(process.pid().is_some());
        process.kill().await.unwrap();
        assert!(process.pid().is_none());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut process = ProcessBuilder::new("ignored").factory(shell("sleep 30")).build();
        let _ = process.start().unwrap();
        let err = process.start().unwrap_err();
        assert!(matches!(err, ChaosdError::Process { .. }));
        process.kill().await.unwrap();
    }

    #[tokio::test]
    async fn wait_before_start_fails() {
        let mut process = ProcessBuilder::new("true").identifier("idle").build();
        let err = process.wait().await.unwrap_err();
        assert!(err.to_string().contains("idle"));
    }

    #[test]
    fn child_gets_sigterm_when_spawning_thread_exits() {
        let spawner = std::thread::spawn(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let _guard = runtime.enter();
            let mut process = ProcessBuilder::new("sleep").arg("30").build();
            let _ = process.command_mut().kill_on_drop(false);
            let pid = process.start().unwrap();
            (process, pid)
        });
        let (process, pid) = spawner.join().unwrap();

        let pid = Pid::from_raw(i32::try_from(pid).unwrap());
        let deadline = Instant::now() + Duration::from_secs(10);
        let status = loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)).unwrap() {
                WaitStatus::StillAlive if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                status => break status,
            }
        };
        assert!(
            matches!(status, WaitStatus::Signaled(_, Signal::SIGTERM, _)),
            "unexpected status: {status:?}"
        );
        drop(process);
    }

    #[tokio::test]
    async fn missing_binary_fails_at_start_not_build() {
        let mut process = ProcessBuilder::new("x")
            .factory(|_, _| Command::new("/nonexistent/chaosd-helper"))
            .build();
        let err = process.start().unwrap_err();
        assert!(matches!(err, ChaosdError::Process { .. }));
    }
}
