use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::{Child, Command};

use crate::error_handling::types::ProcessError;

/// A child executable owned by the session: the backend or the frontend.
///
/// On Unix the child leads its own process group, so signals reach anything
/// it spawned as well.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    child: Child,
    pid: Option<u32>,
    exited: bool,
}

impl ManagedProcess {
    /// Starts `exe` with `args`, working directory set to the executable's folder.
    pub fn spawn(
        name: &str,
        exe: &Path,
        args: &[String],
        stdin: Stdio,
    ) -> Result<Self, ProcessError> {
        if !exe.is_file() {
            return Err(ProcessError::NotFound(exe.display().to_string()));
        }

        let mut cmd = Command::new(exe);
        cmd.args(args).stdin(stdin).kill_on_drop(true);
        if let Some(dir) = exe.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(exe.display().to_string(), e))?;
        let pid = child.id();
        info!("Started {} ({}) pid {:?}", name, exe.display(), pid);

        Ok(Self {
            name: name.to_string(),
            child,
            pid,
            exited: false,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking check whether the child already exited.
    pub fn has_exited(&mut self) -> bool {
        if !self.exited {
            if let Ok(Some(status)) = self.child.try_wait() {
                debug!("{} exited on its own: {}", self.name, status);
                self.exited = true;
            }
        }
        self.exited
    }

    /// Stops the process tree: graceful request, `grace` to comply, then a
    /// forced kill of the whole group.
    ///
    /// Idempotent. Returns `true` once the process is known to be gone.
    pub async fn terminate(&mut self, grace: Duration) -> bool {
        if self.has_exited() {
            return true;
        }

        if self.request_exit() {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    info!("{} exited: {}", self.name, status);
                    self.exited = true;
                    return true;
                }
                Ok(Err(e)) => warn!("Waiting for {} failed: {}", self.name, e),
                Err(_) => warn!(
                    "{} still running after {:?}, killing it",
                    self.name, grace
                ),
            }
        }

        self.kill_group();
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill {}: {}", self.name, e);
        }
        match self.child.wait().await {
            Ok(status) => {
                info!("{} killed: {}", self.name, status);
                self.exited = true;
                true
            }
            Err(e) => {
                warn!("{} could not be reaped: {}", self.name, e);
                false
            }
        }
    }

    #[cfg(unix)]
    fn request_exit(&self) -> bool {
        self.signal_group(nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn request_exit(&self) -> bool {
        false
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> bool {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return false;
        };
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) => {
                debug!("Sent {} to {} group {}", signal, self.name, pid);
                true
            }
            Err(e) => {
                debug!("{} to {} group {} failed: {}", signal, self.name, pid, e);
                false
            }
        }
    }
}
