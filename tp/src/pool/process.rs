//! Worker units as child processes

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::id::WorkerId;

use super::error::PoolError;
use super::launcher::Launcher;

/// How long a child gets to honor SIGTERM before it is killed
const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// How often children are polled for an exit nobody announced
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Launches `program` once per worker, passing the same environment to each
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    children: HashMap<WorkerId, Child>,
    grace: Duration,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, envs: Vec<(String, String)>) -> Self {
        let program = program.into();
        debug!(program = %program.display(), env_count = envs.len(), "ProcessLauncher::new: called");
        Self {
            program,
            args: Vec::new(),
            envs,
            children: HashMap::new(),
            grace: DEFAULT_GRACE,
        }
    }

    /// Extra command-line arguments for every child
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set how long terminate waits between SIGTERM and SIGKILL
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Children not yet reaped
    pub fn running(&self) -> usize {
        self.children.len()
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn label(&self) -> &'static str {
        "process"
    }

    async fn launch(&mut self) -> Result<WorkerId, PoolError> {
        debug!(program = %self.program.display(), "ProcessLauncher::launch: called");
        let child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PoolError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let id = WorkerId::from(child.id().ok_or(PoolError::MissingPid)?);
        debug!(%id, "ProcessLauncher::launch: child spawned");
        self.children.insert(id, child);
        Ok(id)
    }

    async fn wait(&mut self, id: WorkerId) -> Result<(), PoolError> {
        debug!(%id, "ProcessLauncher::wait: called");
        let mut child = self.children.remove(&id).ok_or(PoolError::UnknownWorker(id))?;
        let status = child.wait().await.map_err(|source| PoolError::Wait { id, source })?;
        if !status.success() {
            warn!(%id, %status, "Worker exited unsuccessfully");
        }
        Ok(())
    }

    async fn terminate(&mut self, id: WorkerId) -> Result<(), PoolError> {
        debug!(%id, "ProcessLauncher::terminate: called");
        let Some(mut child) = self.children.remove(&id) else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(%id, %status, "ProcessLauncher::terminate: already exited");
            return Ok(());
        }

        match kill(Pid::from_raw(id.as_raw()), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(source) => return Err(PoolError::Signal { id, source }),
        }

        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(result) => {
                result.map_err(|source| PoolError::Wait { id, source })?;
            }
            Err(_) => {
                warn!(%id, "Worker ignored SIGTERM, sending SIGKILL");
                child.kill().await.map_err(|source| PoolError::Wait { id, source })?;
            }
        }
        Ok(())
    }

    async fn next_exit(&mut self) -> Result<WorkerId, PoolError> {
        loop {
            for (id, child) in self.children.iter_mut() {
                let status = child
                    .try_wait()
                    .map_err(|source| PoolError::Wait { id: *id, source })?;
                if let Some(status) = status {
                    debug!(%id, %status, "ProcessLauncher::next_exit: child finished");
                    return Ok(*id);
                }
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}
