//! Wiring a configured run together
//!
//! A session picks the worker flavor, creates the shared clock and the
//! token channel, hands them to a [`Coordinator`] and returns its report.
//! Everything created here is released when the session returns, on
//! success and on failure alike.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorConfig, RunReport};
use crate::pool::{ProcessLauncher, TaskLauncher};
use crate::protocol::{MessageBus, SocketHub};
use crate::worker::WorkerEnv;

/// Name of the worker binary installed next to `tp`
pub const WORKER_PROGRAM: &str = "tp-user";

/// Run to completion with workers as tasks or as processes
pub async fn run(config: &Config, simulate: bool, shutdown: mpsc::Receiver<()>) -> Result<RunReport> {
    if simulate {
        run_simulated(config, shutdown).await
    } else {
        run_processes(config, shutdown).await
    }
}

/// Workers are tokio tasks sharing an in-memory bus and clock
pub async fn run_simulated(config: &Config, shutdown: mpsc::Receiver<()>) -> Result<RunReport> {
    info!("Running workers as in-process tasks");
    let bus = Arc::new(MessageBus::new());
    let clock = SharedClock::local();
    let launcher = TaskLauncher::new(bus.clone(), clock.clone(), config.worker.profile);

    Coordinator::new(CoordinatorConfig::from(config), clock, bus, Box::new(launcher))
        .run(shutdown)
        .await
}

/// Workers are `tp-user` processes attached to a shared-memory clock and a socket hub
pub async fn run_processes(config: &Config, shutdown: mpsc::Receiver<()>) -> Result<RunReport> {
    let pid = std::process::id();
    let program = worker_program(config)?;
    info!(program = %program.display(), "Running workers as child processes");

    let clock_name = clock_segment_name(pid);
    let clock = SharedClock::create(&clock_name).context(format!("Failed to create shared clock {}", clock_name))?;

    let socket = socket_path(pid);
    let hub = Arc::new(SocketHub::bind(&socket).context(format!("Failed to bind worker socket {}", socket.display()))?);

    let env = WorkerEnv {
        socket,
        clock: clock_name,
        log_file: config.log.file.clone(),
        log_level: config.log.level.clone().unwrap_or_else(|| "info".to_string()),
        profile: config.worker.profile,
    };
    let launcher = ProcessLauncher::new(program, env.to_vars());

    Coordinator::new(CoordinatorConfig::from(config), clock, hub, Box::new(launcher))
        .run(shutdown)
        .await
}

/// Shared-memory object name for a controller process
pub fn clock_segment_name(pid: u32) -> String {
    format!("/tokenpool-{}-clock", pid)
}

/// Socket path for a controller process
pub fn socket_path(pid: u32) -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(format!("tokenpool-{}.sock", pid))
}

/// Configured worker program, or `tp-user` beside the running executable
pub fn worker_program(config: &Config) -> Result<PathBuf> {
    let program = match &config.worker.program {
        Some(program) => program.clone(),
        None => {
            let exe = std::env::current_exe().context("Failed to get current executable")?;
            exe.with_file_name(WORKER_PROGRAM)
        }
    };
    debug!(program = %program.display(), "worker_program: resolved");

    if !program.exists() {
        return Err(eyre::eyre!("Worker program not found: {}", program.display()));
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RunState;
    use tempfile::TempDir;

    #[test]
    fn test_resource_names() {
        assert_eq!(clock_segment_name(42), "/tokenpool-42-clock");
        assert!(socket_path(42).ends_with("tokenpool-42.sock"));
    }

    #[test]
    fn test_missing_worker_program() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.worker.program = Some(temp.path().join("no-such-worker"));
        assert!(worker_program(&config).is_err());
    }

    #[test]
    fn test_configured_worker_program() {
        let temp = TempDir::new().unwrap();
        let program = temp.path().join("worker");
        std::fs::write(&program, "").unwrap();

        let mut config = Config::default();
        config.worker.program = Some(program.clone());
        assert_eq!(worker_program(&config).unwrap(), program);
    }

    #[tokio::test]
    async fn test_simulated_run_terminates() {
        let mut config = Config::default();
        config.pool.initial_workers = 2;
        config.pool.hard_cap = 4;
        config.run.time_limit_secs = 100;
        config.worker.profile.max_lifetime_ns = 1_000;
        config.worker.profile.seed = Some(3);

        let (_tx, rx) = mpsc::channel(1);
        let report = run(&config, true, rx).await.unwrap();

        assert_eq!(report.state, RunState::Terminated);
        assert_eq!(report.started, 4);
        assert_eq!(report.exited, 4);
    }
}
