//! Worker units as tokio tasks for simulation mode

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::SharedClock;
use crate::id::WorkerId;
use crate::protocol::{MessageBus, ProtocolError};
use crate::worker::{Worker, WorkerProfile, WorkerSummary};

use super::error::PoolError;
use super::launcher::Launcher;

/// First synthetic id; low ids are left for the controller
const FIRST_TASK_ID: i32 = 1000;

/// How often tasks are checked for an exit nobody announced
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type WorkerTask = JoinHandle<Result<WorkerSummary, ProtocolError>>;

/// Runs each worker as a task on the shared in-memory bus
pub struct TaskLauncher {
    bus: Arc<MessageBus>,
    clock: SharedClock,
    profile: WorkerProfile,
    next_id: i32,
    tasks: HashMap<WorkerId, WorkerTask>,
}

impl TaskLauncher {
    pub fn new(bus: Arc<MessageBus>, clock: SharedClock, profile: WorkerProfile) -> Self {
        debug!(?profile, "TaskLauncher::new: called");
        Self {
            bus,
            clock,
            profile,
            next_id: FIRST_TASK_ID,
            tasks: HashMap::new(),
        }
    }

    /// Tasks not yet reaped
    pub fn running(&self) -> usize {
        self.tasks.len()
    }
}

#[async_trait]
impl Launcher for TaskLauncher {
    fn label(&self) -> &'static str {
        "task"
    }

    async fn launch(&mut self) -> Result<WorkerId, PoolError> {
        let id = WorkerId::from_raw(self.next_id);
        self.next_id += 1;
        debug!(%id, "TaskLauncher::launch: called");

        let worker = Worker::new(id, self.bus.clone(), self.clock.clone(), self.profile);
        self.tasks.insert(id, tokio::spawn(worker.run()));
        Ok(id)
    }

    async fn wait(&mut self, id: WorkerId) -> Result<(), PoolError> {
        debug!(%id, "TaskLauncher::wait: called");
        let handle = self.tasks.remove(&id).ok_or(PoolError::UnknownWorker(id))?;
        match handle.await {
            Ok(Ok(summary)) => {
                debug!(%id, cycles = summary.cycles, "TaskLauncher::wait: worker finished");
                Ok(())
            }
            Ok(Err(e)) => Err(PoolError::Task {
                id,
                reason: e.to_string(),
            }),
            Err(e) => Err(PoolError::Task {
                id,
                reason: e.to_string(),
            }),
        }
    }

    async fn terminate(&mut self, id: WorkerId) -> Result<(), PoolError> {
        debug!(%id, "TaskLauncher::terminate: called");
        if let Some(handle) = self.tasks.remove(&id) {
            handle.abort();
            // Cancelled or already finished, either way it is gone
            let _ = handle.await;
        }
        Ok(())
    }

    async fn next_exit(&mut self) -> Result<WorkerId, PoolError> {
        loop {
            if let Some(id) = self
                .tasks
                .iter()
                .find_map(|(id, handle)| handle.is_finished().then_some(*id))
            {
                debug!(%id, "TaskLauncher::next_exit: task finished");
                return Ok(id);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}
