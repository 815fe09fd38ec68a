//! Admission control for the worker pool

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::clock::SimTime;
use crate::id::WorkerId;

use super::error::PoolError;
use super::launcher::Launcher;

/// Absolute ceiling on workers started in one run
pub const HARD_CAP: u32 = 100;

/// Outcome of asking the pool for another worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started(WorkerId),
    /// The run has already started as many workers as it ever will
    Exhausted,
    /// Admission was closed by a stop condition
    Closed,
}

/// Tracks how many workers were started and how many have exited
pub struct ProcessPool {
    launcher: Box<dyn Launcher>,
    hard_cap: u32,
    started: u32,
    exited: u32,
    admitting: bool,
    live: HashSet<WorkerId>,
}

impl ProcessPool {
    /// Pool limited to `hard_cap` starts, never more than [`HARD_CAP`]
    pub fn new(launcher: Box<dyn Launcher>, hard_cap: u32) -> Self {
        let hard_cap = hard_cap.min(HARD_CAP);
        debug!(hard_cap, launcher = launcher.label(), "ProcessPool::new: called");
        Self {
            launcher,
            hard_cap,
            started: 0,
            exited: 0,
            admitting: true,
            live: HashSet::new(),
        }
    }

    /// Start one worker if the cap and admission allow it
    pub async fn spawn(&mut self, now: SimTime) -> Result<Admission, PoolError> {
        debug!(started = self.started, hard_cap = self.hard_cap, "ProcessPool::spawn: called");
        if !self.admitting {
            return Ok(Admission::Closed);
        }
        if self.is_exhausted() {
            return Ok(Admission::Exhausted);
        }

        let id = self.launcher.launch().await?;
        self.started += 1;
        self.live.insert(id);
        info!(%id, at = %now, started = self.started, "Creating new worker");
        Ok(Admission::Started(id))
    }

    /// Count a worker's exit announcement
    ///
    /// Returns false for ids the pool does not consider live, so a repeated
    /// or forged announcement cannot push the exit count past the start count.
    pub fn record_exit(&mut self, id: WorkerId, now: SimTime) -> bool {
        if !self.live.remove(&id) {
            warn!(%id, "Exit announced by a worker that is not live");
            return false;
        }
        self.exited += 1;
        info!(%id, at = %now, exited = self.exited, "Worker exited");
        true
    }

    /// Wait for an exited worker to finish
    pub async fn reap(&mut self, id: WorkerId) -> Result<(), PoolError> {
        debug!(%id, "ProcessPool::reap: called");
        self.launcher.wait(id).await
    }

    /// Wait for a worker to finish on its own
    ///
    /// The worker stays unreaped; follow up with [`ProcessPool::reap`].
    pub async fn next_exit(&mut self) -> Result<WorkerId, PoolError> {
        self.launcher.next_exit().await
    }

    /// Whether `id` was started and has not been counted as exited
    pub fn is_live(&self, id: WorkerId) -> bool {
        self.live.contains(&id)
    }

    /// Stop admitting new workers for the rest of the run
    pub fn close_admission(&mut self) {
        if self.admitting {
            debug!(started = self.started, exited = self.exited, "ProcessPool::close_admission: called");
            self.admitting = false;
        }
    }

    pub fn is_admitting(&self) -> bool {
        self.admitting
    }

    pub fn is_exhausted(&self) -> bool {
        self.started >= self.hard_cap
    }

    /// Every worker that was started has exited
    pub fn is_drained(&self) -> bool {
        self.exited >= self.started
    }

    pub fn started(&self) -> u32 {
        self.started
    }

    pub fn exited(&self) -> u32 {
        self.exited
    }

    pub fn hard_cap(&self) -> u32 {
        self.hard_cap
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Stop every worker still running
    pub async fn shutdown(&mut self) {
        debug!(live = self.live.len(), "ProcessPool::shutdown: called");
        self.admitting = false;
        if !self.live.is_empty() {
            info!("Stopping {} remaining workers", self.live.len());
        }
        for id in self.live.drain() {
            if let Err(e) = self.launcher.terminate(id).await {
                warn!(%id, error = %e, "Failed to stop worker");
            }
        }
    }
}
