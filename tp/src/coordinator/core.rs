//! Main coordinator loop

use std::sync::Arc;

use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::id::WorkerId;
use crate::pool::{Admission, Launcher, PoolError, ProcessPool};
use crate::protocol::{ControllerChannel, Envelope, Handshake, ProtocolError, ReplyMessage, Step};

use super::config::CoordinatorConfig;
use super::report::RunReport;
use super::state::{RunState, StopFlag, StopReason};

/// What ended a wait in [`Coordinator::cycle`]
enum Wake {
    Message(Result<Envelope, ProtocolError>),
    Interrupted,
    StopRaised,
    WorkerGone(Result<WorkerId, PoolError>),
}

/// Owns the clock, the pool and the controller end of the token channel
pub struct Coordinator {
    config: CoordinatorConfig,
    identity: WorkerId,
    clock: SharedClock,
    channel: Arc<dyn ControllerChannel>,
    pool: ProcessPool,
    handshake: Handshake,
    state: RunState,
    stop: StopFlag,
    stop_reason: Option<StopReason>,
    interrupted: bool,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        clock: SharedClock,
        channel: Arc<dyn ControllerChannel>,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        debug!(?config, "Coordinator::new: called");
        let pool = ProcessPool::new(launcher, config.hard_cap);
        Self {
            config,
            identity: WorkerId::current_process(),
            clock,
            channel,
            pool,
            handshake: Handshake::new(),
            state: RunState::Starting,
            stop: StopFlag::new(),
            stop_reason: None,
            interrupted: false,
        }
    }

    /// Sender id stamped on replies; defaults to this process id
    pub fn with_identity(mut self, identity: WorkerId) -> Self {
        self.identity = identity;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Flag that closes admission when raised
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Run until every started worker has exited, or until `shutdown` fires
    ///
    /// Shared state is torn down on every path out, including errors.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<RunReport> {
        info!(
            initial_workers = self.config.initial_workers,
            hard_cap = self.config.hard_cap,
            time_limit_secs = self.config.time_limit_secs,
            "Coordinator starting"
        );
        let timer = self.stop.arm(self.config.wall_limit());

        let result = self.drive(&mut shutdown).await;
        timer.abort();
        if let Err(e) = &result {
            error!(error = %e, "Run failed");
        }
        self.teardown().await;
        result?;

        let report = self.report();
        info!(%report, "Coordinator finished");
        Ok(report)
    }

    async fn drive(&mut self, shutdown: &mut mpsc::Receiver<()>) -> Result<()> {
        self.start().await?;
        while self.state != RunState::Terminated {
            if !self.cycle(shutdown).await? {
                break;
            }
        }
        Ok(())
    }

    /// Reset the clock and spawn the initial batch
    async fn start(&mut self) -> Result<()> {
        debug!("Coordinator::start: called");
        self.state = RunState::Starting;
        self.clock.reset();

        for _ in 0..self.config.initial_workers {
            match self
                .pool
                .spawn(self.clock.now())
                .await
                .context("Failed to spawn initial workers")?
            {
                Admission::Started(_) => {}
                Admission::Exhausted | Admission::Closed => break,
            }
        }

        self.state = RunState::Running;
        self.check_bounds();
        self.settle();
        Ok(())
    }

    /// Process one received message
    ///
    /// Returns false when the run was interrupted.
    async fn cycle(&mut self, shutdown: &mut mpsc::Receiver<()>) -> Result<bool> {
        let phase = self.handshake.expecting();
        debug!(?phase, state = %self.state, "Coordinator::cycle: called");

        let stop_pending = !self.stop.is_raised();
        let watching = self.pool.live_count() > 0;
        let wake = tokio::select! {
            received = self.channel.recv(phase) => Wake::Message(received),
            Some(_) = shutdown.recv() => Wake::Interrupted,
            _ = self.stop.raised(), if stop_pending => Wake::StopRaised,
            gone = self.pool.next_exit(), if watching => Wake::WorkerGone(gone),
        };

        let env = match wake {
            Wake::Message(received) => received.context("Failed to receive on token channel")?,
            Wake::Interrupted => {
                warn!("Interrupted, ending run early");
                self.interrupted = true;
                return Ok(false);
            }
            Wake::StopRaised => {
                self.check_bounds();
                self.settle();
                return Ok(true);
            }
            Wake::WorkerGone(gone) => {
                let id = gone.context("Failed to check workers for exits")?;
                self.lost(id).await;
                return Ok(true);
            }
        };

        let step = self.handshake.accept(&env);
        let mut exiting = None;
        match step {
            Step::Discarded { tag, sender } => {
                warn!(tag, %sender, "Discarding unrecognized message");
                return Ok(true);
            }
            Step::Locked(id) => {
                debug!(%id, "Coordinator::cycle: token granted");
            }
            Step::Unlocked(id) => {
                debug!(%id, "Coordinator::cycle: token released");
                if let Some(gone) = self.clock.take_exit()
                    && self.pool.record_exit(gone, self.clock.now())
                {
                    exiting = Some(gone);
                    self.replace().await;
                }
            }
        }

        self.clock.advance(self.config.quantum_ns);
        self.check_bounds();

        let to = step.sender();
        match self.channel.reply(ReplyMessage { to, from: self.identity }).await {
            Ok(()) => {}
            Err(ProtocolError::NoRoute(id)) => {
                // Its connection is gone; the exit watch accounts for the worker
                warn!(%id, "Dropping reply for disconnected worker");
                self.handshake.release(id);
            }
            Err(e) => return Err(e).context(format!("Failed to reply to worker {}", to)),
        }

        if let Some(gone) = exiting
            && let Err(e) = self.pool.reap(gone).await
        {
            warn!(id = %gone, error = %e, "Failed to reap worker");
        }

        self.settle();
        Ok(true)
    }

    /// Account for a worker that finished without announcing its exit
    async fn lost(&mut self, id: WorkerId) {
        debug!(%id, "Coordinator::lost: called");
        if self.pool.is_live(id) {
            warn!(%id, "Worker exited without announcing it");
            self.pool.record_exit(id, self.clock.now());
            if self.handshake.release(id) {
                warn!(%id, "Token holder is gone, accepting the next LOCK");
            }
            self.replace().await;
        }

        if let Err(e) = self.pool.reap(id).await {
            warn!(%id, error = %e, "Failed to reap worker");
        }
        self.check_bounds();
        self.settle();
    }

    /// Start a replacement for a worker that just exited
    async fn replace(&mut self) {
        self.check_bounds();
        if self.state != RunState::Running {
            return;
        }
        match self.pool.spawn(self.clock.now()).await {
            Ok(Admission::Started(_)) | Ok(Admission::Closed) => {}
            Ok(Admission::Exhausted) => self.close_admission(StopReason::PoolExhausted),
            Err(e) => {
                error!(error = %e, "Failed to spawn replacement worker");
                self.close_admission(StopReason::SpawnFailed);
            }
        }
    }

    /// Close admission if any bound holds
    fn check_bounds(&mut self) {
        let reason = if self.pool.exited() >= self.pool.hard_cap() {
            Some(StopReason::ExitCap)
        } else if self.clock.has_elapsed(self.config.time_limit_secs) {
            Some(StopReason::TimeBound)
        } else if self.stop.is_raised() {
            Some(StopReason::WallClock)
        } else if self.pool.is_exhausted() {
            Some(StopReason::PoolExhausted)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.close_admission(reason);
        }
    }

    fn close_admission(&mut self, reason: StopReason) {
        if self.state != RunState::Running {
            return;
        }
        if reason == StopReason::TimeBound {
            info!("Stopping after {} seconds", self.config.time_limit_secs);
        }
        info!(%reason, at = %self.clock.now(), "Closing admission");
        self.pool.close_admission();
        self.stop_reason = Some(reason);
        self.state = RunState::Draining;
    }

    /// Terminate once draining has nothing left to wait for
    fn settle(&mut self) {
        if self.state == RunState::Draining && self.pool.is_drained() {
            info!(
                started = self.pool.started(),
                exited = self.pool.exited(),
                "All workers exited"
            );
            self.state = RunState::Terminated;
        }
    }

    async fn teardown(&mut self) {
        debug!(live = self.pool.live_count(), "Coordinator::teardown: called");
        self.pool.close_admission();
        self.channel.close().await;
        self.pool.shutdown().await;
        self.state = RunState::Terminated;
    }

    fn report(&self) -> RunReport {
        let stats = self.handshake.stats();
        RunReport {
            started: self.pool.started(),
            exited: self.pool.exited(),
            cycles: stats.unlocks,
            locks: stats.locks,
            unlocks: stats.unlocks,
            discarded: stats.discarded,
            final_time: self.clock.now(),
            state: self.state,
            interrupted: self.interrupted,
            stop_reason: self.stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimTime;
    use crate::pool::manager::tests::StubLauncher;
    use crate::protocol::{Envelope, MessageBus, Phase, WorkerChannel};
    use std::time::Duration;

    const CONTROLLER: WorkerId = WorkerId::from_raw(1);

    fn config(initial_workers: u32, hard_cap: u32, time_limit_secs: u32) -> CoordinatorConfig {
        CoordinatorConfig {
            initial_workers,
            hard_cap,
            time_limit_secs,
            quantum_ns: 100,
        }
    }

    fn coordinator(config: CoordinatorConfig, stub: StubLauncher) -> (Arc<MessageBus>, SharedClock, Coordinator) {
        let bus = Arc::new(MessageBus::new());
        let clock = SharedClock::local();
        let coord = Coordinator::new(config, clock.clone(), bus.clone(), Box::new(stub)).with_identity(CONTROLLER);
        (bus, clock, coord)
    }

    fn lock(pid: i32) -> Envelope {
        Envelope { mtype: 1, pid }
    }

    fn unlock(pid: i32) -> Envelope {
        Envelope { mtype: 2, pid }
    }

    async fn step(coord: &mut Coordinator, bus: &MessageBus, env: Envelope) {
        let (_tx, mut rx) = mpsc::channel(1);
        bus.inject(env).await.unwrap();
        assert!(coord.cycle(&mut rx).await.unwrap());
    }

    #[tokio::test]
    async fn test_start_spawns_initial_batch() {
        let stub = StubLauncher::new();
        let launched = stub.launched.clone();
        let (_bus, _clock, mut coord) = coordinator(config(3, 10, 100), stub);

        coord.start().await.unwrap();
        assert_eq!(launched.lock().unwrap().len(), 3);
        assert_eq!(coord.state(), RunState::Running);
    }

    #[tokio::test]
    async fn test_each_step_advances_clock_and_replies() {
        let (bus, clock, mut coord) = coordinator(config(2, 10, 100), StubLauncher::new());
        coord.start().await.unwrap();

        step(&mut coord, &bus, lock(500)).await;
        assert_eq!(clock.now(), SimTime::from_nanos(100));
        assert_eq!(coord.handshake.expecting(), Phase::Unlock);
        let reply = bus.recv_reply(WorkerId::from_raw(500)).await.unwrap();
        assert_eq!(reply.from, CONTROLLER);

        step(&mut coord, &bus, unlock(500)).await;
        assert_eq!(clock.now(), SimTime::from_nanos(200));
        assert_eq!(coord.handshake.expecting(), Phase::Lock);
        bus.recv_reply(WorkerId::from_raw(500)).await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_is_counted_replaced_and_reaped() {
        let stub = StubLauncher::new();
        let reaped = stub.reaped.clone();
        let (bus, clock, mut coord) = coordinator(config(2, 10, 100), stub);
        coord.start().await.unwrap();

        step(&mut coord, &bus, lock(500)).await;
        clock.record_exit(WorkerId::from_raw(500));
        step(&mut coord, &bus, unlock(500)).await;

        assert_eq!(coord.pool.exited(), 1);
        assert_eq!(coord.pool.started(), 3);
        assert_eq!(clock.pending_exit(), None);
        assert_eq!(*reaped.lock().unwrap(), vec![WorkerId::from_raw(500)]);
    }

    #[tokio::test]
    async fn test_unrecognized_kind_changes_nothing() {
        let (bus, clock, mut coord) = coordinator(config(2, 10, 100), StubLauncher::new());
        coord.start().await.unwrap();
        step(&mut coord, &bus, lock(500)).await;
        bus.recv_reply(WorkerId::from_raw(500)).await.unwrap();

        step(&mut coord, &bus, Envelope { mtype: 9, pid: 501 }).await;

        assert_eq!(clock.now(), SimTime::from_nanos(100));
        assert_eq!(coord.handshake.expecting(), Phase::Unlock);
        assert_eq!(coord.handshake.stats().discarded, 1);
        assert_eq!(bus.pending_replies().await, 0);
        assert_eq!(coord.pool.started(), 2);
        assert_eq!(coord.pool.exited(), 0);
    }

    #[tokio::test]
    async fn test_zero_time_limit_drains_immediately() {
        let stub = StubLauncher::new();
        let launched = stub.launched.clone();
        let (bus, clock, mut coord) = coordinator(config(2, 10, 0), stub);
        coord.start().await.unwrap();
        assert_eq!(coord.state(), RunState::Draining);
        assert_eq!(coord.stop_reason, Some(StopReason::TimeBound));

        step(&mut coord, &bus, lock(500)).await;
        clock.record_exit(WorkerId::from_raw(500));
        step(&mut coord, &bus, unlock(500)).await;
        assert_eq!(launched.lock().unwrap().len(), 2);
        assert_eq!(coord.state(), RunState::Draining);

        step(&mut coord, &bus, lock(501)).await;
        clock.record_exit(WorkerId::from_raw(501));
        step(&mut coord, &bus, unlock(501)).await;
        assert_eq!(coord.state(), RunState::Terminated);
    }

    #[tokio::test]
    async fn test_raised_flag_closes_admission() {
        let (bus, clock, mut coord) = coordinator(config(2, 10, 100), StubLauncher::new());
        coord.start().await.unwrap();
        coord.stop_flag().raise();

        step(&mut coord, &bus, lock(500)).await;
        clock.record_exit(WorkerId::from_raw(500));
        step(&mut coord, &bus, unlock(500)).await;

        assert_eq!(coord.stop_reason, Some(StopReason::WallClock));
        assert_eq!(coord.pool.started(), 2);
    }

    #[tokio::test]
    async fn test_spawn_failure_mid_run_drains() {
        let stub = StubLauncher {
            fail_after: Some(2),
            ..StubLauncher::new()
        };
        let (bus, clock, mut coord) = coordinator(config(2, 10, 100), stub);
        coord.start().await.unwrap();
        assert_eq!(coord.state(), RunState::Running);

        step(&mut coord, &bus, lock(500)).await;
        clock.record_exit(WorkerId::from_raw(500));
        step(&mut coord, &bus, unlock(500)).await;

        assert_eq!(coord.state(), RunState::Draining);
        assert_eq!(coord.stop_reason, Some(StopReason::SpawnFailed));
        assert_eq!(coord.pool.started(), 2);

        step(&mut coord, &bus, lock(501)).await;
        clock.record_exit(WorkerId::from_raw(501));
        step(&mut coord, &bus, unlock(501)).await;

        assert_eq!(coord.state(), RunState::Terminated);
        assert_eq!(coord.pool.exited(), 2);
    }

    #[tokio::test]
    async fn test_stop_flag_wakes_blocked_receive() {
        let (_bus, _clock, mut coord) = coordinator(config(2, 10, 100), StubLauncher::new());
        coord.start().await.unwrap();

        let flag = coord.stop_flag();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.raise();
        });

        let (_tx, mut rx) = mpsc::channel(1);
        let proceed = tokio::time::timeout(Duration::from_secs(5), coord.cycle(&mut rx))
            .await
            .expect("raising the flag should end the wait")
            .unwrap();
        assert!(proceed);
        assert_eq!(coord.state(), RunState::Draining);
        assert_eq!(coord.stop_reason, Some(StopReason::WallClock));
    }

    #[tokio::test]
    async fn test_unannounced_exit_is_counted_and_replaced() {
        let stub = StubLauncher::new();
        let crashed = stub.crashed.clone();
        let reaped = stub.reaped.clone();
        let (bus, clock, mut coord) = coordinator(config(2, 10, 100), stub);
        coord.start().await.unwrap();

        step(&mut coord, &bus, lock(500)).await;
        assert_eq!(coord.handshake.holder(), Some(WorkerId::from_raw(500)));

        crashed.lock().unwrap().push(WorkerId::from_raw(500));
        let (_tx, mut rx) = mpsc::channel(1);
        let proceed = tokio::time::timeout(Duration::from_secs(5), coord.cycle(&mut rx))
            .await
            .unwrap()
            .unwrap();

        assert!(proceed);
        assert_eq!(coord.pool.exited(), 1);
        assert_eq!(coord.pool.started(), 3);
        assert_eq!(coord.handshake.expecting(), Phase::Lock);
        assert_eq!(*reaped.lock().unwrap(), vec![WorkerId::from_raw(500)]);
        // No handshake step, so no time passes
        assert_eq!(clock.now(), SimTime::from_nanos(100));
    }

    #[tokio::test]
    async fn test_every_worker_dying_silently_terminates_run() {
        let stub = StubLauncher::new();
        stub.crashed
            .lock()
            .unwrap()
            .extend([502, 503, 501, 500].map(WorkerId::from_raw));
        let (_bus, _clock, coord) = coordinator(config(2, 4, 100), stub);
        let (_tx, rx) = mpsc::channel(1);

        let report = tokio::time::timeout(Duration::from_secs(5), coord.run(rx))
            .await
            .expect("run should not hang on dead workers")
            .unwrap();
        assert_eq!(report.state, RunState::Terminated);
        assert_eq!(report.started, 4);
        assert_eq!(report.exited, 4);
        assert!(!report.interrupted);
    }

    #[tokio::test]
    async fn test_interrupt_ends_run_early() {
        let (_bus, _clock, coord) = coordinator(config(2, 10, 100), StubLauncher::new());
        let (tx, rx) = mpsc::channel(1);
        tx.send(()).await.unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), coord.run(rx))
            .await
            .unwrap()
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.started, 2);
        assert_eq!(report.state, RunState::Terminated);
    }

    #[tokio::test]
    async fn test_initial_spawn_failure_is_fatal_and_cleans_up() {
        let stub = StubLauncher {
            fail_after: Some(1),
            ..StubLauncher::new()
        };
        let terminated = stub.terminated.clone();
        let (bus, _clock, coord) = coordinator(config(2, 10, 100), stub);
        let (_tx, rx) = mpsc::channel(1);

        assert!(coord.run(rx).await.is_err());
        assert_eq!(terminated.lock().unwrap().len(), 1);
        assert!(bus.inject(lock(1)).await.is_err());
    }
}
