//! Run lifecycle and stop conditions

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Where the coordinator is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Starting,
    Running,
    /// Admission closed; waiting for started workers to exit
    Draining,
    Terminated,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Starting => "STARTING",
            RunState::Running => "RUNNING",
            RunState::Draining => "DRAINING",
            RunState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Why admission was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// As many workers exited as the hard cap allows
    ExitCap,
    /// The simulated clock reached the time limit
    TimeBound,
    /// The wall-clock timer fired
    WallClock,
    /// Every worker the cap allows has been started
    PoolExhausted,
    /// A replacement worker could not be launched
    SpawnFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::ExitCap => "exit cap reached",
            StopReason::TimeBound => "simulated time limit reached",
            StopReason::WallClock => "wall-clock timer fired",
            StopReason::PoolExhausted => "pool exhausted",
            StopReason::SpawnFailed => "spawn failed",
        };
        f.write_str(text)
    }
}

/// Cooperative "stop admitting" flag
///
/// Checked at cycle boundaries, and awaitable so a coordinator blocked on a
/// receive notices it right away.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Resolve once the flag is raised; immediately if it already is
    pub async fn raised(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Registered before the check so a raise in between is not missed
            notified.as_mut().enable();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }

    /// Raise the flag once `after` of wall-clock time has passed
    pub fn arm(&self, after: Duration) -> JoinHandle<()> {
        debug!(?after, "StopFlag::arm: called");
        let flag = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            info!("Wall-clock limit of {:?} reached", after);
            flag.raise();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_shared_between_clones() {
        let flag = StopFlag::new();
        let other = flag.clone();
        assert!(!other.is_raised());
        flag.raise();
        assert!(other.is_raised());
    }

    #[tokio::test]
    async fn test_arm_raises_after_duration() {
        let flag = StopFlag::new();
        let timer = flag.arm(Duration::from_millis(50));
        assert!(!flag.is_raised());

        tokio::time::timeout(Duration::from_secs(5), timer).await.unwrap().unwrap();
        assert!(flag.is_raised());
    }

    #[tokio::test]
    async fn test_armed_timer_wakes_waiter() {
        let flag = StopFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.raised().await })
        };
        let _timer = flag.arm(Duration::from_millis(50));

        tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert!(flag.is_raised());
    }

    #[tokio::test]
    async fn test_raised_resolves_when_already_raised() {
        let flag = StopFlag::new();
        flag.raise();
        tokio::time::timeout(Duration::from_secs(1), flag.raised()).await.unwrap();
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RunState::Draining.to_string(), "DRAINING");
        assert_eq!(RunState::Terminated.to_string(), "TERMINATED");
    }
}
