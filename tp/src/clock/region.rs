//! Clock region layout and arithmetic

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::id::WorkerId;

use super::shm::SharedMemorySafe;

/// Nanoseconds in one simulated second
pub const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Point in simulated time
///
/// Ordering is lexicographic on `(seconds, nanoseconds)`, which is the
/// chronological order as long as `nanoseconds` stays normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime {
    pub seconds: u32,
    pub nanoseconds: u32,
}

impl SimTime {
    pub const ZERO: SimTime = SimTime {
        seconds: 0,
        nanoseconds: 0,
    };

    /// Build a time from a total nanosecond count
    pub fn from_nanos(total: u64) -> Self {
        let seconds = total / NANOS_PER_SEC as u64;
        Self {
            seconds: u32::try_from(seconds).unwrap_or(u32::MAX),
            nanoseconds: (total % NANOS_PER_SEC as u64) as u32,
        }
    }

    /// Total nanoseconds since the start of the run
    pub fn as_nanos(&self) -> u64 {
        self.seconds as u64 * NANOS_PER_SEC as u64 + self.nanoseconds as u64
    }

    /// This time shifted forward, saturating at the largest representable second
    pub fn saturating_add_nanos(self, delta: u64) -> Self {
        Self::from_nanos(self.as_nanos().saturating_add(delta))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// The memory shared between the controller and its workers
///
/// Only the controller moves the time forward. Workers read the time and
/// may set `last_exited` to their own id while they hold the token. The
/// handshake, not a lock, keeps those accesses from overlapping; the atomics
/// only make each individual access well defined across processes.
#[repr(C)]
#[derive(Debug, Default)]
pub struct ClockRegion {
    seconds: AtomicU32,
    nanoseconds: AtomicU32,
    last_exited: AtomicI32,
}

// SAFETY: repr(C), only atomics, no pointers, valid when zeroed and when Drop never runs.
unsafe impl SharedMemorySafe for ClockRegion {}

impl ClockRegion {
    /// Snapshot of the current simulated time
    pub fn now(&self) -> SimTime {
        SimTime {
            seconds: self.seconds.load(Ordering::Acquire),
            nanoseconds: self.nanoseconds.load(Ordering::Acquire),
        }
    }

    /// Move the clock forward, carrying whole seconds out of the nanosecond field
    pub fn advance(&self, delta_nanos: u64) -> SimTime {
        let now = self.now();
        let total = now.nanoseconds as u64 + delta_nanos;
        let carry = u32::try_from(total / NANOS_PER_SEC as u64).unwrap_or(u32::MAX);
        let next = SimTime {
            seconds: now.seconds.saturating_add(carry),
            nanoseconds: (total % NANOS_PER_SEC as u64) as u32,
        };

        self.nanoseconds.store(next.nanoseconds, Ordering::Release);
        self.seconds.store(next.seconds, Ordering::Release);
        next
    }

    /// Announce that `worker` is terminating
    pub fn record_exit(&self, worker: WorkerId) {
        debug!(%worker, "ClockRegion::record_exit: called");
        self.last_exited.store(worker.as_raw(), Ordering::Release);
    }

    /// Worker that announced its exit, if any, without clearing it
    pub fn pending_exit(&self) -> Option<WorkerId> {
        let raw = self.last_exited.load(Ordering::Acquire);
        Some(WorkerId::from_raw(raw)).filter(|id| id.is_valid())
    }

    /// Consume the exit announcement, clearing the field
    pub fn take_exit(&self) -> Option<WorkerId> {
        let raw = self.last_exited.swap(0, Ordering::AcqRel);
        Some(WorkerId::from_raw(raw)).filter(|id| id.is_valid())
    }

    /// Whether the simulated clock has reached `bound_secs`
    pub fn has_elapsed(&self, bound_secs: u32) -> bool {
        self.seconds.load(Ordering::Acquire) >= bound_secs
    }

    /// Back to time zero with no pending exit
    pub fn reset(&self) {
        debug!("ClockRegion::reset: called");
        self.seconds.store(0, Ordering::Release);
        self.nanoseconds.store(0, Ordering::Release);
        self.last_exited.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_advance_within_second() {
        let clock = ClockRegion::default();
        assert_eq!(clock.advance(100), SimTime::from_nanos(100));
        assert_eq!(clock.advance(100).nanoseconds, 200);
        assert_eq!(clock.now().seconds, 0);
    }

    #[test]
    fn test_advance_carries_exactly_at_boundary() {
        let clock = ClockRegion::default();
        clock.advance(999_999_900);
        let now = clock.advance(100);
        assert_eq!(now, SimTime { seconds: 1, nanoseconds: 0 });
    }

    #[test]
    fn test_advance_carries_multiple_seconds() {
        let clock = ClockRegion::default();
        clock.advance(500);
        let now = clock.advance(3 * NANOS_PER_SEC as u64 + 700);
        assert_eq!(now, SimTime { seconds: 3, nanoseconds: 1200 });
    }

    #[test]
    fn test_take_exit_clears_field() {
        let clock = ClockRegion::default();
        assert_eq!(clock.take_exit(), None);

        clock.record_exit(WorkerId::from_raw(77));
        assert_eq!(clock.pending_exit(), Some(WorkerId::from_raw(77)));
        assert_eq!(clock.take_exit(), Some(WorkerId::from_raw(77)));
        assert_eq!(clock.take_exit(), None);
    }

    #[test]
    fn test_has_elapsed() {
        let clock = ClockRegion::default();
        assert!(clock.has_elapsed(0));
        assert!(!clock.has_elapsed(1));
        clock.advance(NANOS_PER_SEC as u64);
        assert!(clock.has_elapsed(1));
        assert!(!clock.has_elapsed(2));
    }

    #[test]
    fn test_reset() {
        let clock = ClockRegion::default();
        clock.advance(5 * NANOS_PER_SEC as u64);
        clock.record_exit(WorkerId::from_raw(9));
        clock.reset();
        assert_eq!(clock.now(), SimTime::ZERO);
        assert_eq!(clock.pending_exit(), None);
    }

    #[test]
    fn test_display_pads_nanoseconds() {
        let t = SimTime { seconds: 2, nanoseconds: 4500 };
        assert_eq!(t.to_string(), "2.000004500");
    }

    proptest! {
        #[test]
        fn prop_clock_never_regresses(deltas in proptest::collection::vec(0u64..3_000_000_000, 1..64)) {
            let clock = ClockRegion::default();
            let mut previous = clock.now();
            for delta in deltas {
                let next = clock.advance(delta);
                prop_assert!(next >= previous);
                prop_assert!(next.nanoseconds < NANOS_PER_SEC);
                previous = next;
            }
        }

        #[test]
        fn prop_advance_matches_total_nanos(deltas in proptest::collection::vec(0u64..2_000_000_000, 1..32)) {
            let clock = ClockRegion::default();
            let total: u64 = deltas.iter().sum();
            for delta in &deltas {
                clock.advance(*delta);
            }
            prop_assert_eq!(clock.now(), SimTime::from_nanos(total));
        }
    }
}
