//! Shared simulated clock
//!
//! The clock holds the simulated time and the identity of the last worker
//! that announced its exit. It is the only state the controller shares
//! with its workers; every access is serialized by the token handshake.
//!
//! - [`ClockRegion`] - the shared layout and its operations
//! - [`SharedClock`] - cloneable handle, backed by process memory or a POSIX segment

mod region;
mod shm;

pub use region::{ClockRegion, NANOS_PER_SEC, SimTime};
pub use shm::{Creator, Opener, SharedMemorySafe, Shm, ShmError, ShmMode};

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::debug;

#[derive(Clone)]
enum Backing {
    Local(Arc<ClockRegion>),
    Owned(Arc<Shm<ClockRegion, Creator>>),
    Attached(Arc<Shm<ClockRegion, Opener>>),
}

/// Handle to the shared clock
///
/// Clones refer to the same region. An owned segment is unlinked once the
/// last clone held by the controller drops.
#[derive(Clone)]
pub struct SharedClock {
    backing: Backing,
}

impl SharedClock {
    /// Clock living in this process, for simulation mode
    pub fn local() -> Self {
        debug!("SharedClock::local: called");
        Self {
            backing: Backing::Local(Arc::new(ClockRegion::default())),
        }
    }

    /// Create the clock segment as the controller
    pub fn create(name: &str) -> Result<Self, ShmError> {
        debug!(%name, "SharedClock::create: called");
        Ok(Self {
            backing: Backing::Owned(Arc::new(Shm::create(name)?)),
        })
    }

    /// Attach to the controller's clock segment as a worker
    pub fn open(name: &str) -> Result<Self, ShmError> {
        debug!(%name, "SharedClock::open: called");
        Ok(Self {
            backing: Backing::Attached(Arc::new(Shm::open(name)?)),
        })
    }

    /// Segment name, when the clock lives in shared memory
    pub fn segment_name(&self) -> Option<&str> {
        match &self.backing {
            Backing::Local(_) => None,
            Backing::Owned(shm) => Some(shm.name()),
            Backing::Attached(shm) => Some(shm.name()),
        }
    }
}

impl Deref for SharedClock {
    type Target = ClockRegion;

    fn deref(&self) -> &ClockRegion {
        match &self.backing {
            Backing::Local(region) => region,
            Backing::Owned(shm) => shm,
            Backing::Attached(shm) => shm,
        }
    }
}

impl fmt::Debug for SharedClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedClock")
            .field("segment", &self.segment_name())
            .field("now", &self.now())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::WorkerId;

    #[test]
    fn test_local_clones_share_state() {
        let clock = SharedClock::local();
        let other = clock.clone();
        clock.advance(250);
        assert_eq!(other.now(), SimTime::from_nanos(250));
        assert_eq!(clock.segment_name(), None);
    }

    #[test]
    fn test_segment_visible_to_opener() {
        let name = format!("/tokenpool-test-{}-clock", std::process::id());
        let controller = SharedClock::create(&name).unwrap();
        let worker = SharedClock::open(&name).unwrap();

        controller.advance(1_500);
        assert_eq!(worker.now(), SimTime::from_nanos(1_500));

        worker.record_exit(WorkerId::from_raw(31));
        assert_eq!(controller.take_exit(), Some(WorkerId::from_raw(31)));
        assert_eq!(controller.segment_name(), Some(name.as_str()));
    }
}
