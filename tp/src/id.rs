//! Worker identity
//!
//! A worker is identified by its process id in process mode and by a
//! synthetic id in simulation mode. Either way the id doubles as the
//! reply address on the message channel.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a worker (or of the controller itself)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(i32);

impl WorkerId {
    /// Wrap a raw process identifier
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Identity of the calling process
    pub fn current_process() -> Self {
        Self(std::process::id() as i32)
    }

    /// Raw identifier as stored in shared memory and on the wire
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Ids at or below zero are never handed out; zero marks "no worker"
    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(pid: u32) -> Self {
        Self(pid as i32)
    }
}
