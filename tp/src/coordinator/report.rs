//! Summary of a finished run

use std::fmt;

use serde::Serialize;

use crate::clock::SimTime;

use super::state::{RunState, StopReason};

/// What a run did, returned by the coordinator once it terminates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub started: u32,
    pub exited: u32,
    /// Completed LOCK/UNLOCK pairs
    pub cycles: u64,
    pub locks: u64,
    pub unlocks: u64,
    /// Unrecognized messages that were dropped
    pub discarded: u64,
    #[serde(serialize_with = "serialize_sim_time")]
    pub final_time: SimTime,
    pub state: RunState,
    /// Ended early by SIGINT or SIGTERM
    pub interrupted: bool,
    pub stop_reason: Option<StopReason>,
}

fn serialize_sim_time<S: serde::Serializer>(time: &SimTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(time)
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}s: started {}, exited {}, {} handshakes",
            self.state, self.final_time, self.started, self.exited, self.cycles
        )?;
        if self.discarded > 0 {
            write!(f, ", {} discarded", self.discarded)?;
        }
        if let Some(reason) = self.stop_reason {
            write!(f, " ({})", reason)?;
        }
        if self.interrupted {
            write!(f, " [interrupted]")?;
        }
        Ok(())
    }
}
