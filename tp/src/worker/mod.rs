//! Reference worker
//!
//! A worker repeats the LOCK/UNLOCK handshake until the simulated clock
//! passes a randomly drawn lifetime, then announces its exit through the
//! shared clock and leaves after the controller's final reply. The same
//! loop runs as a tokio task in simulation mode and inside the `tp-user`
//! binary in process mode.

pub mod env;

pub use env::WorkerEnv;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::{SharedClock, SimTime};
use crate::id::WorkerId;
use crate::protocol::{ProtocolError, TokenMessage, WorkerChannel};

/// Default upper bound on a worker's simulated lifetime
pub const DEFAULT_MAX_LIFETIME_NS: u64 = 1_000_000;

/// How long workers live, and how that is randomized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WorkerProfile {
    /// Lifetimes are drawn uniformly from `0..=max_lifetime_ns`
    pub max_lifetime_ns: u64,

    /// Fixed seed for reproducible runs; each worker mixes in its own id
    pub seed: Option<u64>,
}

impl Default for WorkerProfile {
    fn default() -> Self {
        Self {
            max_lifetime_ns: DEFAULT_MAX_LIFETIME_NS,
            seed: None,
        }
    }
}

impl WorkerProfile {
    /// Random source for one worker
    pub fn rng_for(&self, id: WorkerId) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ id.as_raw() as u64),
            None => StdRng::from_os_rng(),
        }
    }

    /// Draw a lifetime in nanoseconds of simulated time
    pub fn draw_lifetime(&self, rng: &mut impl Rng) -> u64 {
        rng.random_range(0..=self.max_lifetime_ns)
    }
}

/// What a worker did before it left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub cycles: u64,
    pub started_at: SimTime,
    pub exited_at: SimTime,
}

/// One worker bound to a channel and the shared clock
pub struct Worker {
    id: WorkerId,
    channel: Arc<dyn WorkerChannel>,
    clock: SharedClock,
    profile: WorkerProfile,
}

impl Worker {
    pub fn new(id: WorkerId, channel: Arc<dyn WorkerChannel>, clock: SharedClock, profile: WorkerProfile) -> Self {
        Self {
            id,
            channel,
            clock,
            profile,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Take the token, release it, and repeat until the lifetime is spent
    pub async fn run(self) -> Result<WorkerSummary, ProtocolError> {
        let id = self.id;
        let mut rng = self.profile.rng_for(id);
        let lifetime = self.profile.draw_lifetime(&mut rng);
        debug!(%id, lifetime, "Worker::run: called");

        let mut started_at = None;
        let mut deadline = None;
        let mut cycles = 0u64;

        loop {
            self.channel.send(TokenMessage::lock(id)).await?;
            self.channel.recv_reply(id).await?;

            // Holding the token from here until the UNLOCK reply
            let now = self.clock.now();
            let start = *started_at.get_or_insert(now);
            let until = *deadline.get_or_insert_with(|| start.as_nanos().saturating_add(lifetime));
            cycles += 1;

            let done = now.as_nanos() >= until;
            if done {
                self.clock.record_exit(id);
            }

            self.channel.send(TokenMessage::unlock(id)).await?;
            self.channel.recv_reply(id).await?;

            if done {
                info!(%id, cycles, at = %now, "Worker finished");
                return Ok(WorkerSummary {
                    id,
                    cycles,
                    started_at: start,
                    exited_at: now,
                });
            }
        }
    }
}
