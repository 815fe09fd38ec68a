//! Alternating LOCK/UNLOCK handshake
//!
//! Mutual exclusion comes from the controller only accepting the phase it
//! expects: after a LOCK it waits for an UNLOCK, after an UNLOCK it waits
//! for a LOCK. Other workers' LOCK requests stay queued meanwhile, so at
//! most one worker holds the token.

use tracing::{debug, warn};

use crate::id::WorkerId;

use super::messages::{Envelope, MessageKind};

/// What the controller is waiting for next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// First receive of the run: any message is accepted
    Any,
    Lock,
    Unlock,
}

impl Phase {
    /// Whether a receive in this phase should dequeue `env`
    ///
    /// Unrecognized kinds are dequeued in every phase so they can be
    /// discarded instead of clogging the channel.
    pub fn admits(self, env: &Envelope) -> bool {
        match (self, env.kind()) {
            (Phase::Any, _) => true,
            (_, None) => true,
            (Phase::Lock, Some(kind)) => kind == MessageKind::Lock,
            (Phase::Unlock, Some(kind)) => kind == MessageKind::Unlock,
        }
    }

    /// The kind this phase waits for
    pub fn kind(self) -> MessageKind {
        match self {
            Phase::Any => MessageKind::Any,
            Phase::Lock => MessageKind::Lock,
            Phase::Unlock => MessageKind::Unlock,
        }
    }
}

/// Result of feeding one envelope to the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// `worker` now holds the token
    Locked(WorkerId),
    /// `worker` released the token
    Unlocked(WorkerId),
    /// Unrecognized or out-of-phase message; nothing changed
    Discarded { tag: i64, sender: WorkerId },
}

impl Step {
    /// Sender of the envelope that produced this step
    pub fn sender(&self) -> WorkerId {
        match *self {
            Step::Locked(worker) | Step::Unlocked(worker) => worker,
            Step::Discarded { sender, .. } => sender,
        }
    }
}

/// Handshake counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandshakeStats {
    pub locks: u64,
    pub unlocks: u64,
    pub discarded: u64,
}

/// Phase state machine for the controller side of the protocol
#[derive(Debug)]
pub struct Handshake {
    expect: Phase,
    holder: Option<WorkerId>,
    stats: HandshakeStats,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            expect: Phase::Any,
            holder: None,
            stats: HandshakeStats::default(),
        }
    }

    /// Phase the next receive should use
    pub fn expecting(&self) -> Phase {
        self.expect
    }

    /// Worker currently holding the token
    pub fn holder(&self) -> Option<WorkerId> {
        self.holder
    }

    pub fn stats(&self) -> HandshakeStats {
        self.stats
    }

    /// Take the token back from `worker` if it holds it
    ///
    /// Used when the holder is gone and will never send its UNLOCK; the next
    /// LOCK from anyone is then accepted. Counters are left alone.
    pub fn release(&mut self, worker: WorkerId) -> bool {
        if self.holder != Some(worker) {
            return false;
        }
        debug!(%worker, "Handshake::release: token reclaimed");
        self.holder = None;
        self.expect = Phase::Lock;
        true
    }

    /// Apply one received envelope
    pub fn accept(&mut self, env: &Envelope) -> Step {
        let sender = env.sender();
        debug!(mtype = env.mtype, %sender, expect = ?self.expect, "Handshake::accept: called");

        match env.kind() {
            Some(MessageKind::Lock) if self.expect != Phase::Unlock => {
                self.expect = Phase::Unlock;
                self.holder = Some(sender);
                self.stats.locks += 1;
                Step::Locked(sender)
            }
            Some(MessageKind::Unlock) if self.expect != Phase::Lock => {
                if let Some(holder) = self.holder
                    && holder != sender
                {
                    warn!(%holder, %sender, "UNLOCK from a worker that does not hold the token");
                }
                self.expect = Phase::Lock;
                self.holder = None;
                self.stats.unlocks += 1;
                Step::Unlocked(sender)
            }
            _ => {
                self.stats.discarded += 1;
                Step::Discarded {
                    tag: env.mtype,
                    sender,
                }
            }
        }
    }
}
