//! Pool error types

use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::id::WorkerId;

/// Errors raised while launching, reaping or stopping workers
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to launch worker program {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Launched worker has no process id")]
    MissingPid,

    #[error("Failed to wait for worker {id}: {source}")]
    Wait {
        id: WorkerId,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal worker {id}: {source}")]
    Signal {
        id: WorkerId,
        #[source]
        source: Errno,
    },

    #[error("Worker {0} is not managed by this pool")]
    UnknownWorker(WorkerId),

    #[error("Worker {id} failed: {reason}")]
    Task { id: WorkerId, reason: String },
}
