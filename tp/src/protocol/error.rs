//! Protocol error types

use thiserror::Error;

use crate::id::WorkerId;

/// Errors on the token channel
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Channel closed")]
    Closed,

    #[error("Channel IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed envelope: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("No connection for worker {0}")]
    NoRoute(WorkerId),

    #[error("Reply for worker {got} delivered to worker {expected}")]
    Misaddressed { expected: WorkerId, got: WorkerId },
}

impl ProtocolError {
    /// Whether the other side went away rather than misbehaved
    pub fn is_closed(&self) -> bool {
        match self {
            ProtocolError::Closed => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}
