//! Message types for the token channel
//!
//! Every message on the channel has the same two-field shape: a routing tag
//! (`mtype`) and the sender's id (`pid`). For worker-to-controller traffic
//! the tag is the message kind; for controller-to-worker replies the tag is
//! the destination worker's id. On sockets an envelope is one line of JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::WorkerId;

use super::error::ProtocolError;

/// Kinds of controller-bound messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Wildcard used only by the controller's very first receive
    Any,
    /// Request for the token
    Lock,
    /// Release of the token
    Unlock,
}

impl MessageKind {
    /// Routing tag carried on the wire
    pub const fn tag(self) -> i64 {
        match self {
            MessageKind::Any => 0,
            MessageKind::Lock => 1,
            MessageKind::Unlock => 2,
        }
    }

    /// Kind a worker may legitimately send with this tag
    ///
    /// `Any` is never a valid worker message, so tag 0 maps to `None`
    /// alongside every other unrecognized tag.
    pub const fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            1 => Some(MessageKind::Lock),
            2 => Some(MessageKind::Unlock),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Any => "ANY",
            MessageKind::Lock => "LOCK",
            MessageKind::Unlock => "UNLOCK",
        };
        f.write_str(name)
    }
}

/// Wire form shared by every message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub mtype: i64,
    pub pid: i32,
}

impl Envelope {
    /// Interpret the tag as a controller-bound kind
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_tag(self.mtype)
    }

    /// Who sent this envelope
    pub fn sender(&self) -> WorkerId {
        WorkerId::from_raw(self.pid)
    }

    /// Encode as a single newline-terminated JSON line
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one JSON line (surrounding whitespace ignored)
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Worker-to-controller message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenMessage {
    pub kind: MessageKind,
    pub sender: WorkerId,
}

impl TokenMessage {
    pub fn lock(sender: WorkerId) -> Self {
        Self {
            kind: MessageKind::Lock,
            sender,
        }
    }

    pub fn unlock(sender: WorkerId) -> Self {
        Self {
            kind: MessageKind::Unlock,
            sender,
        }
    }
}

impl From<TokenMessage> for Envelope {
    fn from(msg: TokenMessage) -> Self {
        Self {
            mtype: msg.kind.tag(),
            pid: msg.sender.as_raw(),
        }
    }
}

/// Controller-to-worker reply, addressed by putting the worker id in the tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyMessage {
    pub to: WorkerId,
    pub from: WorkerId,
}

impl From<ReplyMessage> for Envelope {
    fn from(reply: ReplyMessage) -> Self {
        Self {
            mtype: reply.to.as_raw() as i64,
            pid: reply.from.as_raw(),
        }
    }
}

impl From<Envelope> for ReplyMessage {
    fn from(env: Envelope) -> Self {
        Self {
            to: WorkerId::from_raw(i32::try_from(env.mtype).unwrap_or(0)),
            from: env.sender(),
        }
    }
}
