//! Token channel protocol
//!
//! Workers send LOCK and UNLOCK messages tagged with their id; the controller
//! accepts them in strict alternation and answers each with a reply addressed
//! to the sender alone.
//!
//! - [`messages`] - wire shapes and kinds
//! - [`handshake`] - the controller's phase machine
//! - [`channel`] - transport traits and the in-memory bus
//! - [`socket`] - Unix-domain socket transport for worker processes

pub mod channel;
pub mod error;
pub mod handshake;
pub mod mailbox;
pub mod messages;
pub mod socket;

pub use channel::{ControllerChannel, MessageBus, WorkerChannel};
pub use error::ProtocolError;
pub use handshake::{Handshake, HandshakeStats, Phase, Step};
pub use mailbox::Mailbox;
pub use messages::{Envelope, MessageKind, ReplyMessage, TokenMessage};
pub use socket::{SocketHub, SocketLink};
