//! Channel seams between the controller and its workers
//!
//! The controller only sees [`ControllerChannel`] and workers only see
//! [`WorkerChannel`]. [`MessageBus`] implements both in memory for
//! simulation mode; the socket hub and link implement them across processes.

use async_trait::async_trait;
use tracing::debug;

use crate::id::WorkerId;

use super::error::ProtocolError;
use super::handshake::Phase;
use super::mailbox::Mailbox;
use super::messages::{Envelope, ReplyMessage, TokenMessage};

/// Controller side of the token channel
#[async_trait]
pub trait ControllerChannel: Send + Sync {
    /// Receive the next envelope admitted by `phase`
    async fn recv(&self, phase: Phase) -> Result<Envelope, ProtocolError>;

    /// Deliver a reply to exactly one worker
    async fn reply(&self, reply: ReplyMessage) -> Result<(), ProtocolError>;

    /// Tear the channel down, releasing anyone blocked on it
    async fn close(&self);
}

/// Worker side of the token channel
#[async_trait]
pub trait WorkerChannel: Send + Sync {
    async fn send(&self, msg: TokenMessage) -> Result<(), ProtocolError>;

    /// Block until a reply addressed to `me` arrives
    async fn recv_reply(&self, me: WorkerId) -> Result<ReplyMessage, ProtocolError>;
}

/// In-memory channel: one queue toward the controller, one toward workers
///
/// Replies share the outbound queue and are picked out by destination tag,
/// so delivery is point-to-point even though the queue is shared.
#[derive(Default)]
pub struct MessageBus {
    inbound: Mailbox,
    outbound: Mailbox,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a raw envelope on the controller-bound queue
    pub async fn inject(&self, env: Envelope) -> Result<(), ProtocolError> {
        self.inbound.push(env).await
    }

    /// Envelopes waiting for the controller
    pub async fn pending_inbound(&self) -> usize {
        self.inbound.len().await
    }

    /// Replies not yet picked up by their worker
    pub async fn pending_replies(&self) -> usize {
        self.outbound.len().await
    }
}

#[async_trait]
impl ControllerChannel for MessageBus {
    async fn recv(&self, phase: Phase) -> Result<Envelope, ProtocolError> {
        self.inbound.take(|env| phase.admits(env)).await
    }

    async fn reply(&self, reply: ReplyMessage) -> Result<(), ProtocolError> {
        self.outbound.push(reply.into()).await
    }

    async fn close(&self) {
        debug!("MessageBus::close: called");
        self.inbound.close().await;
        self.outbound.close().await;
    }
}

#[async_trait]
impl WorkerChannel for MessageBus {
    async fn send(&self, msg: TokenMessage) -> Result<(), ProtocolError> {
        self.inbound.push(msg.into()).await
    }

    async fn recv_reply(&self, me: WorkerId) -> Result<ReplyMessage, ProtocolError> {
        let tag = me.as_raw() as i64;
        let env = self.outbound.take(|env| env.mtype == tag).await?;
        Ok(env.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_controller_receives_by_phase() {
        let bus = MessageBus::new();
        bus.send(TokenMessage::unlock(WorkerId::from_raw(20))).await.unwrap();
        bus.send(TokenMessage::lock(WorkerId::from_raw(21))).await.unwrap();

        let env = ControllerChannel::recv(&bus, Phase::Lock).await.unwrap();
        assert_eq!(env.kind(), Some(MessageKind::Lock));
        assert_eq!(env.sender(), WorkerId::from_raw(21));
        assert_eq!(bus.pending_inbound().await, 1);
    }

    #[tokio::test]
    async fn test_reply_reaches_only_its_worker() {
        let bus = Arc::new(MessageBus::new());
        let controller = WorkerId::from_raw(1);

        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.recv_reply(WorkerId::from_raw(31)).await })
        };

        bus.reply(ReplyMessage {
            to: WorkerId::from_raw(30),
            from: controller,
        })
        .await
        .unwrap();
        bus.reply(ReplyMessage {
            to: WorkerId::from_raw(31),
            from: controller,
        })
        .await
        .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply.to, WorkerId::from_raw(31));
        assert_eq!(reply.from, controller);
        assert_eq!(bus.pending_replies().await, 1);
    }

    #[tokio::test]
    async fn test_close_fails_both_sides() {
        let bus = MessageBus::new();
        bus.close().await;
        assert!(ControllerChannel::recv(&bus, Phase::Any).await.is_err());
        assert!(bus.send(TokenMessage::lock(WorkerId::from_raw(2))).await.is_err());
    }
}
