//! Selective-receive mailbox
//!
//! A FIFO of envelopes where a receiver takes the first envelope matching a
//! predicate and leaves the rest queued, like a System V message queue read
//! by type. Closing the mailbox wakes every blocked receiver with
//! [`ProtocolError::Closed`].

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::error::ProtocolError;
use super::messages::Envelope;

struct MailboxInner {
    queue: VecDeque<Envelope>,
    closed: bool,
}

/// Shared queue of envelopes with predicate-based receive
pub struct Mailbox {
    inner: Mutex<MailboxInner>,
    notify: Notify,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MailboxInner {
                queue: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Append an envelope and wake receivers
    pub async fn push(&self, env: Envelope) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(ProtocolError::Closed);
        }
        inner.queue.push_back(env);
        drop(inner);

        self.notify.notify_waiters();
        Ok(())
    }

    /// Remove and return the first envelope `accept` admits, waiting if none is queued
    pub async fn take<F>(&self, accept: F) -> Result<Envelope, ProtocolError>
    where
        F: Fn(&Envelope) -> bool,
    {
        loop {
            // Registered before checking the queue so a push in between is not missed
            let notified = self.notify.notified();

            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(ProtocolError::Closed);
                }
                if let Some(pos) = inner.queue.iter().position(&accept) {
                    if let Some(env) = inner.queue.remove(pos) {
                        return Ok(env);
                    }
                }
            }

            notified.await;
        }
    }

    /// Refuse further traffic and release every waiting receiver
    pub async fn close(&self) {
        debug!("Mailbox::close: called");
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        let dropped = inner.queue.len();
        inner.queue.clear();
        drop(inner);

        debug!(dropped, "Mailbox::close: queue cleared");
        self.notify.notify_waiters();
    }

    /// Number of queued envelopes
    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn env(mtype: i64, pid: i32) -> Envelope {
        Envelope { mtype, pid }
    }

    #[tokio::test]
    async fn test_take_skips_non_matching() {
        let mailbox = Mailbox::new();
        mailbox.push(env(1, 10)).await.unwrap();
        mailbox.push(env(2, 11)).await.unwrap();
        mailbox.push(env(1, 12)).await.unwrap();

        let got = mailbox.take(|e| e.mtype == 2).await.unwrap();
        assert_eq!(got, env(2, 11));

        let got = mailbox.take(|e| e.mtype == 1).await.unwrap();
        assert_eq!(got, env(1, 10));
        assert_eq!(mailbox.len().await, 1);
    }

    #[tokio::test]
    async fn test_take_waits_for_push() {
        let mailbox = Arc::new(Mailbox::new());
        let receiver = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.take(|e| e.mtype == 7).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        mailbox.push(env(3, 1)).await.unwrap();
        mailbox.push(env(7, 2)).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), receiver)
            .await
            .expect("receiver should wake")
            .unwrap()
            .unwrap();
        assert_eq!(got, env(7, 2));
        assert_eq!(mailbox.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let mailbox = Arc::new(Mailbox::new());
        let receiver = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.take(|_| true).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        mailbox.close().await;

        let result = tokio::time::timeout(Duration::from_secs(5), receiver).await.unwrap().unwrap();
        assert!(matches!(result, Err(ProtocolError::Closed)));
        assert!(matches!(mailbox.push(env(1, 1)).await, Err(ProtocolError::Closed)));
        assert!(mailbox.is_closed().await);
    }
}
