//! Transport-neutral publish/subscribe primitives.
//!
//! The session layer never talks to a concrete broker. It holds an
//! `Arc<dyn Broker>` obtained from a [`Connector`], and consumes each
//! [`Subscription`] as an asynchronous [`Stream`] of [`Message`]s.

use crate::error::BrokerError;
use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A message delivered on a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// A live subscription.
///
/// Yields messages in the order the broker sent them on this subject. The
/// stream ends when the connection closes. Dropping the subscription (or
/// calling [`Subscription::unsubscribe`]) releases it on the broker.
pub struct Subscription {
    sid: u64,
    subject: String,
    receiver: mpsc::UnboundedReceiver<Message>,
    release: Option<ReleaseHook>,
}

impl Subscription {
    /// Builds a subscription; `release` runs exactly once when it is dropped.
    pub fn new(
        sid: u64,
        subject: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Message>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            sid,
            subject: subject.into(),
            receiver,
            release: Some(Box::new(release)),
        }
    }

    pub fn sid(&self) -> u64 {
        self.sid
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Awaits the next message, `None` once the subscription is finished.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("sid", &self.sid)
            .field("subject", &self.subject)
            .finish()
    }
}

/// An open broker connection.
#[async_trait]
pub trait Broker: Send + Sync + fmt::Debug {
    /// Publishes `payload` on `subject`. Fire-and-forget: no delivery guarantee.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Starts receiving messages published on `subject`.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, BrokerError>;

    /// Closes the connection. Outstanding subscriptions end.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens broker connections for a resolved address (`host:port`).
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Broker>, BrokerError>;
}
