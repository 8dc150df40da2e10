//! In-process loopback broker.
//!
//! [`MemoryHub`] plays the broker server: it fans messages out by exact
//! subject to every subscription of every [`MemoryConnection`] attached to it.
//! It also records what clients published so callers can inspect traffic,
//! and [`MemoryConnector`] can be told to refuse connections to exercise
//! retry paths.

use crate::error::BrokerError;
use crate::transport::{Broker, Connector, Message, Subscription};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
struct Route {
    subject: String,
    connection: u64,
    sender: mpsc::UnboundedSender<Message>,
}

/// Shared loopback broker state.
#[derive(Debug, Default)]
pub struct MemoryHub {
    routes: DashMap<u64, Route>,
    next_sid: AtomicU64,
    next_connection: AtomicU64,
    closed_connections: AtomicU64,
    /// Closed flags of open connections, by connection id
    connections: DashMap<u64, Arc<AtomicBool>>,
    published: Mutex<Vec<Message>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delivers a message to current subscribers without recording it as
    /// client traffic. Returns the number of subscriptions reached.
    pub fn deliver(&self, subject: &str, payload: impl Into<Vec<u8>>) -> usize {
        let message = Message::new(subject, payload);
        let mut reached = 0;
        for route in self.routes.iter() {
            if route.subject == subject && route.sender.send(message.clone()).is_ok() {
                reached += 1;
            }
        }
        reached
    }

    /// Total live subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.routes.len()
    }

    /// Live subscriptions on one subject.
    pub fn subscribers(&self, subject: &str) -> usize {
        self.routes.iter().filter(|r| r.subject == subject).count()
    }

    /// Messages published by clients, oldest first.
    pub fn published(&self) -> Vec<Message> {
        self.published
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Messages published by clients on one subject.
    pub fn published_on(&self, subject: &str) -> Vec<Message> {
        self.published()
            .into_iter()
            .filter(|m| m.subject == subject)
            .collect()
    }

    /// Number of connections opened against this hub so far.
    pub fn connections_opened(&self) -> u64 {
        self.next_connection.load(Ordering::SeqCst)
    }

    /// Number of those connections that have since been closed.
    pub fn connections_closed(&self) -> u64 {
        self.closed_connections.load(Ordering::SeqCst)
    }

    /// Closes every open connection from the broker side, ending all of
    /// their subscription streams. Returns how many were closed.
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<u64> = self.connections.iter().map(|c| *c.key()).collect();
        ids.into_iter()
            .filter(|id| self.close_connection(*id))
            .count()
    }

    fn open_connection(self: &Arc<Self>) -> MemoryConnection {
        let id = self.next_connection.fetch_add(1, Ordering::SeqCst) + 1;
        let closed = Arc::new(AtomicBool::new(false));
        self.connections.insert(id, closed.clone());
        MemoryConnection {
            id,
            hub: self.clone(),
            closed,
        }
    }

    /// Marks a connection closed and drops its routes, once.
    fn close_connection(&self, connection: u64) -> bool {
        let Some((_, closed)) = self.connections.remove(&connection) else {
            return false;
        };
        if closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.closed_connections.fetch_add(1, Ordering::SeqCst);
        self.routes.retain(|_, route| route.connection != connection);
        true
    }
}

/// One client connection to a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    hub: Arc<MemoryHub>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Broker for MemoryConnection {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        if let Ok(mut log) = self.hub.published.lock() {
            log.push(Message::new(subject, payload.clone()));
        }
        self.hub.deliver(subject, payload);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let sid = self.hub.next_sid.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.hub.routes.insert(
            sid,
            Route {
                subject: subject.to_string(),
                connection: self.id,
                sender,
            },
        );
        debug!("loopback subscription {} on '{}'", sid, subject);

        let hub = self.hub.clone();
        Ok(Subscription::new(sid, subject, receiver, move || {
            hub.routes.remove(&sid);
        }))
    }

    async fn close(&self) {
        self.hub.close_connection(self.id);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connector handing out [`MemoryConnection`]s to a shared hub.
#[derive(Debug)]
pub struct MemoryConnector {
    hub: Arc<MemoryHub>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl MemoryConnector {
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        Self {
            hub,
            failures_remaining: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Connection attempts made, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Broker>, BrokerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BrokerError::Connect(format!("{address} refused connection")));
        }
        Ok(Arc::new(self.hub.open_connection()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_by_exact_subject() {
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub.clone());
        let conn = connector.connect("localhost:9222").await.unwrap();

        let mut all = conn.subscribe("game_update").await.unwrap();
        let mut mine = conn.subscribe("game_update.bob").await.unwrap();

        conn.publish("game_update", b"hello".to_vec()).await.unwrap();
        hub.deliver("game_update.bob", "just you");

        assert_eq!(all.next_message().await.unwrap().text(), "hello");
        assert_eq!(mine.next_message().await.unwrap().text(), "just you");
        assert_eq!(hub.published().len(), 1);
        assert_eq!(hub.published_on("game_update")[0].text(), "hello");
    }

    #[tokio::test]
    async fn test_drop_and_close_release_routes() {
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub.clone());
        let conn = connector.connect("localhost:9222").await.unwrap();

        let first = conn.subscribe("a").await.unwrap();
        let _second = conn.subscribe("b").await.unwrap();
        assert_eq!(hub.subscription_count(), 2);

        drop(first);
        assert_eq!(hub.subscription_count(), 1);

        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
        assert_eq!(hub.subscription_count(), 0);
        assert_eq!(hub.connections_closed(), 1);
        assert!(matches!(
            conn.publish("a", vec![]).await,
            Err(BrokerError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_all_ends_streams() {
        let hub = MemoryHub::new();
        let connector = MemoryConnector::new(hub.clone());
        let conn = connector.connect("localhost:9222").await.unwrap();
        let mut sub = conn.subscribe("game_update").await.unwrap();

        assert_eq!(hub.disconnect_all(), 1);
        assert!(conn.is_closed());
        assert!(sub.next_message().await.is_none());
        assert_eq!(hub.subscription_count(), 0);

        // A later client-side close is not counted twice.
        conn.close().await;
        assert_eq!(hub.connections_closed(), 1);
        assert_eq!(hub.disconnect_all(), 0);
    }

    #[tokio::test]
    async fn test_fail_next_counts_down() {
        let connector = MemoryConnector::new(MemoryHub::new());
        connector.fail_next(2);

        assert!(connector.connect("h:1").await.is_err());
        assert!(connector.connect("h:1").await.is_err());
        assert!(connector.connect("h:1").await.is_ok());
        assert_eq!(connector.attempts(), 3);
        assert_eq!(connector.hub().connections_opened(), 1);
    }
}
