//! Broker connection lifecycle.
//!
//! [`ConnectionManager`] owns the single broker connection of a session.
//! Connecting is guarded so repeated or concurrent calls never open a second
//! connection, publishing before a connection exists is dropped, and a
//! teardown issued while a connect is still in flight discards the late
//! connection.

use crate::error::SessionError;
use broker_client::{Broker, Connector, Subscription};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Default retries after the first failed connection attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base delay for exponential backoff in ms.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default cap on a single backoff delay in ms.
pub const DEFAULT_MAX_DELAY_MS: u64 = 5_000;
/// Default jitter factor (0.0-1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Backoff parameters for establishing a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means a single attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Delays vary by up to this fraction either way
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// One attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based):
    /// `min(max_delay, base * 2^attempt)` scaled by `1 ± jitter`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(32));
        let capped = exponential.min(self.max_delay_ms) as f64;

        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        let scale = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_millis((capped * scale).round() as u64)
    }
}

struct Inner {
    state: ConnectionState,
    address: Option<String>,
    broker: Option<Arc<dyn Broker>>,
    /// Bumped on every connect start and teardown so stale attempts can tell
    generation: u64,
}

impl Inner {
    /// The open broker, noticing connections the server has closed.
    fn live_broker(&mut self) -> Option<Arc<dyn Broker>> {
        if self.broker.as_ref().is_some_and(|b| b.is_closed()) {
            warn!("🔌 Broker connection closed by peer");
            self.broker = None;
            self.state = ConnectionState::Disconnected;
        }
        self.broker.clone()
    }
}

/// Owns at most one broker connection.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connector", &self.connector)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// # Arguments
    ///
    /// * `connector` - Opens the underlying broker connection
    /// * `retry` - Backoff used when an attempt fails
    pub fn new(connector: Arc<dyn Connector>, retry: RetryPolicy) -> Self {
        Self {
            connector,
            retry,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                address: None,
                broker: None,
                generation: 0,
            }),
        }
    }

    /// Connects to `address` unless a connection exists or is in flight.
    ///
    /// Failures are logged; after the retry budget is spent the manager is
    /// left `Disconnected`.
    ///
    /// # Returns
    ///
    /// The state after this call. `Connecting` when another call is already
    /// in flight, and `Disconnected` when a teardown overtook this connect.
    pub async fn connect(&self, address: &str) -> ConnectionState {
        if address.is_empty() {
            debug!("No broker address yet, not connecting");
            return self.state().await;
        }

        let generation = {
            let mut inner = self.inner.lock().await;
            inner.live_broker();
            if inner.state != ConnectionState::Disconnected {
                debug!(
                    "Connection to {:?} already {:?}, ignoring connect to {}",
                    inner.address, inner.state, address
                );
                return inner.state;
            }
            inner.state = ConnectionState::Connecting;
            inner.address = Some(address.to_string());
            inner.generation += 1;
            inner.generation
        };

        info!("🔌 Connecting to broker at {}", address);
        let mut attempt = 0;
        loop {
            match self.connector.connect(address).await {
                Ok(broker) => {
                    let mut inner = self.inner.lock().await;
                    if inner.generation != generation {
                        drop(inner);
                        debug!("Connection to {} finished after teardown, discarding", address);
                        broker.close().await;
                        return ConnectionState::Disconnected;
                    }
                    inner.broker = Some(broker);
                    inner.state = ConnectionState::Connected;
                    info!("✅ Connected to broker at {}", address);
                    return inner.state;
                }
                Err(e) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        "⚠️ Connection attempt {} to {} failed: {} - retrying in {:?}",
                        attempt, address, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    if self.inner.lock().await.generation != generation {
                        debug!("Connect to {} cancelled by teardown", address);
                        return ConnectionState::Disconnected;
                    }
                }
                Err(e) => {
                    error!("❌ Failed to connect to broker at {}: {}", address, e);
                    let mut inner = self.inner.lock().await;
                    if inner.generation == generation {
                        inner.state = ConnectionState::Disconnected;
                    }
                    return inner.state;
                }
            }
        }
    }

    /// Publishes on the open connection. Without one the message is dropped.
    /// Returns whether the message was handed to the broker.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> bool {
        let Some(broker) = self.inner.lock().await.live_broker() else {
            debug!("Not connected, dropping publish on '{}'", topic);
            return false;
        };
        match broker.publish(topic, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ Publish on '{}' failed: {}", topic, e);
                false
            }
        }
    }

    /// Subscribes to `topic` on the open connection.
    ///
    /// # Arguments
    ///
    /// * `topic` - Exact subject to listen on
    ///
    /// # Returns
    ///
    /// A [`Subscription`] released when dropped, or
    /// [`SessionError::NotConnected`] when there is no open connection.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, SessionError> {
        let broker = self
            .inner
            .lock()
            .await
            .live_broker()
            .ok_or(SessionError::NotConnected)?;
        Ok(broker.subscribe(topic).await?)
    }

    /// Closes the connection, if any, and forgets the address.
    pub async fn teardown(&self) {
        let broker = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            inner.state = ConnectionState::Disconnected;
            inner.address = None;
            inner.broker.take()
        };
        if let Some(broker) = broker {
            info!("🔌 Closing broker connection");
            broker.close().await;
        }
    }

    /// Current state. A connection closed by the server reads as `Disconnected`.
    pub async fn state(&self) -> ConnectionState {
        let mut inner = self.inner.lock().await;
        inner.live_broker();
        inner.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Address of the current or in-flight connection.
    pub async fn address(&self) -> Option<String> {
        self.inner.lock().await.address.clone()
    }
}
