//! The player session.
//!
//! [`Session`] ties the components together into the lifecycle of one game
//! client: mount against an origin, sign in with a name, pump events from the
//! broker into the log and room display, send actions, and unmount.

use crate::connection::{ConnectionManager, ConnectionState, RetryPolicy};
use crate::endpoint::{EndpointResolver, DEFAULT_BROKER_PORT};
use crate::error::SessionError;
use crate::history::CommandHistory;
use crate::identity::Identity;
use crate::log_buffer::{LogBuffer, LogPolicy, LogStream};
use crate::message::Inbound;
use crate::multiplexer::{Delivery, DeliveryOutcome, SubscriptionMultiplexer};
use crate::room::{RoomProjector, RoomState};
use crate::topics::{Dialect, TopicKind};
use broker_client::Connector;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Shown in place of whatever the server sends on the shutdown topic.
pub const SHUTDOWN_NOTICE: &str = "The server is shutting down!";

/// Shown when the broker drops the connection of a signed-in player.
pub const CONNECTION_LOST_NOTICE: &str = "Lost connection to the game server.";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub broker_port: u16,
    pub dialect: Dialect,
    pub log_policy: LogPolicy,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broker_port: DEFAULT_BROKER_PORT,
            dialect: Dialect::default(),
            log_policy: LogPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    Logout,
    NameInvalid,
    Shutdown,
    /// The broker closed the connection
    Disconnected,
}

/// Something the front end should render.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A line was added to the visible log
    LogAppended {
        stream: LogStream,
        text: String,
        /// Old entries discarded by the capacity policy
        trimmed: usize,
    },
    RoomChanged(RoomState),
    /// A notice from a subscription group that is no longer current
    Notice(String),
    /// The player was signed out and must enter a name again
    SignedOut {
        reason: SignOutReason,
        notice: String,
    },
    /// A payload could not be decoded; that topic is no longer listened to
    DecodeFailed { kind: TopicKind, error: String },
}

pub struct Session {
    id: Uuid,
    config: SessionConfig,
    resolver: EndpointResolver,
    connection: Arc<ConnectionManager>,
    multiplexer: SubscriptionMultiplexer,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    log: LogBuffer,
    room: RoomProjector,
    history: CommandHistory,
    identity: Option<Identity>,
}

impl Session {
    /// Creates an unmounted session.
    ///
    /// # Arguments
    ///
    /// * `connector` - Opens broker connections (WebSocket in production,
    ///   loopback in tests)
    /// * `config` - Broker port, dialect, log capacities and retry policy
    pub fn new(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        let connection = Arc::new(ConnectionManager::new(connector, config.retry.clone()));
        let (sender, deliveries) = mpsc::unbounded_channel();
        let multiplexer = SubscriptionMultiplexer::new(connection.clone(), config.dialect, sender);
        let id = Uuid::new_v4();
        debug!("Created session {} ({} dialect)", id, config.dialect);

        Self {
            id,
            resolver: EndpointResolver::new(config.broker_port),
            log: LogBuffer::new(config.log_policy),
            config,
            connection,
            multiplexer,
            deliveries,
            room: RoomProjector::new(),
            history: CommandHistory::new(),
            identity: None,
        }
    }

    /// Resolves the broker from `origin` and connects.
    ///
    /// Mounting again with an origin that resolves elsewhere signs the player
    /// out and replaces the connection. A player whose connection was closed
    /// by the broker is signed out before reconnecting.
    ///
    /// # Returns
    ///
    /// The connection state after the attempt.
    pub async fn mount(&mut self, origin: Option<&str>) -> ConnectionState {
        self.reconcile_connection().await;
        let address = self.resolver.resolve(origin);
        if let Some(current) = self.connection.address().await {
            if current != address {
                info!("🔄 Broker address changed from {} to {:?}", current, address);
                self.sign_out().await;
                self.connection.teardown().await;
            }
        }
        self.connection.connect(&address).await
    }

    /// Signs in as `name`: subscribes the player's topics, then registers the
    /// name with the game server.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - the player is signed in and the name was published
    /// * `Ok(false)` - a player is already signed in; nothing changed
    /// * `Err(_)` - no connection, or the name is blank or unusable
    pub async fn submit_name(&mut self, name: &str) -> Result<bool, SessionError> {
        self.reconcile_connection().await;
        if self.identity.is_some() {
            debug!("Already signed in, ignoring name submission");
            return Ok(false);
        }
        if !self.connection.is_connected().await {
            return Err(SessionError::NotConnected);
        }

        let identity = Identity::new(name)?;
        let request = self.config.dialect.name_request(&identity)?;
        self.multiplexer.activate(&identity).await?;

        info!("👤 Player '{}' signing in (session {})", identity, self.id);
        self.identity = Some(identity);
        self.connection
            .publish(self.config.dialect.name_topic(), request)
            .await;
        Ok(true)
    }

    /// Records a new value of the input line.
    pub fn input_changed(&mut self, value: impl Into<String>) {
        self.history.record_input(value);
    }

    pub fn recall_previous(&mut self) -> Option<&str> {
        self.history.recall_previous()
    }

    pub fn recall_next(&mut self) -> Option<&str> {
        self.history.recall_next()
    }

    /// Sends the current input as a player action and clears it.
    ///
    /// Nothing is sent, and the input is kept, when there is no connection,
    /// no signed-in player or the input is blank.
    ///
    /// # Returns
    ///
    /// Whether the action was handed to the broker.
    pub async fn submit_action(&mut self) -> Result<bool, SessionError> {
        let Some(identity) = &self.identity else {
            debug!("No player signed in, not sending action");
            return Ok(false);
        };
        if self.history.input().trim().is_empty() || !self.connection.is_connected().await {
            return Ok(false);
        }

        let request = self
            .config
            .dialect
            .action_request(identity, self.history.input())?;
        self.history.take_input();
        Ok(self
            .connection
            .publish(self.config.dialect.action_topic(), request)
            .await)
    }

    /// Waits for the next delivery, applies it and describes the change.
    ///
    /// Stays pending while nothing arrives, including while no player is
    /// signed in. The delivery channel lives as long as the session, so this
    /// never yields `None` in practice; the `Option` lets it sit directly in a
    /// `select!` pattern.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let delivery = self.deliveries.recv().await?;
            if let Some(event) = self.apply(delivery).await {
                return Some(event);
            }
        }
    }

    /// Applies one delivery. `None` when it changes nothing worth showing.
    async fn apply(&mut self, delivery: Delivery) -> Option<SessionEvent> {
        let current = self.multiplexer.is_active()
            && delivery.generation == self.multiplexer.generation();

        let inbound = match delivery.outcome {
            DeliveryOutcome::Message(inbound) => inbound,
            DeliveryOutcome::DecodeFailed(e) => {
                error!("❌ Failed to decode message on {:?}: {}", delivery.kind, e);
                return Some(SessionEvent::DecodeFailed {
                    kind: delivery.kind,
                    error: e.to_string(),
                });
            }
            // Every topic of a dropped connection ends; the first one signs out.
            DeliveryOutcome::Ended if current => {
                warn!("🔌 Connection lost, signing out");
                self.sign_out().await;
                return Some(SessionEvent::SignedOut {
                    reason: SignOutReason::Disconnected,
                    notice: CONNECTION_LOST_NOTICE.to_string(),
                });
            }
            DeliveryOutcome::Ended => return None,
        };

        let (reason, notice) = match inbound {
            Inbound::Update(text) => return Some(self.append(LogStream::Updates, text)),
            Inbound::Instruction(text) => return Some(self.append(LogStream::Instructions, text)),
            Inbound::Room(update) => {
                return Some(SessionEvent::RoomChanged(self.room.apply(update).clone()))
            }
            Inbound::Logout(text) => (SignOutReason::Logout, text),
            Inbound::NameInvalid(text) => (SignOutReason::NameInvalid, text),
            Inbound::Shutdown(_) => (SignOutReason::Shutdown, SHUTDOWN_NOTICE.to_string()),
        };

        if !current {
            debug!("Ignoring {:?} from an earlier sign-in", reason);
            return Some(SessionEvent::Notice(notice));
        }

        warn!("👋 Signed out ({:?}): {}", reason, notice);
        self.sign_out().await;
        Some(SessionEvent::SignedOut { reason, notice })
    }

    /// Signs out a player whose connection has been closed underneath them.
    async fn reconcile_connection(&mut self) {
        if self.identity.is_some() && !self.connection.is_connected().await {
            warn!("🔌 Connection lost while signed in, signing out");
            self.sign_out().await;
        }
    }

    fn append(&mut self, stream: LogStream, text: String) -> SessionEvent {
        let trimmed = self.log.append(stream, text.clone());
        SessionEvent::LogAppended {
            stream,
            text,
            trimmed,
        }
    }

    async fn sign_out(&mut self) {
        self.multiplexer.teardown().await;
        self.identity = None;
        self.room.clear();
    }

    /// Signs out and closes the connection.
    pub async fn unmount(&mut self) {
        self.sign_out().await;
        self.connection.teardown().await;
        info!("Session {} unmounted", self.id);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn input(&self) -> &str {
        self.history.input()
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn room(&self) -> Option<&RoomState> {
        self.room.current()
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subjects currently subscribed for the signed-in player.
    pub fn active_subjects(&self) -> &[String] {
        self.multiplexer.subjects()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }
}
