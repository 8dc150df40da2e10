//! Player subscription group.
//!
//! Once a player has an identity the multiplexer subscribes to every
//! [`TopicKind`] as one group. Each subscription is drained by its own task in
//! a [`JoinSet`]; decoded messages are forwarded over a channel as
//! [`Delivery`] values so the session can apply them one at a time.

use crate::connection::ConnectionManager;
use crate::error::SessionError;
use crate::identity::Identity;
use crate::message::Inbound;
use crate::topics::{Dialect, TopicKind};
use broker_client::Subscription;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// What a delivery task observed on its subscription.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Message(Inbound),
    /// The payload could not be decoded; the task has stopped
    DecodeFailed(SessionError),
    /// The broker ended the subscription, normally because the connection closed
    Ended,
}

/// An observation tagged with the topic and group it came from.
#[derive(Debug)]
pub struct Delivery {
    /// Group generation; compare with [`SubscriptionMultiplexer::generation`]
    pub generation: u64,
    pub kind: TopicKind,
    pub outcome: DeliveryOutcome,
}

struct ActiveGroup {
    identity: Identity,
    tasks: JoinSet<()>,
    subjects: Vec<String>,
}

pub struct SubscriptionMultiplexer {
    connection: Arc<ConnectionManager>,
    dialect: Dialect,
    deliveries: mpsc::UnboundedSender<Delivery>,
    group: Option<ActiveGroup>,
    generation: u64,
}

impl SubscriptionMultiplexer {
    /// Creates an inactive multiplexer.
    ///
    /// # Arguments
    ///
    /// * `connection` - Shared connection the group subscribes through
    /// * `dialect` - Topic naming scheme of the game server
    /// * `deliveries` - Channel every delivery task forwards into
    pub fn new(
        connection: Arc<ConnectionManager>,
        dialect: Dialect,
        deliveries: mpsc::UnboundedSender<Delivery>,
    ) -> Self {
        Self {
            connection,
            dialect,
            deliveries,
            group: None,
            generation: 0,
        }
    }

    /// Subscribes the whole group for `identity`.
    ///
    /// # Arguments
    ///
    /// * `identity` - Player whose topics are subscribed
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - all topics subscribed under a new generation
    /// * `Ok(false)` - a group is already active; the broker is not touched
    /// * `Err(_)` - a subscription failed; the ones already made are released
    pub async fn activate(&mut self, identity: &Identity) -> Result<bool, SessionError> {
        if let Some(group) = &self.group {
            debug!(
                "Subscription group for '{}' already active, not duplicating",
                group.identity.id()
            );
            return Ok(false);
        }

        let mut subscriptions = Vec::with_capacity(TopicKind::ALL.len());
        for kind in TopicKind::ALL {
            let subject = kind.subject(self.dialect, identity.id());
            match self.connection.subscribe(&subject).await {
                Ok(subscription) => subscriptions.push((kind, subscription)),
                Err(e) => {
                    warn!(
                        "⚠️ Subscribing to '{}' failed, releasing {} partial subscriptions",
                        subject,
                        subscriptions.len()
                    );
                    drop(subscriptions);
                    return Err(e);
                }
            }
        }

        self.generation += 1;
        let mut tasks = JoinSet::new();
        let mut subjects = Vec::with_capacity(subscriptions.len());
        for (kind, subscription) in subscriptions {
            subjects.push(subscription.subject().to_string());
            tasks.spawn(forward(
                subscription,
                kind,
                self.generation,
                self.deliveries.clone(),
            ));
        }

        info!(
            "📡 Subscribed {} topics for player '{}'",
            subjects.len(),
            identity.id()
        );
        self.group = Some(ActiveGroup {
            identity: identity.clone(),
            tasks,
            subjects,
        });
        Ok(true)
    }

    /// Cancels every task of the group, releasing its subscriptions.
    /// Returns whether a group was active.
    pub async fn teardown(&mut self) -> bool {
        let Some(mut group) = self.group.take() else {
            return false;
        };
        group.tasks.shutdown().await;
        info!(
            "📴 Unsubscribed {} topics for player '{}'",
            group.subjects.len(),
            group.identity.id()
        );
        true
    }

    pub fn is_active(&self) -> bool {
        self.group.is_some()
    }

    /// Subjects of the active group, in subscription order.
    pub fn subjects(&self) -> &[String] {
        self.group
            .as_ref()
            .map(|g| g.subjects.as_slice())
            .unwrap_or_default()
    }

    /// Generation of the most recently activated group.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

/// Drains one subscription.
///
/// A decode failure is forwarded and ends the task. When the stream itself
/// ends an [`DeliveryOutcome::Ended`] is forwarded so the session can notice
/// the lost connection.
async fn forward(
    mut subscription: Subscription,
    kind: TopicKind,
    generation: u64,
    deliveries: mpsc::UnboundedSender<Delivery>,
) {
    let send = |outcome| {
        deliveries
            .send(Delivery {
                generation,
                kind,
                outcome,
            })
            .is_ok()
    };

    loop {
        let Some(message) = subscription.next().await else {
            debug!("Subscription '{}' ended by the broker", subscription.subject());
            send(DeliveryOutcome::Ended);
            return;
        };
        match Inbound::decode(kind, &message.payload) {
            Ok(inbound) => {
                if !send(DeliveryOutcome::Message(inbound)) {
                    return;
                }
            }
            Err(e) => {
                warn!("⚠️ Stopped listening on '{}' after a bad payload", subscription.subject());
                send(DeliveryOutcome::DecodeFailed(e));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RetryPolicy;
    use broker_client::{MemoryConnector, MemoryHub};

    async fn connected() -> (Arc<MemoryHub>, Arc<ConnectionManager>) {
        let hub = MemoryHub::new();
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(MemoryConnector::new(hub.clone())),
            RetryPolicy::none(),
        ));
        connection.connect("host:9222").await;
        (hub, connection)
    }

    #[tokio::test]
    async fn test_activate_subscribes_group_once() {
        let (hub, connection) = connected().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mux = SubscriptionMultiplexer::new(connection, Dialect::Game, tx);
        let bob = Identity::new("Bob").unwrap();

        assert!(mux.activate(&bob).await.unwrap());
        assert!(!mux.activate(&bob).await.unwrap());
        assert_eq!(hub.subscription_count(), 7);
        assert_eq!(hub.subscribers("room_update.bob"), 1);
        assert_eq!(mux.subjects().len(), 7);
        assert_eq!(mux.generation(), 1);

        assert!(mux.teardown().await);
        assert!(!mux.teardown().await);
        assert_eq!(hub.subscription_count(), 0);
        assert!(mux.subjects().is_empty());
    }

    #[tokio::test]
    async fn test_activate_without_connection_fails_cleanly() {
        let (hub, connection) = connected().await;
        connection.teardown().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mux = SubscriptionMultiplexer::new(connection, Dialect::Game, tx);

        let result = mux.activate(&Identity::new("Bob").unwrap()).await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
        assert!(!mux.is_active());
        assert_eq!(hub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_deliveries_are_tagged() {
        let (hub, connection) = connected().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mux = SubscriptionMultiplexer::new(connection, Dialect::World, tx);
        mux.activate(&Identity::new("Amy").unwrap()).await.unwrap();

        assert_eq!(hub.deliver("world_update.amy", "{hello}"), 1);
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.generation, 1);
        assert_eq!(delivery.kind, TopicKind::PlayerUpdate);
        assert!(matches!(
            delivery.outcome,
            DeliveryOutcome::Message(Inbound::Update(ref text)) if text == "hello"
        ));
    }

    #[tokio::test]
    async fn test_bad_room_payload_ends_that_task() {
        let (hub, connection) = connected().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mux = SubscriptionMultiplexer::new(connection, Dialect::Game, tx);
        mux.activate(&Identity::new("Bob").unwrap()).await.unwrap();

        hub.deliver("room_update.bob", "garbage");
        let delivery = rx.recv().await.unwrap();
        assert!(matches!(
            delivery.outcome,
            DeliveryOutcome::DecodeFailed(SessionError::MalformedRoomUpdate(_))
        ));

        // Wait for the task to drop its subscription.
        for _ in 0..100 {
            if hub.subscribers("room_update.bob") == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(hub.subscribers("room_update.bob"), 0);
        assert_eq!(hub.subscription_count(), 6);
    }

    #[tokio::test]
    async fn test_broker_disconnect_reports_ended_streams() {
        let (hub, connection) = connected().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mux = SubscriptionMultiplexer::new(connection, Dialect::Game, tx);
        mux.activate(&Identity::new("Bob").unwrap()).await.unwrap();

        hub.disconnect_all();
        for _ in 0..TopicKind::ALL.len() {
            let delivery = rx.recv().await.unwrap();
            assert_eq!(delivery.generation, 1);
            assert!(matches!(delivery.outcome, DeliveryOutcome::Ended));
        }
    }

    #[tokio::test]
    async fn test_teardown_does_not_report_ended() {
        let (_hub, connection) = connected().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mux = SubscriptionMultiplexer::new(connection, Dialect::Game, tx);
        mux.activate(&Identity::new("Bob").unwrap()).await.unwrap();

        mux.teardown().await;
        assert!(rx.try_recv().is_err());
    }
}
