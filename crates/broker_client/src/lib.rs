//! # Broker Client
//!
//! Publish/subscribe transport used by the Red Button session layer.
//!
//! The session code is written against two traits:
//!
//! * [`Connector`] opens a connection for a resolved `host:port` address
//! * [`Broker`] publishes payloads and hands out [`Subscription`] streams
//!
//! Two implementations ship with the crate:
//!
//! * [`WsConnector`] / [`WsBroker`]: the NATS client protocol tunnelled over
//!   WebSocket, which is what the game's broker exposes to clients
//! * [`MemoryConnector`] / [`MemoryHub`]: an in-process loopback broker for
//!   tests and offline embedding
//!
//! ## Example
//!
//! ```rust,no_run
//! use broker_client::{Connector, WsConnector};
//!
//! # async fn demo() -> Result<(), broker_client::BrokerError> {
//! let broker = WsConnector::default().connect("localhost:9222").await?;
//! let mut updates = broker.subscribe("game_update").await?;
//! broker.publish("player_action", br#"{"player_id":"bob","player_input":"look"}"#.to_vec()).await?;
//! while let Some(msg) = updates.next_message().await {
//!     println!("{}", msg.text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod memory;
pub mod protocol;
pub mod transport;
pub mod ws;

pub use error::BrokerError;
pub use memory::{MemoryConnection, MemoryConnector, MemoryHub};
pub use transport::{Broker, Connector, Message, Subscription};
pub use ws::{websocket_url, WsBroker, WsConnector, WsOptions};
