//! # Game Session
//!
//! Client session layer for the Red Button text world.
//!
//! A [`Session`] derives the broker address from the page origin, keeps one
//! broker connection, subscribes a signed-in player's topics as a single
//! group, and turns incoming messages into a bounded visible log and a room
//! display. Player input is recorded in a recallable history and published
//! back as actions.
//!
//! ## Components
//!
//! * [`EndpointResolver`]: origin to `host:port`
//! * [`ConnectionManager`]: one connection, retried with [`RetryPolicy`]
//! * [`SubscriptionMultiplexer`]: the player's topic group
//! * [`LogBuffer`]: merged log with per-stream [`CapacityPolicy`]
//! * [`RoomProjector`]: latest [`RoomState`]
//! * [`CommandHistory`]: input recall
//!
//! ## Example
//!
//! ```rust,no_run
//! use game_session::{Session, SessionConfig, SessionEvent};
//! use broker_client::WsConnector;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), game_session::SessionError> {
//! let mut session = Session::new(Arc::new(WsConnector::default()), SessionConfig::default());
//! session.mount(Some("https://redbutton.example:3000")).await;
//! session.submit_name("Bob").await?;
//!
//! session.input_changed("press the button");
//! session.submit_action().await?;
//!
//! while let Some(event) = session.next_event().await {
//!     if let SessionEvent::LogAppended { text, .. } = event {
//!         println!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod history;
pub mod identity;
pub mod log_buffer;
pub mod message;
pub mod multiplexer;
pub mod room;
pub mod session;
pub mod topics;

pub use connection::{ConnectionManager, ConnectionState, RetryPolicy};
pub use endpoint::{EndpointResolver, DEFAULT_BROKER_PORT};
pub use error::SessionError;
pub use history::CommandHistory;
pub use identity::Identity;
pub use log_buffer::{CapacityPolicy, LogBuffer, LogEntry, LogPolicy, LogStream, DEFAULT_LOG_CAPACITY};
pub use message::{strip_markers, Inbound, RoomUpdate, HIDDEN_MARKERS};
pub use multiplexer::{Delivery, DeliveryOutcome, SubscriptionMultiplexer};
pub use room::{RoomProjector, RoomState};
pub use session::{
    Session, SessionConfig, SessionEvent, SignOutReason, CONNECTION_LOST_NOTICE, SHUTDOWN_NOTICE,
};
pub use topics::{Dialect, TopicKind};
