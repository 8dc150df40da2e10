//! Error types for the session layer.

use broker_client::BrokerError;

/// Failures surfaced by session operations and message decoding.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// An operation needed a live broker connection and there was none
    #[error("Not connected to the broker")]
    NotConnected,

    /// The display name was empty after trimming
    #[error("Player name cannot be blank")]
    BlankName,

    /// The display name cannot be used as a topic key
    #[error("Invalid player name '{0}': names cannot contain spaces, '.', '*' or '>'")]
    InvalidName(String),

    /// Transport failure while subscribing or publishing
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A room-update payload was not the expected JSON object
    #[error("Malformed room update: {0}")]
    MalformedRoomUpdate(#[source] serde_json::Error),

    /// An outbound payload could not be serialized
    #[error("Failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}
