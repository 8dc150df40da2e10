//! Error types for broker transports.

/// Failures raised by a [`Broker`](crate::Broker) or [`Connector`](crate::Connector).
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The transport could not be established (DNS, TCP, handshake).
    #[error("Connection error: {0}")]
    Connect(String),

    /// WebSocket level failure after the connection was up
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer sent something that is not valid client protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The broker answered with `-ERR`
    #[error("Broker rejected request: {0}")]
    Server(String),

    /// A handshake step did not complete in time
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The connection has been closed locally or by the peer
    #[error("Connection closed")]
    Closed,
}
