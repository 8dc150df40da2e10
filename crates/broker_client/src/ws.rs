//! NATS over WebSocket.
//!
//! The broker exposes its client protocol on a WebSocket listener (the
//! browser client connected to `ws://<host>:9222`). A [`WsBroker`] performs
//! the handshake inline and then splits the socket into two tasks:
//!
//! * a **writer** that serialises [`ClientOp`]s from an unbounded queue, so
//!   `publish`/`subscribe`/drop-time `UNSUB` never block on the socket
//! * a **reader** that feeds frames into a [`ServerOpParser`], routes `MSG`
//!   by subscription id and answers server `PING`s

use crate::error::BrokerError;
use crate::protocol::{ClientOp, ConnectInfo, ServerInfo, ServerOp, ServerOpParser};
use crate::transport::{Broker, Connector, Message, Subscription};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Routes = Arc<DashMap<u64, mpsc::UnboundedSender<Message>>>;

/// Connection options for [`WsConnector`].
#[derive(Debug, Clone)]
pub struct WsOptions {
    /// Budget for TCP connect, WebSocket upgrade and the `INFO`/`PONG` exchange
    pub handshake_timeout: Duration,
    /// Client name reported in `CONNECT`
    pub client_name: Option<String>,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            client_name: Some("redbutton".to_string()),
        }
    }
}

/// Turns a resolved `host:port` address into a WebSocket URL.
///
/// Addresses already carrying a `ws://` or `wss://` scheme are kept as they are.
pub fn websocket_url(address: &str) -> String {
    if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_string()
    } else {
        format!("ws://{address}")
    }
}

enum Outbound {
    Op(ClientOp),
    Close,
}

/// A live NATS-over-WebSocket connection.
#[derive(Debug)]
pub struct WsBroker {
    url: String,
    server_info: ServerInfo,
    outbound: mpsc::UnboundedSender<Outbound>,
    routes: Routes,
    next_sid: AtomicU64,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outbound::Op(op) => write!(f, "Op({op:?})"),
            Outbound::Close => write!(f, "Close"),
        }
    }
}

impl WsBroker {
    /// Connects to `address` and completes the protocol handshake.
    pub async fn connect(address: &str, options: &WsOptions) -> Result<Self, BrokerError> {
        let url = websocket_url(address);
        debug!("🔌 Opening WebSocket to {}", url);

        let (ws_stream, _) = tokio::time::timeout(options.handshake_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| BrokerError::Timeout("WebSocket upgrade"))?
            .map_err(|e| BrokerError::Connect(format!("{url}: {e}")))?;
        let (mut sink, mut stream) = ws_stream.split();
        let mut parser = ServerOpParser::new();

        let server_info = tokio::time::timeout(
            options.handshake_timeout,
            handshake(&mut sink, &mut stream, &mut parser, options),
        )
        .await
        .map_err(|_| BrokerError::Timeout("broker handshake"))??;

        info!(
            "✅ Connected to broker {} (server {} v{})",
            url, server_info.server_id, server_info.version
        );

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let routes: Routes = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(write_loop(sink, outbound_rx, closed.clone()));
        let reader = tokio::spawn(read_loop(
            stream,
            parser,
            routes.clone(),
            outbound.clone(),
            closed.clone(),
        ));

        Ok(Self {
            url,
            server_info,
            outbound,
            routes,
            next_sid: AtomicU64::new(1),
            closed,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn send_op(&self, op: ClientOp) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        self.outbound
            .send(Outbound::Op(op))
            .map_err(|_| BrokerError::Closed)
    }
}

async fn handshake(
    sink: &mut SplitSink<WsStream, WsMessage>,
    stream: &mut SplitStream<WsStream>,
    parser: &mut ServerOpParser,
    options: &WsOptions,
) -> Result<ServerInfo, BrokerError> {
    let info = loop {
        match next_server_op(stream, parser).await? {
            ServerOp::Info(info) => break info,
            ServerOp::Err(reason) => return Err(BrokerError::Server(reason)),
            other => debug!("Ignoring {:?} before INFO", other),
        }
    };

    let mut hello = ClientOp::Connect(ConnectInfo::new(options.client_name.clone())).encode()?;
    hello.extend(ClientOp::Ping.encode()?);
    sink.send(WsMessage::Binary(hello.into())).await?;

    loop {
        match next_server_op(stream, parser).await? {
            ServerOp::Pong => return Ok(info),
            ServerOp::Err(reason) => return Err(BrokerError::Server(reason)),
            ServerOp::Ping => {
                sink.send(WsMessage::Binary(ClientOp::Pong.encode()?.into())).await?;
            }
            _ => {}
        }
    }
}

/// Reads frames until the parser yields one complete operation.
async fn next_server_op(
    stream: &mut SplitStream<WsStream>,
    parser: &mut ServerOpParser,
) -> Result<ServerOp, BrokerError> {
    loop {
        if let Some(op) = parser.next_op()? {
            return Ok(op);
        }
        match stream.next().await {
            Some(Ok(WsMessage::Binary(bytes))) => parser.push(&bytes),
            Some(Ok(WsMessage::Text(text))) => parser.push(text.as_bytes()),
            Some(Ok(WsMessage::Close(_))) | None => return Err(BrokerError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    closed: Arc<AtomicBool>,
) {
    while let Some(item) = outbound.recv().await {
        let frame = match item {
            Outbound::Op(op) => match op.encode() {
                Ok(bytes) => WsMessage::Binary(bytes.into()),
                Err(e) => {
                    warn!("⚠️ Dropping unencodable operation: {}", e);
                    continue;
                }
            },
            Outbound::Close => {
                let _ = sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client closing".into(),
                    })))
                    .await;
                break;
            }
        };
        if let Err(e) = sink.send(frame).await {
            error!("❌ Broker write failed: {}", e);
            break;
        }
    }
    closed.store(true, Ordering::Release);
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    mut parser: ServerOpParser,
    routes: Routes,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: Arc<AtomicBool>,
) {
    loop {
        let op = match next_server_op(&mut stream, &mut parser).await {
            Ok(op) => op,
            Err(BrokerError::Closed) => {
                info!("🔌 Broker connection closed");
                break;
            }
            Err(e) => {
                warn!("⚠️ Broker read failed: {}", e);
                break;
            }
        };

        match op {
            ServerOp::Msg(msg) => {
                let delivered = routes
                    .get(&msg.sid)
                    .map(|route| route.send(Message::new(msg.subject.clone(), msg.payload)).is_ok());
                match delivered {
                    Some(true) => {}
                    Some(false) => {
                        routes.remove(&msg.sid);
                    }
                    None => debug!("MSG for released subscription {} on '{}'", msg.sid, msg.subject),
                }
            }
            ServerOp::Ping => {
                let _ = outbound.send(Outbound::Op(ClientOp::Pong));
            }
            ServerOp::Err(reason) => error!("❌ Broker error: {}", reason),
            ServerOp::Info(_) | ServerOp::Pong | ServerOp::Ok => {}
        }
    }

    closed.store(true, Ordering::Release);
    // Dropping the senders ends every subscription stream.
    routes.clear();
}

#[async_trait]
impl Broker for WsBroker {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.server_info.max_payload > 0 && payload.len() > self.server_info.max_payload {
            return Err(BrokerError::Protocol(format!(
                "payload of {} bytes exceeds broker limit of {}",
                payload.len(),
                self.server_info.max_payload
            )));
        }
        self.send_op(ClientOp::Pub {
            subject: subject.to_string(),
            payload,
        })
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BrokerError> {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes.insert(sid, sender);
        if let Err(e) = self.send_op(ClientOp::Sub {
            subject: subject.to_string(),
            sid,
        }) {
            self.routes.remove(&sid);
            return Err(e);
        }
        debug!("📡 Subscribed to '{}' as sid {}", subject, sid);

        let routes = self.routes.clone();
        let outbound = self.outbound.clone();
        Ok(Subscription::new(sid, subject, receiver, move || {
            if routes.remove(&sid).is_some() {
                let _ = outbound.send(Outbound::Op(ClientOp::Unsub { sid }));
            }
        }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Outbound::Close);
        self.routes.clear();
        if let Ok(mut tasks) = self.tasks.lock() {
            // The writer drains the close frame on its own; the reader may be
            // parked on a socket read that never completes.
            for task in tasks.drain(1..) {
                task.abort();
            }
        }
        info!("🔌 Closed broker connection {}", self.url);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for WsBroker {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// [`Connector`] producing [`WsBroker`] connections.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    options: WsOptions,
}

impl WsConnector {
    pub fn new(options: WsOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Broker>, BrokerError> {
        let broker = WsBroker::connect(address, &self.options).await?;
        Ok(Arc::new(broker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("game.example:9222"), "ws://game.example:9222");
        assert_eq!(websocket_url("wss://game.example:443"), "wss://game.example:443");
    }

    /// Minimal broker speaking just enough protocol for one client.
    async fn fake_broker(listener: TcpListener) {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = accept_async(tcp).await.unwrap();
        let (mut sink, mut stream) = ws.split();

        sink.send(WsMessage::Binary(
            b"INFO {\"server_id\":\"test\",\"version\":\"2.10.0\",\"max_payload\":1024}\r\n"
                .to_vec()
                .into(),
        ))
        .await
        .unwrap();

        let mut seen = String::new();
        while let Some(Ok(frame)) = stream.next().await {
            if let WsMessage::Binary(bytes) = frame {
                seen.push_str(&String::from_utf8_lossy(&bytes));
            }
            if seen.contains("PING\r\n") && !seen.contains("SUB ") {
                sink.send(WsMessage::Binary(b"PONG\r\n".to_vec().into()))
                    .await
                    .unwrap();
                seen.clear();
                seen.push_str("CONNECTED");
            }
            if let Some(pos) = seen.find("SUB game_update ") {
                let sid: String = seen[pos + "SUB game_update ".len()..]
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                // Split the MSG over two frames to exercise buffering.
                let msg = format!("MSG game_update {sid} 12\r\nhello, world\r\n");
                let (a, b) = msg.as_bytes().split_at(20);
                sink.send(WsMessage::Binary(a.to_vec().into())).await.unwrap();
                sink.send(WsMessage::Binary(b.to_vec().into())).await.unwrap();
                seen.clear();
            }
            if seen.contains("PUB player_action") {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_handshake_subscribe_and_publish() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(fake_broker(listener));

        let broker = WsBroker::connect(&address, &WsOptions::default()).await.unwrap();
        assert_eq!(broker.server_info().server_id, "test");

        let mut sub = broker.subscribe("game_update").await.unwrap();
        let msg = sub.next_message().await.unwrap();
        assert_eq!(msg.subject, "game_update");
        assert_eq!(msg.text(), "hello, world");

        broker
            .publish("player_action", b"{}".to_vec())
            .await
            .unwrap();
        server.await.unwrap();

        broker.close().await;
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_publish_over_limit_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(fake_broker(listener));

        let broker = WsBroker::connect(&address, &WsOptions::default()).await.unwrap();
        let result = broker.publish("game_update", vec![b'x'; 2048]).await;
        assert!(matches!(result, Err(BrokerError::Protocol(_))));
        broker.close().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = WsConnector::default().connect(&address).await;
        assert!(matches!(result, Err(BrokerError::Connect(_))));
    }
}
