//! NATS client protocol codec.
//!
//! The broker speaks the plain-text NATS client protocol, tunnelled through
//! WebSocket frames. Frames carry no protocol boundaries: one frame may hold
//! several operations, and a `MSG` payload may be split over two frames. The
//! [`ServerOpParser`] therefore buffers bytes and only yields complete
//! operations.
//!
//! Only the subset a subscriber/publisher client needs is implemented:
//!
//! | Direction | Operations |
//! |-----------|------------|
//! | client → server | `CONNECT`, `PUB`, `SUB`, `UNSUB`, `PING`, `PONG` |
//! | server → client | `INFO`, `MSG`, `PING`, `PONG`, `+OK`, `-ERR` |

use crate::error::BrokerError;
use serde::{Deserialize, Serialize};

const CRLF: &[u8] = b"\r\n";

/// Options sent with `CONNECT`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectInfo {
    pub verbose: bool,
    pub pedantic: bool,
    pub lang: String,
    pub version: String,
    pub protocol: u8,
    pub headers: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConnectInfo {
    pub fn new(name: Option<String>) -> Self {
        Self {
            verbose: false,
            pedantic: false,
            lang: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: 1,
            headers: false,
            name,
        }
    }
}

/// Subset of the server `INFO` block the client cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerInfo {
    pub server_id: String,
    pub server_name: String,
    pub version: String,
    pub max_payload: usize,
    pub headers: bool,
}

/// An operation written by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOp {
    Connect(ConnectInfo),
    Pub { subject: String, payload: Vec<u8> },
    Sub { subject: String, sid: u64 },
    Unsub { sid: u64 },
    Ping,
    Pong,
}

impl ClientOp {
    /// Serializes the operation to wire bytes, including the trailing CRLF.
    pub fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        let mut out = Vec::new();
        match self {
            ClientOp::Connect(info) => {
                let json = serde_json::to_string(info)
                    .map_err(|e| BrokerError::Protocol(format!("CONNECT encode: {e}")))?;
                out.extend_from_slice(b"CONNECT ");
                out.extend_from_slice(json.as_bytes());
                out.extend_from_slice(CRLF);
            }
            ClientOp::Pub { subject, payload } => {
                validate_subject(subject)?;
                out.extend_from_slice(format!("PUB {} {}\r\n", subject, payload.len()).as_bytes());
                out.extend_from_slice(payload);
                out.extend_from_slice(CRLF);
            }
            ClientOp::Sub { subject, sid } => {
                validate_subject(subject)?;
                out.extend_from_slice(format!("SUB {subject} {sid}\r\n").as_bytes());
            }
            ClientOp::Unsub { sid } => {
                out.extend_from_slice(format!("UNSUB {sid}\r\n").as_bytes());
            }
            ClientOp::Ping => out.extend_from_slice(b"PING\r\n"),
            ClientOp::Pong => out.extend_from_slice(b"PONG\r\n"),
        }
        Ok(out)
    }
}

/// Subjects are space-free tokens; anything else would corrupt the framing.
fn validate_subject(subject: &str) -> Result<(), BrokerError> {
    if subject.is_empty() || subject.chars().any(|c| c.is_whitespace()) {
        return Err(BrokerError::Protocol(format!("invalid subject '{subject}'")));
    }
    Ok(())
}

/// A delivered `MSG`.
#[derive(Debug, Clone, PartialEq)]
pub struct MsgOp {
    pub subject: String,
    pub sid: u64,
    pub reply_to: Option<String>,
    pub payload: Vec<u8>,
}

/// An operation read from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerOp {
    Info(ServerInfo),
    Msg(MsgOp),
    Ping,
    Pong,
    Ok,
    Err(String),
}

/// Largest `MSG` payload accepted before the server announces its own limit.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Incremental parser for server operations.
///
/// `MSG` payloads longer than the limit are rejected as protocol errors. The
/// limit starts at [`DEFAULT_MAX_PAYLOAD`] and follows the `max_payload`
/// announced in the server's `INFO`.
#[derive(Debug)]
pub struct ServerOpParser {
    buf: Vec<u8>,
    max_payload: usize,
}

impl Default for ServerOpParser {
    fn default() -> Self {
        Self {
            buf: Vec::new(),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ServerOpParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current `MSG` payload limit in bytes.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Appends raw bytes received from the transport.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete operation, or `None` when more bytes are needed.
    pub fn next_op(&mut self) -> Result<Option<ServerOp>, BrokerError> {
        let Some(line_end) = find_crlf(&self.buf) else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&self.buf[..line_end])
            .map_err(|_| BrokerError::Protocol("control line is not UTF-8".to_string()))?
            .to_string();
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line.trim(), ""),
        };

        let op = match verb.to_ascii_uppercase().as_str() {
            "MSG" => {
                let header = parse_msg_header(rest)?;
                if header.len > self.max_payload {
                    return Err(BrokerError::Protocol(format!(
                        "MSG payload of {} bytes exceeds limit of {}",
                        header.len, self.max_payload
                    )));
                }
                let payload_start = line_end + CRLF.len();
                let payload_end = payload_start
                    .checked_add(header.len)
                    .ok_or_else(|| BrokerError::Protocol("MSG payload length overflows".to_string()))?;
                if self.buf.len() < payload_end + CRLF.len() {
                    return Ok(None);
                }
                if &self.buf[payload_end..payload_end + CRLF.len()] != CRLF {
                    return Err(BrokerError::Protocol(
                        "MSG payload not terminated by CRLF".to_string(),
                    ));
                }
                let payload = self.buf[payload_start..payload_end].to_vec();
                self.buf.drain(..payload_end + CRLF.len());
                return Ok(Some(ServerOp::Msg(MsgOp {
                    subject: header.subject,
                    sid: header.sid,
                    reply_to: header.reply_to,
                    payload,
                })));
            }
            "INFO" => {
                let info: ServerInfo = serde_json::from_str(rest)
                    .map_err(|e| BrokerError::Protocol(format!("INFO decode: {e}")))?;
                if info.max_payload > 0 {
                    self.max_payload = info.max_payload;
                }
                ServerOp::Info(info)
            }
            "PING" => ServerOp::Ping,
            "PONG" => ServerOp::Pong,
            "+OK" => ServerOp::Ok,
            "-ERR" => ServerOp::Err(rest.trim_matches('\'').to_string()),
            other => {
                return Err(BrokerError::Protocol(format!("unknown operation '{other}'")));
            }
        };
        self.buf.drain(..line_end + CRLF.len());
        Ok(Some(op))
    }
}

struct MsgHeader {
    subject: String,
    sid: u64,
    reply_to: Option<String>,
    len: usize,
}

fn parse_msg_header(args: &str) -> Result<MsgHeader, BrokerError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let bad = || BrokerError::Protocol(format!("malformed MSG arguments '{args}'"));
    let (subject, sid, reply_to, len) = match parts.as_slice() {
        [subject, sid, len] => (*subject, *sid, None, *len),
        [subject, sid, reply, len] => (*subject, *sid, Some(reply.to_string()), *len),
        _ => return Err(bad()),
    };
    Ok(MsgHeader {
        subject: subject.to_string(),
        sid: sid.parse().map_err(|_| bad())?,
        reply_to,
        len: len.parse().map_err(|_| bad())?,
    })
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_pub_and_sub() {
        let op = ClientOp::Pub {
            subject: "player_action".to_string(),
            payload: b"{\"x\":1}".to_vec(),
        };
        assert_eq!(op.encode().unwrap(), b"PUB player_action 7\r\n{\"x\":1}\r\n".to_vec());

        let op = ClientOp::Sub { subject: "room_update.bob".to_string(), sid: 4 };
        assert_eq!(op.encode().unwrap(), b"SUB room_update.bob 4\r\n".to_vec());

        assert_eq!(ClientOp::Unsub { sid: 4 }.encode().unwrap(), b"UNSUB 4\r\n".to_vec());
    }

    #[test]
    fn test_encode_rejects_subject_with_space() {
        let op = ClientOp::Sub { subject: "bad subject".to_string(), sid: 1 };
        assert!(matches!(op.encode(), Err(BrokerError::Protocol(_))));
    }

    #[test]
    fn test_connect_is_json() {
        let bytes = ClientOp::Connect(ConnectInfo::new(Some("redbutton".into())))
            .encode()
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("CONNECT {"));
        assert!(text.ends_with("}\r\n"));
        assert!(text.contains("\"verbose\":false"));
        assert!(text.contains("\"name\":\"redbutton\""));
    }

    #[test]
    fn test_parse_info_then_ping() {
        let mut parser = ServerOpParser::new();
        parser.push(b"INFO {\"server_id\":\"abc\",\"max_payload\":1048576}\r\nPING\r\n");

        match parser.next_op().unwrap() {
            Some(ServerOp::Info(info)) => {
                assert_eq!(info.server_id, "abc");
                assert_eq!(info.max_payload, 1048576);
            }
            other => panic!("expected INFO, got {other:?}"),
        }
        assert_eq!(parser.next_op().unwrap(), Some(ServerOp::Ping));
        assert_eq!(parser.next_op().unwrap(), None);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_msg_split_across_frames() {
        let mut parser = ServerOpParser::new();
        parser.push(b"MSG game_update 1 11\r\nhello");
        assert_eq!(parser.next_op().unwrap(), None);
        parser.push(b" world\r\n");

        let op = parser.next_op().unwrap();
        assert_eq!(
            op,
            Some(ServerOp::Msg(MsgOp {
                subject: "game_update".to_string(),
                sid: 1,
                reply_to: None,
                payload: b"hello world".to_vec(),
            }))
        );
    }

    #[test]
    fn test_msg_payload_may_contain_crlf() {
        let mut parser = ServerOpParser::new();
        parser.push(b"MSG instructions.bob 9 _INBOX.1 8\r\nab\r\ncd\r\n\r\n+OK\r\n");

        match parser.next_op().unwrap() {
            Some(ServerOp::Msg(msg)) => {
                assert_eq!(msg.sid, 9);
                assert_eq!(msg.reply_to.as_deref(), Some("_INBOX.1"));
                assert_eq!(msg.payload, b"ab\r\ncd\r\n".to_vec());
            }
            other => panic!("expected MSG, got {other:?}"),
        }
        assert_eq!(parser.next_op().unwrap(), Some(ServerOp::Ok));
    }

    #[test]
    fn test_err_strips_quotes() {
        let mut parser = ServerOpParser::new();
        parser.push(b"-ERR 'Authorization Violation'\r\n");
        assert_eq!(
            parser.next_op().unwrap(),
            Some(ServerOp::Err("Authorization Violation".to_string()))
        );
    }

    #[test]
    fn test_unknown_operation_is_protocol_error() {
        let mut parser = ServerOpParser::new();
        parser.push(b"HELLO there\r\n");
        assert!(matches!(parser.next_op(), Err(BrokerError::Protocol(_))));
    }

    #[test]
    fn test_oversized_msg_length_is_protocol_error() {
        let mut parser = ServerOpParser::new();
        parser.push(b"MSG game_update 1 18446744073709551615\r\nhi\r\n");
        assert!(matches!(parser.next_op(), Err(BrokerError::Protocol(_))));
    }

    #[test]
    fn test_msg_limit_follows_info() {
        let mut parser = ServerOpParser::new();
        assert_eq!(parser.max_payload(), DEFAULT_MAX_PAYLOAD);
        parser.push(b"INFO {\"server_id\":\"abc\",\"max_payload\":4}\r\n");
        parser.next_op().unwrap();
        assert_eq!(parser.max_payload(), 4);

        parser.push(b"MSG game_update 1 5\r\nhello\r\n");
        assert!(matches!(parser.next_op(), Err(BrokerError::Protocol(_))));
    }
}
