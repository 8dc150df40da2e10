//! Inbound message decoding.

use crate::error::SessionError;
use crate::topics::TopicKind;
use serde::Deserialize;

/// Characters the game server wraps around text meant for its language model
/// rather than the player. Only the markers are removed, never the text.
pub const HIDDEN_MARKERS: [char; 3] = ['{', '|', '}'];

pub fn strip_markers(text: &str) -> String {
    text.chars().filter(|c| !HIDDEN_MARKERS.contains(c)).collect()
}

/// Structured room-update payload. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoomUpdate {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub exits: Option<String>,
}

/// A decoded message, tagged by the topic it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Broadcast or player update, markers stripped
    Update(String),
    /// Instruction text, verbatim
    Instruction(String),
    /// Room display replacement, description markers stripped
    Room(RoomUpdate),
    Logout(String),
    NameInvalid(String),
    Shutdown(String),
}

impl Inbound {
    pub fn decode(kind: TopicKind, payload: &[u8]) -> Result<Inbound, SessionError> {
        let text = || String::from_utf8_lossy(payload).into_owned();
        Ok(match kind {
            TopicKind::Broadcast | TopicKind::PlayerUpdate => Inbound::Update(strip_markers(&text())),
            TopicKind::Instructions => Inbound::Instruction(text()),
            TopicKind::RoomUpdate => {
                let mut room: RoomUpdate =
                    serde_json::from_slice(payload).map_err(SessionError::MalformedRoomUpdate)?;
                room.description = room.description.map(|d| strip_markers(&d));
                Inbound::Room(room)
            }
            TopicKind::Logout => Inbound::Logout(text()),
            TopicKind::NameInvalid => Inbound::NameInvalid(text()),
            TopicKind::Shutdown => Inbound::Shutdown(text()),
        })
    }
}
