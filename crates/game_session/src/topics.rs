//! Topic names and outbound request payloads.
//!
//! Two generations of the game server speak slightly different dialects: the
//! broadcast root, the registration and action subjects, and the id/input
//! field names differ. Everything else is shared.

use crate::error::SessionError;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Topic naming scheme used by the game server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// `game_update`, `set_player_name`, `player_action`
    #[default]
    Game,
    /// `world_update`, `set_user_name`, `user_action`
    World,
}

#[derive(Serialize)]
#[serde(untagged)]
enum NameRequest<'a> {
    Player { name: &'a str, player_id: &'a str },
    User { name: &'a str, user_id: &'a str },
}

#[derive(Serialize)]
#[serde(untagged)]
enum ActionRequest<'a> {
    Player {
        player_id: &'a str,
        player_input: &'a str,
    },
    User {
        user_id: &'a str,
        user_input: &'a str,
    },
}

impl Dialect {
    /// Broadcast subject; player updates live at `<root>.<id>`.
    pub fn update_root(self) -> &'static str {
        match self {
            Dialect::Game => "game_update",
            Dialect::World => "world_update",
        }
    }

    pub fn name_topic(self) -> &'static str {
        match self {
            Dialect::Game => "set_player_name",
            Dialect::World => "set_user_name",
        }
    }

    pub fn action_topic(self) -> &'static str {
        match self {
            Dialect::Game => "player_action",
            Dialect::World => "user_action",
        }
    }

    /// JSON body announcing `identity` to the game server.
    ///
    /// # Returns
    ///
    /// `{"name", "player_id"}` for [`Dialect::Game`] and
    /// `{"name", "user_id"}` for [`Dialect::World`].
    pub fn name_request(self, identity: &Identity) -> Result<Vec<u8>, SessionError> {
        let name = identity.display_name();
        let id = identity.id();
        let request = match self {
            Dialect::Game => NameRequest::Player {
                name,
                player_id: id,
            },
            Dialect::World => NameRequest::User { name, user_id: id },
        };
        Ok(serde_json::to_vec(&request)?)
    }

    /// JSON body carrying one line of player input.
    ///
    /// # Arguments
    ///
    /// * `identity` - The signed-in player
    /// * `input` - Input line, sent as typed
    pub fn action_request(self, identity: &Identity, input: &str) -> Result<Vec<u8>, SessionError> {
        let id = identity.id();
        let request = match self {
            Dialect::Game => ActionRequest::Player {
                player_id: id,
                player_input: input,
            },
            Dialect::World => ActionRequest::User {
                user_id: id,
                user_input: input,
            },
        };
        Ok(serde_json::to_vec(&request)?)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Game => f.write_str("game"),
            Dialect::World => f.write_str("world"),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "game" => Ok(Dialect::Game),
            "world" => Ok(Dialect::World),
            other => Err(format!("Unknown dialect '{other}' (expected 'game' or 'world')")),
        }
    }
}

/// One member of a player's subscription group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Broadcast,
    PlayerUpdate,
    Instructions,
    RoomUpdate,
    Logout,
    NameInvalid,
    Shutdown,
}

impl TopicKind {
    /// Every topic a signed-in player listens on, in subscription order.
    pub const ALL: [TopicKind; 7] = [
        TopicKind::Broadcast,
        TopicKind::PlayerUpdate,
        TopicKind::Instructions,
        TopicKind::RoomUpdate,
        TopicKind::Logout,
        TopicKind::NameInvalid,
        TopicKind::Shutdown,
    ];

    /// Subject of this topic for player `id`. Broadcast and shutdown topics
    /// ignore the id.
    pub fn subject(self, dialect: Dialect, id: &str) -> String {
        match self {
            TopicKind::Broadcast => dialect.update_root().to_string(),
            TopicKind::PlayerUpdate => format!("{}.{}", dialect.update_root(), id),
            TopicKind::Instructions => format!("instructions.{id}"),
            TopicKind::RoomUpdate => format!("room_update.{id}"),
            TopicKind::Logout => format!("logout.{id}"),
            TopicKind::NameInvalid => format!("name_invalid.{id}"),
            TopicKind::Shutdown => "shutdown".to_string(),
        }
    }
}
