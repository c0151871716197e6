//! Packets a session handler sends to the game server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::server::Vector;

/// Longest local chat message the server accepts, in bytes.
pub const MAX_LOCAL_MESSAGE_LEN: usize = 4096;

/// Longest command text the server reads, in bytes.
pub const MAX_COMMAND_LEN: usize = 4096;

/// A client packet. The `type` tag is filled in by serialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientPacket {
    /// Say something to everyone nearby.
    SendLocalMessage {
        /// Message text.
        text: String,
    },
    /// Start moving a unit in a direction.
    Move {
        /// Uid of the unit to move.
        uid: String,
        /// Direction of travel.
        dir: Vector,
    },
    /// Have one unit mine another object.
    Mine {
        /// Uid of the unit doing the mining.
        mining_uid: String,
        /// Uid of the object being mined.
        mined_uid: String,
    },
    /// Economy role: place the team's tent.
    CreateTent {
        /// Where to place it.
        location: Vector,
    },
    /// Science role: build a laboratory nearby.
    CreateLaboratory {
        /// Where to place it.
        location: Vector,
    },
    /// Give an order to a smart object the player controls.
    IssueSmartObjectOrder {
        /// Uid of the smart object.
        uid: String,
        /// The order, interpreted according to the object's unit type.
        order: Map<String, Value>,
    },
    /// Run a text command; the server ignores the first character.
    SendCommand {
        /// Command text, prefix included.
        text: String,
    },
}

impl ClientPacket {
    /// Build a `send-local-message`, truncating overlong text on a char
    /// boundary.
    pub fn send_local_message(text: impl Into<String>) -> Self {
        Self::SendLocalMessage {
            text: truncated(text.into(), MAX_LOCAL_MESSAGE_LEN),
        }
    }

    /// Build a `send-command`, truncating overlong text on a char boundary.
    pub fn send_command(text: impl Into<String>) -> Self {
        Self::SendCommand {
            text: truncated(text.into(), MAX_COMMAND_LEN),
        }
    }

    /// Build a `create-tent` packet.
    pub fn create_tent(location: Vector) -> Self {
        Self::CreateTent { location }
    }

    /// Build a `create-laboratory` packet.
    pub fn create_laboratory(location: Vector) -> Self {
        Self::CreateLaboratory { location }
    }

    /// Build an `issue-smart-object-order` packet.
    pub fn issue_smart_object_order(uid: impl Into<String>, order: Map<String, Value>) -> Self {
        Self::IssueSmartObjectOrder {
            uid: uid.into(),
            order,
        }
    }

    /// Build a `move` packet.
    pub fn move_unit(uid: impl Into<String>, dir: Vector) -> Self {
        Self::Move {
            uid: uid.into(),
            dir,
        }
    }

    /// Build a `mine` packet.
    pub fn mine(mining_uid: impl Into<String>, mined_uid: impl Into<String>) -> Self {
        Self::Mine {
            mining_uid: mining_uid.into(),
            mined_uid: mined_uid.into(),
        }
    }

    /// The wire discriminator.
    pub fn packet_type(&self) -> &'static str {
        match self {
            Self::SendLocalMessage { .. } => "send-local-message",
            Self::Move { .. } => "move",
            Self::Mine { .. } => "mine",
            Self::CreateTent { .. } => "create-tent",
            Self::CreateLaboratory { .. } => "create-laboratory",
            Self::IssueSmartObjectOrder { .. } => "issue-smart-object-order",
            Self::SendCommand { .. } => "send-command",
        }
    }

    /// Serialize to a JSON object.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

fn truncated(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
