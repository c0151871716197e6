//! Packets sent by the game server on a session socket.
//!
//! Bodies are decoded leniently: missing fields take their zero value and
//! numeric fields also accept numeric strings, matching what the server
//! emits. Embedded shapes (an author inside an author packet, a game object
//! inside a smart object) are flattened into the parent body. Large nested
//! state in [`GameSync`] and unit-specific `additional` data stay as raw
//! JSON.

use std::collections::HashMap;

use cos_core::Role;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Shared shapes
// ─────────────────────────────────────────────────────────────────────────────

/// A 2d float vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    /// X coordinate.
    #[serde(deserialize_with = "lenient_f64")]
    pub x: f64,
    /// Y coordinate.
    #[serde(deserialize_with = "lenient_f64")]
    pub y: f64,
}

/// Something the player can chat with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatAuthor {
    /// Chat author uid.
    pub uid: String,
    /// Display name.
    pub name: String,
    /// Display color.
    pub color: String,
    /// Extra CSS-ish classes for rendering.
    pub bonus_classes: Vec<String>,
}

/// A collision shape attached to a game object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Shape {
    /// Shape kind, such as `polygon` or `circle`.
    pub shape_type: String,
    /// Mass in arbitrary units.
    #[serde(deserialize_with = "lenient_f64")]
    pub mass: f64,
    /// Kind-specific details, kept raw.
    pub details: Value,
}

/// Everything needed to render and simulate one game object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameObjectSync {
    /// Game object uid.
    pub uid: String,
    /// Sprite sheet location.
    pub sheet_url: String,
    /// Sprite scale per axis.
    pub sprite_scale: Vector,
    /// Sprite rotation in radians, relative to the body.
    #[serde(deserialize_with = "lenient_f64")]
    pub sprite_rotation: f64,
    /// Offset between the body and the sprite.
    pub render_offset: Vector,
    /// Current animation name.
    pub animation: String,
    /// Animation playback speed multiplier.
    #[serde(deserialize_with = "lenient_f64")]
    pub animation_speed: f64,
    /// Whether the animation is playing.
    pub animation_playing: bool,
    /// Whether the animation loops.
    pub animation_looping: bool,
    /// Collision shapes.
    pub shapes: Vec<Shape>,
    /// World position.
    pub position: Vector,
    /// Linear velocity.
    pub velocity: Vector,
    /// Rotation in radians.
    #[serde(deserialize_with = "lenient_f64")]
    pub rotation: f64,
    /// Angular velocity in radians per second.
    #[serde(deserialize_with = "lenient_f64")]
    pub angular_velocity: f64,
}

/// A game object that some team and role can give orders to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartObjectSync {
    /// The underlying game object.
    #[serde(flatten)]
    pub object: GameObjectSync,
    /// Unit type, which decides the orders it understands.
    pub unit_type: String,
    /// Current health.
    #[serde(deserialize_with = "lenient_i64")]
    pub current_health: i64,
    /// Maximum health.
    #[serde(deserialize_with = "lenient_i64")]
    pub max_health: i64,
    /// Team in control of the object.
    #[serde(deserialize_with = "lenient_i64")]
    pub controlling_team: i64,
    /// Role in control of the object.
    pub controlling_role: String,
    /// Unit-type specific state, kept raw.
    pub additional: Value,
}

impl SmartObjectSync {
    /// The controlling role; unknown names map to [`Role::Invalid`].
    pub fn controlling_role(&self) -> Role {
        Role::from_name(&self.controlling_role)
    }
}

/// A player's game object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSync {
    /// The underlying game object.
    #[serde(flatten)]
    pub object: GameObjectSync,
    /// Role name as sent by the server.
    pub role: String,
    /// Team number.
    #[serde(deserialize_with = "lenient_i64")]
    pub team: i64,
}

impl PlayerSync {
    /// The player's role; unknown names map to [`Role::Invalid`].
    pub fn role(&self) -> Role {
        Role::from_name(&self.role)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Packets
// ─────────────────────────────────────────────────────────────────────────────

/// `chat-message`: a new message from someone nearby or from the server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// Unix time the message was received by the server.
    #[serde(deserialize_with = "lenient_f64")]
    pub time: f64,
    /// Uid of the chat author who sent it.
    pub author_uid: String,
    /// Untrusted message text.
    pub text: String,
}

/// `chat-author-added`: a new chat author came into range.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatAuthorAdded {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// The author.
    #[serde(flatten)]
    pub author: ChatAuthor,
}

/// `chat-author-removed`: a chat author is no longer reachable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatAuthorRemoved {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// Uid of the removed author.
    pub uid: String,
}

/// `chat-author-update`: a reachable chat author changed name or style.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatAuthorUpdate {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// The author's new state.
    #[serde(flatten)]
    pub author: ChatAuthor,
}

/// `game-object-added`: a generic game object came into vision.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameObjectAdded {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// The new object.
    pub object: GameObjectSync,
}

/// `game-object-update`: movement or animation of a visible object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameObjectUpdate {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// Uid of the updated object.
    pub uid: String,
    /// World position.
    pub position: Vector,
    /// Linear velocity.
    pub velocity: Vector,
    /// Rotation in radians.
    #[serde(deserialize_with = "lenient_f64")]
    pub rotation: f64,
    /// Angular velocity in radians per second.
    #[serde(deserialize_with = "lenient_f64")]
    pub angular_velocity: f64,
    /// Current animation name.
    pub animation: String,
    /// Whether the animation is playing.
    pub animation_playing: bool,
    /// Whether the animation loops.
    pub animation_looping: bool,
}

/// `smart-object-added`: a smart object came into vision.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartObjectAdded {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// The new object.
    pub object: SmartObjectSync,
}

/// `smart-object-update`: a smart object moved or changed state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartObjectUpdate {
    /// Movement and animation, as for a generic object.
    #[serde(flatten)]
    pub update: GameObjectUpdate,
    /// Current health.
    #[serde(deserialize_with = "lenient_i64")]
    pub current_health: i64,
    /// Unit-type specific state, kept raw.
    pub additional: Value,
}

/// `player-added`: a player came into vision.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerAdded {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// The new player.
    pub object: PlayerSync,
}

/// `game-object-removed`: a game object left vision or was destroyed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameObjectRemoved {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// Uid of the removed object.
    pub uid: String,
}

/// `team-resource-changed`: the team's resource totals changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamResourceChanged {
    /// Game time the packet was sent at.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// New totals keyed by resource uid.
    pub resources: HashMap<String, i64>,
}

/// The local player as described by [`GameSync`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSyncPlayer {
    /// Uid of the player's primary game object.
    pub uid: String,
    /// Team number.
    pub team: i64,
    /// Role name as sent by the server.
    pub role: String,
}

impl GameSyncPlayer {
    /// The player's role; unknown names map to [`Role::Invalid`].
    pub fn role(&self) -> Role {
        Role::from_name(&self.role)
    }
}

/// The local team as described by [`GameSync`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSyncTeam {
    /// Resource totals keyed by resource uid.
    pub resources: HashMap<String, i64>,
}

/// `game-sync`: the full state a fresh client needs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSync {
    /// Game time in fractional seconds.
    #[serde(deserialize_with = "lenient_f64")]
    pub game_time: f64,
    /// The local player.
    pub player: GameSyncPlayer,
    /// The local player's team.
    pub team: GameSyncTeam,
    /// Resources in the game keyed by resource uid.
    pub resources: Map<String, Value>,
    /// Visible players keyed by game object uid.
    pub players: Map<String, Value>,
    /// Visible dumb objects keyed by game object uid.
    pub dumb_objects: Map<String, Value>,
    /// Visible smart objects keyed by game object uid.
    pub smart_objects: Map<String, Value>,
    /// Reachable chat authors keyed by uid, including the player.
    pub chat_authors: HashMap<String, ChatAuthor>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ServerPacket
// ─────────────────────────────────────────────────────────────────────────────

/// A typed server packet.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerPacket {
    /// `chat-message`
    ChatMessage(ChatMessage),
    /// `chat-author-added`
    ChatAuthorAdded(ChatAuthorAdded),
    /// `chat-author-update`
    ChatAuthorUpdate(ChatAuthorUpdate),
    /// `chat-author-removed`
    ChatAuthorRemoved(ChatAuthorRemoved),
    /// `game-object-added`
    GameObjectAdded(Box<GameObjectAdded>),
    /// `game-object-update`
    GameObjectUpdate(GameObjectUpdate),
    /// `smart-object-added`
    SmartObjectAdded(Box<SmartObjectAdded>),
    /// `smart-object-update`
    SmartObjectUpdate(SmartObjectUpdate),
    /// `player-added`
    PlayerAdded(Box<PlayerAdded>),
    /// `game-object-removed`
    GameObjectRemoved(GameObjectRemoved),
    /// `team-resource-changed`
    TeamResourceChanged(TeamResourceChanged),
    /// `game-sync`
    GameSync(Box<GameSync>),
    /// A packet produced by a parser registered at runtime.
    Other {
        /// Discriminator.
        packet_type: String,
        /// Full body, including `type`.
        body: Map<String, Value>,
    },
}

impl ServerPacket {
    /// The wire discriminator of this packet.
    pub fn packet_type(&self) -> &str {
        match self {
            Self::ChatMessage(_) => "chat-message",
            Self::ChatAuthorAdded(_) => "chat-author-added",
            Self::ChatAuthorUpdate(_) => "chat-author-update",
            Self::ChatAuthorRemoved(_) => "chat-author-removed",
            Self::GameObjectAdded(_) => "game-object-added",
            Self::GameObjectUpdate(_) => "game-object-update",
            Self::SmartObjectAdded(_) => "smart-object-added",
            Self::SmartObjectUpdate(_) => "smart-object-update",
            Self::PlayerAdded(_) => "player-added",
            Self::GameObjectRemoved(_) => "game-object-removed",
            Self::TeamResourceChanged(_) => "team-resource-changed",
            Self::GameSync(_) => "game-sync",
            Self::Other { packet_type, .. } => packet_type,
        }
    }

    /// Game time stamped on the packet, if it carries one.
    pub fn game_time(&self) -> Option<f64> {
        match self {
            Self::ChatMessage(p) => Some(p.game_time),
            Self::ChatAuthorAdded(p) => Some(p.game_time),
            Self::ChatAuthorUpdate(p) => Some(p.game_time),
            Self::ChatAuthorRemoved(p) => Some(p.game_time),
            Self::GameObjectAdded(p) => Some(p.game_time),
            Self::GameObjectUpdate(p) => Some(p.game_time),
            Self::SmartObjectAdded(p) => Some(p.game_time),
            Self::SmartObjectUpdate(p) => Some(p.update.game_time),
            Self::PlayerAdded(p) => Some(p.game_time),
            Self::GameObjectRemoved(p) => Some(p.game_time),
            Self::TeamResourceChanged(p) => Some(p.game_time),
            Self::GameSync(p) => Some(p.game_time),
            Self::Other { body, .. } => body.get("game_time").and_then(Value::as_f64),
        }
    }
}

impl From<ChatMessage> for ServerPacket {
    fn from(p: ChatMessage) -> Self {
        Self::ChatMessage(p)
    }
}

impl From<ChatAuthorAdded> for ServerPacket {
    fn from(p: ChatAuthorAdded) -> Self {
        Self::ChatAuthorAdded(p)
    }
}

impl From<ChatAuthorUpdate> for ServerPacket {
    fn from(p: ChatAuthorUpdate) -> Self {
        Self::ChatAuthorUpdate(p)
    }
}

impl From<GameObjectAdded> for ServerPacket {
    fn from(p: GameObjectAdded) -> Self {
        Self::GameObjectAdded(Box::new(p))
    }
}

impl From<GameObjectUpdate> for ServerPacket {
    fn from(p: GameObjectUpdate) -> Self {
        Self::GameObjectUpdate(p)
    }
}

impl From<SmartObjectAdded> for ServerPacket {
    fn from(p: SmartObjectAdded) -> Self {
        Self::SmartObjectAdded(Box::new(p))
    }
}

impl From<SmartObjectUpdate> for ServerPacket {
    fn from(p: SmartObjectUpdate) -> Self {
        Self::SmartObjectUpdate(p)
    }
}

impl From<PlayerAdded> for ServerPacket {
    fn from(p: PlayerAdded) -> Self {
        Self::PlayerAdded(Box::new(p))
    }
}

impl From<ChatAuthorRemoved> for ServerPacket {
    fn from(p: ChatAuthorRemoved) -> Self {
        Self::ChatAuthorRemoved(p)
    }
}

impl From<GameObjectRemoved> for ServerPacket {
    fn from(p: GameObjectRemoved) -> Self {
        Self::GameObjectRemoved(p)
    }
}

impl From<TeamResourceChanged> for ServerPacket {
    fn from(p: TeamResourceChanged) -> Self {
        Self::TeamResourceChanged(p)
    }
}

impl From<GameSync> for ServerPacket {
    fn from(p: GameSync) -> Self {
        Self::GameSync(Box::new(p))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lenient numbers
// ─────────────────────────────────────────────────────────────────────────────

/// Accept a JSON number or a string holding one.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Accept a JSON integer or a string holding one.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        String(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(n) => Ok(n),
        IntOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
