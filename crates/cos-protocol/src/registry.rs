//! Packet registry: maps a `type` discriminator to its parser.
//!
//! Build one with [`PacketRegistry::with_defaults`] at startup, add any
//! extra parsers with [`PacketRegistry::register`], then share it by
//! reference (typically behind an `Arc`) with every session driver.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::ParseError;
use crate::server::{
    ChatAuthorAdded, ChatAuthorRemoved, ChatAuthorUpdate, ChatMessage, GameObjectAdded,
    GameObjectRemoved, GameObjectUpdate, GameSync, PlayerAdded, ServerPacket, SmartObjectAdded,
    SmartObjectUpdate, TeamResourceChanged,
};

/// Turns the body of one packet (discriminator already checked) into a
/// typed packet.
pub type PacketParser = fn(&Map<String, Value>) -> Result<ServerPacket, serde_json::Error>;

/// Registry mapping packet types to parsers.
#[derive(Clone)]
pub struct PacketRegistry {
    parsers: HashMap<String, PacketParser>,
}

impl PacketRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Create a registry holding every built-in server packet.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("chat-message", decode::<ChatMessage>);
        registry.register("chat-author-added", decode::<ChatAuthorAdded>);
        registry.register("chat-author-update", decode::<ChatAuthorUpdate>);
        registry.register("chat-author-removed", decode::<ChatAuthorRemoved>);
        registry.register("game-object-added", decode::<GameObjectAdded>);
        registry.register("game-object-update", decode::<GameObjectUpdate>);
        registry.register("game-object-removed", decode::<GameObjectRemoved>);
        registry.register("smart-object-added", decode::<SmartObjectAdded>);
        registry.register("smart-object-update", decode::<SmartObjectUpdate>);
        registry.register("player-added", decode::<PlayerAdded>);
        registry.register("team-resource-changed", decode::<TeamResourceChanged>);
        registry.register("game-sync", decode::<GameSync>);
        registry
    }

    /// Register (or replace) the parser for a packet type.
    pub fn register(&mut self, packet_type: &str, parser: PacketParser) {
        let _ = self.parsers.insert(packet_type.to_owned(), parser);
    }

    /// Check whether a packet type is registered.
    pub fn has_type(&self, packet_type: &str) -> bool {
        self.parsers.contains_key(packet_type)
    }

    /// List all registered packet types (sorted).
    pub fn types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.parsers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Parse one structured object.
    pub fn parse(&self, body: &Map<String, Value>) -> Result<ServerPacket, ParseError> {
        let packet_type = match body.get("type") {
            None => return Err(ParseError::MissingType),
            Some(Value::String(t)) => t,
            Some(_) => return Err(ParseError::TypeNotString),
        };

        let Some(parser) = self.parsers.get(packet_type) else {
            return Err(ParseError::UnknownType(packet_type.clone()));
        };

        parser(body).map_err(|source| ParseError::Invalid {
            packet_type: packet_type.clone(),
            source,
        })
    }

    /// Parse a JSON value that must be an object.
    pub fn parse_value(&self, value: &Value) -> Result<ServerPacket, ParseError> {
        match value {
            Value::Object(body) => self.parse(body),
            _ => Err(ParseError::NotAnObject),
        }
    }

    /// Parse a whole text frame: one object or an array of objects.
    ///
    /// Fails on the first invalid element.
    pub fn parse_frame(&self, frame: &str) -> Result<Vec<ServerPacket>, ParseError> {
        let value: Value = serde_json::from_str(frame).map_err(ParseError::Json)?;
        match value {
            Value::Array(items) => items.iter().map(|item| self.parse_value(item)).collect(),
            Value::Object(body) => Ok(vec![self.parse(&body)?]),
            _ => Err(ParseError::NotAnObject),
        }
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRegistry")
            .field("types", &self.types())
            .finish()
    }
}

/// Parser that keeps the body untouched as [`ServerPacket::Other`].
///
/// Register it for packet types a handler wants to see without a typed
/// decoder.
pub fn passthrough(body: &Map<String, Value>) -> Result<ServerPacket, serde_json::Error> {
    let packet_type = body
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    Ok(ServerPacket::Other {
        packet_type,
        body: body.clone(),
    })
}

fn decode<T>(body: &Map<String, Value>) -> Result<ServerPacket, serde_json::Error>
where
    T: DeserializeOwned + Into<ServerPacket>,
{
    let typed: T = serde_json::from_value(Value::Object(body.clone()))?;
    Ok(typed.into())
}
