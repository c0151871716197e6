//! Notifications received on the control-plane (lobby) socket.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::ParseError;

/// Discriminator of the "new session available" notification.
pub const MATCH_AVAILABLE: &str = "match-available";

/// A recognized control-plane notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlNotification {
    /// A match is ready; dial `url` and present `jwt`.
    MatchAvailable {
        /// Websocket URL of the session server.
        url: String,
        /// Short-lived credential for the session socket.
        jwt: String,
    },
}

#[derive(Deserialize)]
struct MatchAvailableBody {
    url: String,
    jwt: String,
}

impl ControlNotification {
    /// Interpret a control-plane object.
    ///
    /// Unrecognized discriminators are [`ParseError::UnknownType`]; the
    /// registry logs and ignores those.
    pub fn parse(body: &Map<String, Value>) -> Result<Self, ParseError> {
        let packet_type = match body.get("type") {
            None => return Err(ParseError::MissingType),
            Some(Value::String(t)) => t.as_str(),
            Some(_) => return Err(ParseError::TypeNotString),
        };

        match packet_type {
            MATCH_AVAILABLE => {
                let parsed: MatchAvailableBody = serde_json::from_value(Value::Object(body.clone()))
                    .map_err(|source| ParseError::Invalid {
                        packet_type: packet_type.to_owned(),
                        source,
                    })?;
                Ok(Self::MatchAvailable {
                    url: parsed.url,
                    jwt: parsed.jwt,
                })
            }
            other => Err(ParseError::UnknownType(other.to_owned())),
        }
    }
}
