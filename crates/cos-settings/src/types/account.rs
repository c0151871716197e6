//! Account, AI personality, and API endpoint settings.

use std::fmt;

use cos_core::Role;
use cos_core::constants::{API_BASE, WEBSOCKET_ORIGIN};
use serde::{Deserialize, Serialize};

/// Credentials used to log in against the auth endpoint.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountSettings {
    /// Account email.
    pub email: String,
    /// Identifier of the password-authentication grant.
    pub grant_iden: String,
    /// Grant secret.
    pub secret: String,
}

impl AccountSettings {
    /// Whether all three credential fields are filled in.
    pub fn is_complete(&self) -> bool {
        !self.email.is_empty() && !self.grant_iden.is_empty() && !self.secret.is_empty()
    }
}

impl fmt::Debug for AccountSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSettings")
            .field("email", &self.email)
            .field("grant_iden", &self.grant_iden)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// The AI personality being queued with the lobby.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiSettings {
    /// Display name of the personality.
    pub name: String,
    /// Stable unique identifier of the personality.
    pub uid: String,
    /// Semantic version of the personality.
    pub version: String,
    /// Role this personality plays.
    pub role: Role,
    /// User uids allowed to select this personality. Empty allows anyone.
    pub client_allow_list: Vec<String>,
    /// Maximum number of matches this machine plays at once.
    pub max_concurrent_instances: u32,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            name: "ExampleAI".to_string(),
            uid: "example-ai".to_string(),
            version: "0.0.1".to_string(),
            role: Role::Economy,
            client_allow_list: Vec::new(),
            max_concurrent_instances: 2,
        }
    }
}

/// HTTP API and websocket origin.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL for HTTP endpoints (no trailing slash).
    pub base_url: String,
    /// `Origin` header sent when dialing websockets.
    pub websocket_origin: String,
    /// Timeout for a single HTTP request in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: API_BASE.to_string(),
            websocket_origin: WEBSOCKET_ORIGIN.to_string(),
            request_timeout_ms: 30_000,
        }
    }
}
