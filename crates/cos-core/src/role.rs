//! Roles a participant can play in a match.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The role a player fulfils. Every player has exactly one role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Unset role; indicates a bug upstream.
    #[default]
    Invalid,
    /// Human players.
    Player,
    /// AI controlling the team's fiscal policy.
    Economy,
    /// AI controlling defense and foreign policy.
    Military,
    /// AI controlling scientific policy.
    Science,
}

impl Role {
    /// Wire name of the role.
    pub fn name(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Player => "player",
            Self::Economy => "economy",
            Self::Military => "military",
            Self::Science => "science",
        }
    }

    /// Parse a wire name. Unknown names map to [`Role::Invalid`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "player" => Self::Player,
            "economy" => Self::Economy,
            "military" => Self::Military,
            "science" => Self::Science,
            _ => Self::Invalid,
        }
    }

    /// Whether this role is played by an AI personality.
    pub fn is_ai(self) -> bool {
        matches!(self, Self::Economy | Self::Military | Self::Science)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
