//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. Types marked with `#[serde(default)]`
//! allow partial JSON, so missing fields get their default value.

mod account;
mod runtime;

pub use account::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the cos client.
///
/// ```json
/// {
///   "account": { "email": "me@example.com", "grantIden": "pa_xyz" },
///   "ai": { "name": "ExampleAI", "role": "military" },
///   "session": { "tickRateHz": 30 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CosSettings {
    /// Login credentials.
    pub account: AccountSettings,
    /// The AI personality to queue.
    pub ai: AiSettings,
    /// HTTP API location.
    pub api: ApiSettings,
    /// Socket timeouts and queue capacities.
    pub transport: TransportSettings,
    /// Tick rate and staleness policy.
    pub session: SessionSettings,
    /// Supervisory backoff.
    pub retry: RetrySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl CosSettings {
    /// Reject values that would stall or busy-loop the runtime.
    pub fn validate(&self) -> Result<()> {
        if self.session.tick_rate_hz == 0 {
            return Err(SettingsError::InvalidValue(
                "session.tickRateHz must be positive".to_string(),
            ));
        }
        if self.transport.batch_limit == 0 {
            return Err(SettingsError::InvalidValue(
                "transport.batchLimit must be positive".to_string(),
            ));
        }
        if self.transport.read_timeout_ms == 0 || self.transport.write_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "transport timeouts must be positive".to_string(),
            ));
        }
        let capacities = [
            self.transport.outbound_capacity,
            self.transport.control_inbound_capacity,
            self.transport.session_inbound_capacity,
            self.transport.completion_capacity,
        ];
        if capacities.contains(&0) {
            return Err(SettingsError::InvalidValue(
                "transport queue capacities must be positive".to_string(),
            ));
        }
        if self.ai.max_concurrent_instances == 0 {
            return Err(SettingsError::InvalidValue(
                "ai.maxConcurrentInstances must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
