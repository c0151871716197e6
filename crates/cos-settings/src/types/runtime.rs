//! Transport, session, retry, and logging settings.

use std::time::Duration;

use cos_core::BackoffPolicy;
use serde::{Deserialize, Serialize};

/// Per-connection socket behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Maximum silence on a socket before it is closed, in milliseconds.
    pub read_timeout_ms: u64,
    /// Maximum duration of a single frame write, in milliseconds.
    pub write_timeout_ms: u64,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Maximum number of queued messages coalesced into one frame.
    pub batch_limit: usize,
    /// Capacity of the control-plane inbound queue.
    pub control_inbound_capacity: usize,
    /// Capacity of a session's inbound queue.
    pub session_inbound_capacity: usize,
    /// Capacity of the registry's session-completion queue.
    pub completion_capacity: usize,
}

impl TransportSettings {
    /// Read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Keepalive ping interval: nine tenths of the smaller timeout.
    pub fn keepalive_interval(&self) -> Duration {
        let smaller = self.read_timeout_ms.min(self.write_timeout_ms);
        Duration::from_millis(smaller.saturating_mul(9) / 10)
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 20_000,
            write_timeout_ms: 20_000,
            outbound_capacity: 128,
            batch_limit: 16,
            control_inbound_capacity: 64,
            session_inbound_capacity: 1024,
            completion_capacity: 16,
        }
    }
}

/// Session driver tick behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Ticks per second delivered to the session handler.
    pub tick_rate_hz: u32,
    /// A tick older than this many tick intervals is dropped.
    pub staleness_multiple: u32,
    /// Minimum spacing between stale-tick warnings, in seconds.
    pub stale_warn_cooldown_secs: u64,
}

impl SessionSettings {
    /// Nominal tick period. A zero rate is treated as one tick per second.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }

    /// Elapsed time beyond which a tick counts as stale.
    pub fn staleness_threshold(&self) -> Duration {
        self.tick_interval()
            .saturating_mul(self.staleness_multiple.max(1))
    }

    /// Stale-tick warning cooldown as a [`Duration`].
    pub fn stale_warn_cooldown(&self) -> Duration {
        Duration::from_secs(self.stale_warn_cooldown_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            staleness_multiple: 5,
            stale_warn_cooldown_secs: 300,
        }
    }
}

/// Supervisory retry schedule.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Delay after the first failure, in seconds.
    pub base_delay_secs: u64,
    /// Largest exponent applied to the base delay.
    pub max_exponent: u32,
    /// Consecutive session-request failures before logging in again.
    pub max_session_request_failures: u32,
    /// Pause between a lost registry and the next login, in seconds.
    pub restart_delay_secs: u64,
}

impl RetrySettings {
    /// Backoff policy for the login and session-request collaborators.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(self.base_delay_secs), self.max_exponent)
    }

    /// Restart delay as a [`Duration`].
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            max_exponent: 4,
            max_session_request_failures: 5,
            restart_delay_secs: 5,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
