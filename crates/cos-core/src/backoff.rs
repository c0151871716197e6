//! Retry backoff configuration and state.
//!
//! The supervisory loop is the only place that retries anything. It keeps one
//! [`BackoffState`] per collaborator (login, lobby request) and asks it for
//! the next sleep after each failure:
//!
//! - [`BackoffPolicy`]: base delay and the exponent cap
//! - [`BackoffState`]: consecutive-failure counter, reset on success
//!
//! Delay for the n-th consecutive failure (1-based) is
//! `base * 2^min(n - 1, max_exponent)`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(60);
/// Default exponent cap (maximum single sleep is `16 * base`).
pub const DEFAULT_MAX_EXPONENT: u32 = 4;

/// Exponential backoff schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Largest exponent applied to `base`.
    pub max_exponent: u32,
}

impl BackoffPolicy {
    /// Create a policy.
    pub fn new(base: Duration, max_exponent: u32) -> Self {
        Self { base, max_exponent }
    }

    /// Delay for a zero-based attempt index.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_exponent).min(31);
        self.base.saturating_mul(1u32 << exponent)
    }

    /// The largest delay this policy ever produces.
    pub fn max_delay(&self) -> Duration {
        self.delay(self.max_exponent)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_EXPONENT)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Consecutive-failure tracking for one retried operation.
#[derive(Clone, Debug, Default)]
pub struct BackoffState {
    policy: BackoffPolicy,
    failures: u32,
}

impl BackoffState {
    /// Start with zero failures.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Record a failure and return how long to sleep before retrying.
    pub fn record_failure(&mut self) -> Duration {
        let delay = self.policy.delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Forget all failures (call on success).
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// The policy driving this state.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
