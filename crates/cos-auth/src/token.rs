//! Session credential returned by login.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

/// Opaque bearer credential plus an advisory expiry.
///
/// The server may invalidate the token before `expires_at`; callers treat
/// the expiry as a hint only.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    /// Bearer token.
    pub token: String,
    /// When the server says the token expires.
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Build a token from fractional unix seconds.
    pub fn from_unix(token: String, expires_at: f64) -> Self {
        Self {
            token,
            expires_at: time_from_unix(expires_at),
        }
    }

    /// Whether the advisory expiry has passed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn time_from_unix(secs: f64) -> DateTime<Utc> {
    if !secs.is_finite() {
        return DateTime::<Utc>::MIN_UTC;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
