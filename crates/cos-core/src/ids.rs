//! Branded ID newtypes for type safety.
//!
//! Session identifiers are newtype wrappers around `String` so that a session
//! uid is never accidentally passed where a packet field or URL is expected.
//! Fresh uids are random URL-safe tokens, see [`secure_token`].

use std::fmt;

use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::SESSION_UID_BYTES;

/// Generate a URL-safe base64 token from `length` random bytes.
pub fn secure_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE.encode(bytes)
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID.
            #[must_use]
            pub fn generate() -> Self {
                Self(secure_token(SESSION_UID_BYTES))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for one running session (one match instance).
    ///
    /// Also used as the connection identifier of the session's data-plane
    /// socket, so inbound messages and close notifications can be traced
    /// back to the session that owns them.
    SessionUid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_token_is_url_safe() {
        for _ in 0..50 {
            let token = secure_token(23);
            assert!(
                token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='),
                "unexpected char in {token}"
            );
        }
    }

    #[test]
    fn secure_token_length() {
        // 23 bytes -> ceil(23 / 3) * 4 = 32 chars with padding
        assert_eq!(secure_token(23).len(), 32);
        assert_eq!(secure_token(3).len(), 4);
    }

    #[test]
    fn generated_uids_are_unique() {
        let a = SessionUid::generate();
        let b = SessionUid::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn from_str_ref() {
        let id = SessionUid::from("abc-123");
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn deref_to_str() {
        let id = SessionUid::from("hello");
        let s: &str = &id;
        assert_eq!(s, "hello");
    }

    #[test]
    fn display() {
        let id = SessionUid::from("display-me");
        assert_eq!(format!("{id}"), "display-me");
    }

    #[test]
    fn into_string() {
        let id = SessionUid::from("convert");
        let s: String = id.into();
        assert_eq!(s, "convert");
    }

    #[test]
    fn serde_is_transparent() {
        let id = SessionUid::from("serde-test");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"serde-test\"");
        let back: SessionUid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
