//! # cos-core
//!
//! Foundation types shared by every cos crate:
//!
//! - **Branded IDs**: [`SessionUid`] as a newtype so session identifiers are
//!   never confused with arbitrary strings
//! - **Backoff**: [`BackoffPolicy`] and [`BackoffState`] for the supervisory
//!   retry schedule
//! - **Roles**: [`Role`], the role an AI personality plays in a match
//! - **Constants**: server locations and transport timeouts
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod backoff;
pub mod constants;
pub mod ids;
pub mod logging;
pub mod role;

pub use backoff::{BackoffPolicy, BackoffState};
pub use ids::{SessionUid, secure_token};
pub use role::Role;
