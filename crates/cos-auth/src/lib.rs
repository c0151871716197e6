//! # cos-auth
//!
//! HTTP collaborators of the supervisory loop:
//!
//! - [`ApiClient::login`]: exchange account credentials for an [`AuthToken`]
//! - [`ApiClient::request_lobby_endpoint`]: queue the AI personality and get
//!   back the control-plane socket URL and its credential
//!
//! Both are plain request/response calls with no retry; retry policy lives in
//! the supervisor.

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod token;

pub use client::{ApiClient, LobbyEndpoint};
pub use errors::AuthError;
pub use token::AuthToken;
