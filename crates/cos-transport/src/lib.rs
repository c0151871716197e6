//! # cos-transport
//!
//! Session management and websocket transport for the cos client.
//!
//! - [`Connection`]: owns one websocket; a send task batches outbound
//!   messages and pings, a receive task decodes frames into the inbound queue
//! - [`SessionDriver`]: merges a fixed-rate ticker with parsed packets into
//!   ordered [`SessionHandler`] callbacks
//! - [`Registry`]: watches the control connection, spawns a driver per
//!   `match-available` notification, and drains every driver on exit
//! - [`SupervisoryLoop`]: login and lobby retry policy around the registry
//! - [`connect`]: dialing and the credential/welcome handshake
//!
//! Cancellation flows downward through `CancellationToken`s
//! (supervisor → registry → driver → connection). Failures flow upward as
//! queue notifications; only the supervisor retries.

#![deny(unsafe_code)]

pub mod connect;
pub mod connection;
pub mod driver;
pub mod errors;
pub mod frame;
pub mod registry;
pub mod supervisor;

pub use connect::{SessionConnector, WebSocketConnector, WsStream, connect_lobby, connect_session};
pub use connection::{
    CLOSE_REASON, Connection, ConnectionConfig, ConnectionEvents, ConnectionSender,
    InboundMessage,
};
pub use driver::{
    DriverConfig, HandlerFactory, SessionDriver, SessionHandler, TickClock, TickOutcome,
};
pub use errors::{Result, TransportError};
pub use registry::{Registry, RegistryConfig, RegistryHandle, TerminalReason};
pub use supervisor::{
    ApiAuthenticator, Authenticator, DefaultSupervisoryLoop, LobbyConnection, LobbyRequester,
    SessionRequester, SupervisorConfig, SupervisorHandle, SupervisoryLoop,
};
