//! # cos-protocol
//!
//! Wire vocabulary shared by the transport and by session handlers:
//!
//! - [`ServerPacket`]: typed messages received on a session socket
//! - [`ClientPacket`]: messages a handler sends back, tagged automatically
//! - [`ControlNotification`]: notifications on the control-plane socket
//! - [`PacketRegistry`]: maps a `type` discriminator to its parser; built
//!   once at startup and shared by reference
//!
//! Every structured object on the wire carries a string `type` field. A
//! frame holds either one object or an array of objects.

#![deny(unsafe_code)]

pub mod client;
pub mod control;
pub mod errors;
pub mod registry;
pub mod server;

pub use client::{ClientPacket, MAX_COMMAND_LEN, MAX_LOCAL_MESSAGE_LEN};
pub use control::ControlNotification;
pub use errors::ParseError;
pub use registry::{PacketParser, PacketRegistry, passthrough};
pub use server::{
    ChatAuthor, ChatAuthorAdded, ChatAuthorRemoved, ChatAuthorUpdate, ChatMessage,
    GameObjectAdded, GameObjectRemoved, GameObjectSync, GameObjectUpdate, GameSync,
    GameSyncPlayer, GameSyncTeam, PlayerAdded, PlayerSync, ServerPacket, Shape, SmartObjectAdded,
    SmartObjectSync, SmartObjectUpdate, TeamResourceChanged, Vector,
};
