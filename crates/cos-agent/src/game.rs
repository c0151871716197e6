//! Example session handler.
//!
//! Logs chat with author names, follows the visible world, and says hello
//! to everyone nearby every few seconds once the game has synced.

use std::time::Duration;

use async_trait::async_trait;
use cos_core::SessionUid;
use cos_protocol::{ClientPacket, ServerPacket};
use cos_transport::{ConnectionSender, SessionHandler};
use tracing::{debug, info};

use crate::chat::ChatBook;
use crate::world::{World, WorldEvent};

/// Time between greetings.
pub const HELLO_INTERVAL: Duration = Duration::from_secs(5);

/// What the example says.
pub const HELLO_TEXT: &str = "hello world!";

/// One running match.
pub struct ExampleGame {
    uid: SessionUid,
    sender: ConnectionSender,
    chat: ChatBook,
    world: World,
    until_hello: Duration,
}

impl ExampleGame {
    /// Create the handler for a new session.
    pub fn new(uid: SessionUid, sender: ConnectionSender) -> Self {
        Self {
            uid,
            sender,
            chat: ChatBook::default(),
            world: World::default(),
            until_hello: HELLO_INTERVAL,
        }
    }
}

#[async_trait]
impl SessionHandler for ExampleGame {
    async fn on_message(&mut self, packet: ServerPacket) {
        self.chat.apply(&packet);
        for event in self.world.apply(&packet) {
            match event {
                WorldEvent::SelfLoaded(uid) => {
                    info!(session_id = %self.uid, %uid, "player loaded");
                }
                WorldEvent::SelfLost(uid) => {
                    info!(session_id = %self.uid, %uid, "player lost");
                }
                WorldEvent::ControllableLoaded(uid) => {
                    info!(session_id = %self.uid, %uid, "controllable object loaded");
                }
                WorldEvent::ControllableLost(uid) => {
                    info!(session_id = %self.uid, %uid, "controllable object lost");
                }
            }
        }

        if let (ServerPacket::ChatMessage(_), Some(line)) = (&packet, self.chat.last()) {
            info!(
                session_id = %self.uid,
                game_time = line.game_time,
                author = %line.author_name,
                author_uid = %line.author_uid,
                text = %line.text,
                "chat message"
            );
        }
    }

    async fn on_disconnected(&mut self) {
        info!(
            session_id = %self.uid,
            game_time = self.world.game_time(),
            chat_authors = self.chat.len(),
            chat_lines = self.chat.history().count(),
            players = self.world.player_count(),
            smart_objects = self.world.smart_object_count(),
            objects = self.world.object_count(),
            resources = self.world.resource_count(),
            "game over"
        );
    }

    async fn on_tick(&mut self, elapsed: Duration) {
        if !self.world.is_synced() {
            return;
        }

        self.until_hello = self.until_hello.saturating_sub(elapsed);
        if self.until_hello.is_zero() {
            self.until_hello = HELLO_INTERVAL;
            let hello = ClientPacket::send_local_message(HELLO_TEXT);
            if let Err(e) = self.sender.send_packet(&hello).await {
                debug!(session_id = %self.uid, error = %e, "hello not sent");
            }
        }
    }
}
