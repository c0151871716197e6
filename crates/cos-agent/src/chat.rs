//! Chat authors in range and a bounded history of recent messages.

use std::collections::{HashMap, VecDeque};

use cos_protocol::{ChatAuthor, ServerPacket};

/// Messages kept by [`ChatBook::default`].
pub const CHAT_HISTORY_LEN: usize = 100;

/// One received chat message.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatLine {
    /// Game time the message arrived at.
    pub game_time: f64,
    /// Uid of the author.
    pub author_uid: String,
    /// Author name when the message arrived; `?` if the author was unknown.
    pub author_name: String,
    /// Untrusted message text.
    pub text: String,
}

/// Chat authors currently in range, keyed by uid, plus recent messages.
///
/// Each history line keeps the author's name as it was when the message
/// arrived, so lines stay readable after the author leaves range.
#[derive(Clone, Debug)]
pub struct ChatBook {
    authors: HashMap<String, ChatAuthor>,
    history: VecDeque<ChatLine>,
    capacity: usize,
}

impl ChatBook {
    /// Create a book that keeps at most `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            authors: HashMap::new(),
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Update from a packet; packets unrelated to chat are ignored.
    pub fn apply(&mut self, packet: &ServerPacket) {
        match packet {
            ServerPacket::GameSync(sync) => {
                self.authors.clone_from(&sync.chat_authors);
                self.history.clear();
            }
            ServerPacket::ChatAuthorAdded(added) => {
                let _ = self
                    .authors
                    .insert(added.author.uid.clone(), added.author.clone());
            }
            ServerPacket::ChatAuthorUpdate(update) => {
                if let Some(known) = self.authors.get_mut(&update.author.uid) {
                    known.clone_from(&update.author);
                }
            }
            ServerPacket::ChatAuthorRemoved(removed) => {
                let _ = self.authors.remove(&removed.uid);
            }
            ServerPacket::ChatMessage(msg) => {
                if self.capacity == 0 {
                    return;
                }
                let line = ChatLine {
                    game_time: msg.game_time,
                    author_uid: msg.author_uid.clone(),
                    author_name: self.name_of(&msg.author_uid).unwrap_or("?").to_owned(),
                    text: msg.text.clone(),
                };
                if self.history.len() == self.capacity {
                    let _ = self.history.pop_front();
                }
                self.history.push_back(line);
            }
            _ => {}
        }
    }

    /// Display name of an author in range, if known.
    pub fn name_of(&self, uid: &str) -> Option<&str> {
        self.authors.get(uid).map(|a| a.name.as_str())
    }

    /// Number of authors in range.
    pub fn len(&self) -> usize {
        self.authors.len()
    }

    /// The most recent message.
    pub fn last(&self) -> Option<&ChatLine> {
        self.history.back()
    }

    /// Recent messages, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ChatLine> {
        self.history.iter()
    }
}

impl Default for ChatBook {
    fn default() -> Self {
        Self::with_capacity(CHAT_HISTORY_LEN)
    }
}
