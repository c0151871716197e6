//! The visible world as seen by one player.
//!
//! [`World::apply`] folds server packets into a map of players, smart
//! objects, generic objects and team resources, and reports when the
//! player's own object or an object it controls appears or disappears.

use std::collections::HashMap;

use cos_core::Role;
use cos_protocol::{
    GameObjectSync, GameObjectUpdate, GameSync, PlayerSync, ServerPacket, SmartObjectSync,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

/// Something a player cares about changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorldEvent {
    /// The player's own object came into the world.
    SelfLoaded(String),
    /// The player's own object left the world.
    SelfLost(String),
    /// A smart object the player controls came into vision.
    ControllableLoaded(String),
    /// A smart object the player controls left vision.
    ControllableLost(String),
}

/// World state; empty until the first `game-sync`.
#[derive(Clone, Debug, Default)]
pub struct World {
    my_uid: String,
    my_team: i64,
    my_role: Role,
    game_time: f64,
    players: HashMap<String, PlayerSync>,
    static_objects: Vec<GameObjectSync>,
    smart_objects: HashMap<String, SmartObjectSync>,
    generic_objects: HashMap<String, GameObjectSync>,
    resources: HashMap<String, i64>,
}

impl World {
    /// Fold one packet into the world.
    pub fn apply(&mut self, packet: &ServerPacket) -> Vec<WorldEvent> {
        let mut events = Vec::new();
        match packet {
            ServerPacket::GameSync(sync) => self.sync(sync, &mut events),
            ServerPacket::GameObjectAdded(added) => {
                self.advance(added.game_time);
                let _ = self
                    .generic_objects
                    .insert(added.object.uid.clone(), added.object.clone());
            }
            ServerPacket::PlayerAdded(added) => {
                self.advance(added.game_time);
                let uid = added.object.object.uid.clone();
                if uid == self.my_uid {
                    events.push(WorldEvent::SelfLoaded(uid.clone()));
                }
                let _ = self.players.insert(uid, added.object.clone());
            }
            ServerPacket::SmartObjectAdded(added) => {
                self.advance(added.game_time);
                let uid = added.object.object.uid.clone();
                if self.controls(&added.object) {
                    events.push(WorldEvent::ControllableLoaded(uid.clone()));
                }
                let _ = self.smart_objects.insert(uid, added.object.clone());
            }
            ServerPacket::GameObjectUpdate(update) => {
                self.advance(update.game_time);
                if let Some(player) = self.players.get_mut(&update.uid) {
                    moved(&mut player.object, update);
                } else if let Some(object) = self.generic_objects.get_mut(&update.uid) {
                    moved(object, update);
                } else {
                    debug!(uid = %update.uid, "ignoring update to unknown object");
                }
            }
            ServerPacket::SmartObjectUpdate(update) => {
                self.advance(update.update.game_time);
                if let Some(so) = self.smart_objects.get_mut(&update.update.uid) {
                    moved(&mut so.object, &update.update);
                    so.current_health = update.current_health;
                    so.additional.clone_from(&update.additional);
                } else {
                    debug!(uid = %update.update.uid, "ignoring update to unknown smart object");
                }
            }
            ServerPacket::GameObjectRemoved(removed) => {
                self.advance(removed.game_time);
                self.remove(&removed.uid, &mut events);
            }
            ServerPacket::TeamResourceChanged(changed) => {
                self.advance(changed.game_time);
                for (uid, amount) in &changed.resources {
                    if let Some(held) = self.resources.get_mut(uid) {
                        *held = *amount;
                    }
                }
            }
            _ => {}
        }
        events
    }

    /// Latest game time seen; zero before the first sync.
    pub fn game_time(&self) -> f64 {
        self.game_time
    }

    /// Whether a `game-sync` has filled the world in.
    pub fn is_synced(&self) -> bool {
        self.game_time > 0.0
    }

    /// Visible players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Visible smart objects.
    pub fn smart_object_count(&self) -> usize {
        self.smart_objects.len()
    }

    /// Static plus generic objects.
    pub fn object_count(&self) -> usize {
        self.static_objects.len() + self.generic_objects.len()
    }

    /// Resource kinds the team can hold.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    fn sync(&mut self, sync: &GameSync, events: &mut Vec<WorldEvent>) {
        if self.players.contains_key(&self.my_uid) {
            events.push(WorldEvent::SelfLost(self.my_uid.clone()));
        }
        events.extend(self.controlled_uids().map(WorldEvent::ControllableLost));

        self.my_uid.clone_from(&sync.player.uid);
        self.my_team = sync.player.team;
        self.my_role = sync.player.role();
        self.game_time = sync.game_time;

        self.players = decode_keyed::<PlayerSync>(&sync.players)
            .map(|p| (p.object.uid.clone(), p))
            .collect();
        self.static_objects = decode_keyed::<GameObjectSync>(&sync.dumb_objects).collect();
        self.smart_objects = decode_keyed::<SmartObjectSync>(&sync.smart_objects)
            .map(|so| (so.object.uid.clone(), so))
            .collect();
        self.generic_objects.clear();
        self.resources = sync
            .resources
            .keys()
            .map(|uid| (uid.clone(), sync.team.resources.get(uid).copied().unwrap_or(0)))
            .collect();

        if self.players.contains_key(&self.my_uid) {
            events.push(WorldEvent::SelfLoaded(self.my_uid.clone()));
        }
        events.extend(self.controlled_uids().map(WorldEvent::ControllableLoaded));
    }

    fn remove(&mut self, uid: &str, events: &mut Vec<WorldEvent>) {
        if self.players.remove(uid).is_some() {
            if uid == self.my_uid {
                events.push(WorldEvent::SelfLost(uid.to_owned()));
            }
        } else if let Some(so) = self.smart_objects.remove(uid) {
            if self.controls(&so) {
                events.push(WorldEvent::ControllableLost(uid.to_owned()));
            }
        } else {
            let _ = self.generic_objects.remove(uid);
        }
    }

    /// Game time only moves forward outside a sync.
    fn advance(&mut self, game_time: f64) {
        if game_time > self.game_time {
            self.game_time = game_time;
        }
    }

    fn controls(&self, so: &SmartObjectSync) -> bool {
        so.controlling_team == self.my_team && so.controlling_role() == self.my_role
    }

    fn controlled_uids(&self) -> impl Iterator<Item = String> + '_ {
        self.smart_objects
            .values()
            .filter(|so| self.controls(so))
            .map(|so| so.object.uid.clone())
    }
}

fn moved(object: &mut GameObjectSync, update: &GameObjectUpdate) {
    object.position = update.position;
    object.velocity = update.velocity;
    object.rotation = update.rotation;
    object.angular_velocity = update.angular_velocity;
    object.animation.clone_from(&update.animation);
    object.animation_playing = update.animation_playing;
    object.animation_looping = update.animation_looping;
}

/// Decode every value of a raw keyed map, skipping entries that do not fit.
fn decode_keyed<T: DeserializeOwned>(raw: &Map<String, Value>) -> impl Iterator<Item = T> + '_ {
    raw.iter()
        .filter_map(|(key, value)| match serde_json::from_value(value.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(key = %key, error = %e, "skipping malformed synced object");
                None
            }
        })
}
