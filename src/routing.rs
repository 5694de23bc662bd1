//! Routing between phone numbers and chat rooms
//!
//! A room is bound to a phone number by setting its topic to `sms <number>`.
//! The same string is the routing key, so inbound traffic from that number is
//! delivered to the room and messages typed in the room are prefixed with it.

use crate::chat::RoomId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::info;

/// Lookup key derived from a phone number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `sms <number>` topic convention
pub struct RoutingConvention;

impl RoutingConvention {
    pub const PREFIX: &'static str = "sms ";

    /// Routing key (and expected room topic) for a phone number
    pub fn key_for_number(number: &str) -> RoutingKey {
        RoutingKey(format!("{}{}", Self::PREFIX, number))
    }

    /// Phone number bound by a topic, if the topic follows the convention
    pub fn number_from_topic(topic: &str) -> Option<&str> {
        topic.strip_prefix(Self::PREFIX).filter(|n| !n.is_empty())
    }
}

/// Bidirectional room routing, internally synchronized.
///
/// `key_to_room` and `room_to_prefix` are independent side tables; entries
/// are never removed, only overwritten by newer topics.
#[derive(Debug, Default)]
pub struct RoutingTable {
    key_to_room: RwLock<HashMap<RoutingKey, RoomId>>,
    room_to_prefix: RwLock<HashMap<RoomId, String>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest topic of a room (last write wins)
    pub fn update_from_topic(&self, room: &RoomId, topic: &str) {
        info!("Updating topic {} {}", room, topic);

        self.room_to_prefix
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room.clone(), topic.to_string());

        if let Some(number) = RoutingConvention::number_from_topic(topic) {
            self.key_to_room
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(RoutingConvention::key_for_number(number), room.clone());
        }
    }

    /// Room bound to a routing key
    pub fn resolve_room_for_key(&self, key: &RoutingKey) -> Option<RoomId> {
        self.key_to_room
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Outbound prefix of a room: its last seen topic, if any
    pub fn prefix_for_room(&self, room: &RoomId) -> Option<String> {
        self.room_to_prefix
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room)
            .cloned()
    }

    /// Number of phone numbers with a room
    pub fn len(&self) -> usize {
        self.key_to_room
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
