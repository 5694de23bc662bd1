//! Chat side of the bridge
//!
//! `ChatTransport` is the port the bridge talks through; `matrix` is the
//! production adapter.

pub mod matrix;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// Identifier of a chat room (e.g. `!abc123:example.org`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Room membership state carried by a membership event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Invite,
    Join,
    Leave,
    Ban,
    Knock,
    Other(String),
}

impl Membership {
    pub fn parse(s: &str) -> Self {
        match s {
            "invite" => Membership::Invite,
            "join" => Membership::Join,
            "leave" => Membership::Leave,
            "ban" => Membership::Ban,
            "knock" => Membership::Knock,
            other => Membership::Other(other.to_string()),
        }
    }

    pub fn is_invite_or_join(&self) -> bool {
        matches!(self, Membership::Invite | Membership::Join)
    }
}

/// Inbound chat event the bridge reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    TopicChanged {
        room: RoomId,
        topic: String,
    },
    Membership {
        room: RoomId,
        sender: String,
        membership: Membership,
    },
    Message {
        room: RoomId,
        sender: String,
        body: String,
        /// Server-assigned timestamp, milliseconds since the Unix epoch
        timestamp_ms: i64,
    },
    /// End of one sync batch; every event of the batch was sent before it
    SyncCompleted,
}

/// Outbound half of the chat transport.
///
/// Send failures are reported synchronously per call.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn join_room(&self, room: &RoomId) -> Result<()>;

    async fn send_text(&self, room: &RoomId, body: &str) -> Result<()>;
}
