//! Matrix adapter on top of `matrix_sdk`
//!
//! Password login, join and plain text send. The sync loop registers event
//! handlers that turn topic, membership and message events into `ChatEvent`s
//! and marks the end of every sync batch with `ChatEvent::SyncCompleted`.

use super::{ChatEvent, ChatTransport, Membership, RoomId};
use crate::error::{Error, Result};
use async_trait::async_trait;
use matrix_sdk::config::SyncSettings;
use matrix_sdk::room::Room;
use matrix_sdk::ruma::events::room::member::{
    MembershipState, OriginalSyncRoomMemberEvent, StrippedRoomMemberEvent,
};
use matrix_sdk::ruma::events::room::message::{
    OriginalSyncRoomMessageEvent, RoomMessageEventContent,
};
use matrix_sdk::ruma::events::room::topic::OriginalSyncRoomTopicEvent;
use matrix_sdk::ruma::{self, OwnedRoomId, UserId};
use matrix_sdk::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEVICE_DISPLAY_NAME: &str = "matrix-modem-bridge";

/// Logged-in Matrix client
pub struct MatrixClient {
    client: Client,
    user_id: String,
}

impl MatrixClient {
    /// Log in with username and password
    pub async fn login(homeserver: &str, username: &str, password: &str) -> Result<Self> {
        let client = Client::builder()
            .homeserver_url(homeserver)
            .build()
            .await
            .map_err(|e| Error::Config(format!("homeserver {}: {}", homeserver, e)))?;

        let response = client
            .matrix_auth()
            .login_username(username, password)
            .initial_device_display_name(DEVICE_DISPLAY_NAME)
            .send()
            .await?;

        info!(
            user_id = %response.user_id,
            device_id = %response.device_id,
            "Login successful"
        );

        Ok(Self {
            client,
            user_id: response.user_id.to_string(),
        })
    }

    /// Fully-qualified user id of the bridge account
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Sync until `events` is closed, forwarding events in receipt order.
    ///
    /// The first round uses a zero timeout so room state (topics) is
    /// available right after startup.
    pub async fn sync_forever(
        &self,
        events: mpsc::Sender<ChatEvent>,
        timeout_ms: u64,
        retry_delay: Duration,
    ) {
        self.forward_events(&events);
        let mut settings = SyncSettings::new().timeout(Duration::ZERO);

        loop {
            match self.client.sync_once(settings.clone()).await {
                Ok(response) => {
                    debug!(next_batch = %response.next_batch, "Sync batch");
                    if events.send(ChatEvent::SyncCompleted).await.is_err() {
                        info!("Chat event receiver closed, stopping sync");
                        return;
                    }
                    settings = SyncSettings::new()
                        .token(response.next_batch)
                        .timeout(Duration::from_millis(timeout_ms));
                }
                Err(e) => {
                    warn!("Sync failed, retrying in {:?}: {}", retry_delay, e);
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    /// Register the handlers feeding `events`; they run inside each sync
    fn forward_events(&self, events: &mpsc::Sender<ChatEvent>) {
        let tx = events.clone();
        self.client
            .add_event_handler(move |ev: OriginalSyncRoomTopicEvent, room: Room| {
                let tx = tx.clone();
                async move { forward(&tx, topic_event(&room, &ev)).await }
            });

        let tx = events.clone();
        self.client
            .add_event_handler(move |ev: StrippedRoomMemberEvent, room: Room| {
                let tx = tx.clone();
                async move {
                    forward(&tx, member_event(&room, &ev.sender, &ev.content.membership)).await
                }
            });

        let tx = events.clone();
        self.client
            .add_event_handler(move |ev: OriginalSyncRoomMemberEvent, room: Room| {
                let tx = tx.clone();
                async move {
                    forward(&tx, member_event(&room, &ev.sender, &ev.content.membership)).await
                }
            });

        let tx = events.clone();
        self.client
            .add_event_handler(move |ev: OriginalSyncRoomMessageEvent, room: Room| {
                let tx = tx.clone();
                async move { forward(&tx, message_event(&room, &ev)).await }
            });
    }

    fn joined_room(&self, room: &RoomId) -> Result<Room> {
        let id = parse_room_id(room)?;
        self.client
            .get_room(&id)
            .ok_or_else(|| Error::Transport(format!("room {} is not known to the client", room)))
    }
}

#[async_trait]
impl ChatTransport for MatrixClient {
    async fn join_room(&self, room: &RoomId) -> Result<()> {
        let id = parse_room_id(room)?;
        self.client.join_room_by_id(&id).await?;
        Ok(())
    }

    async fn send_text(&self, room: &RoomId, body: &str) -> Result<()> {
        self.joined_room(room)?
            .send(RoomMessageEventContent::text_plain(body))
            .await?;
        Ok(())
    }
}

async fn forward(events: &mpsc::Sender<ChatEvent>, event: ChatEvent) {
    if events.send(event).await.is_err() {
        debug!("Chat event receiver closed, dropping event");
    }
}

fn parse_room_id(room: &RoomId) -> Result<OwnedRoomId> {
    ruma::RoomId::parse(room.as_str())
        .map_err(|e| Error::Transport(format!("invalid room id {}: {}", room, e)))
}

fn room_of(room: &Room) -> RoomId {
    RoomId::new(room.room_id().as_str())
}

fn topic_event(room: &Room, ev: &OriginalSyncRoomTopicEvent) -> ChatEvent {
    topic_changed(room_of(room), ev)
}

fn member_event(room: &Room, sender: &UserId, membership: &MembershipState) -> ChatEvent {
    membership_changed(room_of(room), sender, membership)
}

fn message_event(room: &Room, ev: &OriginalSyncRoomMessageEvent) -> ChatEvent {
    message_received(room_of(room), ev)
}

fn topic_changed(room: RoomId, ev: &OriginalSyncRoomTopicEvent) -> ChatEvent {
    ChatEvent::TopicChanged {
        room,
        topic: ev.content.topic.clone(),
    }
}

fn membership_changed(room: RoomId, sender: &UserId, membership: &MembershipState) -> ChatEvent {
    ChatEvent::Membership {
        room,
        sender: sender.to_string(),
        membership: Membership::parse(membership.as_str()),
    }
}

fn message_received(room: RoomId, ev: &OriginalSyncRoomMessageEvent) -> ChatEvent {
    ChatEvent::Message {
        room,
        sender: ev.sender.to_string(),
        body: ev.content.body().to_string(),
        timestamp_ms: i64::from(ev.origin_server_ts.0),
    }
}
