//! Delivery of inbound notifications into chat
//!
//! Routing: a number bound to a room (topic `sms <number>`) gets the short
//! body in that room; anything else goes to the default room with a body that
//! names the number.
//!
//! Inbound SMS are retried until a send succeeds, each in its own task,
//! demoting to the default room after a failure. Ringing calls get a single
//! attempt.

use crate::chat::{ChatTransport, RoomId};
use crate::routing::{RoutingConvention, RoutingTable};
use crate::translator::InboundNotification;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One notification on its way to a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTask {
    pub room: RoomId,
    pub body: String,
    pub attempts: u32,
    /// A failed send moved the task to the default room
    pub demoted: bool,
    fallback_room: RoomId,
    fallback_body: String,
}

impl DeliveryTask {
    pub fn new(room: RoomId, body: String, fallback_room: RoomId, fallback_body: String) -> Self {
        Self {
            room,
            body,
            attempts: 0,
            demoted: false,
            fallback_room,
            fallback_body,
        }
    }

    /// Fall back to the default room and the fully-qualified body
    pub fn demote(&mut self) {
        self.room = self.fallback_room.clone();
        self.body = self.fallback_body.clone();
        self.demoted = true;
    }
}

pub struct DeliveryGuarantor {
    chat: Arc<dyn ChatTransport>,
    routing: Arc<RoutingTable>,
    default_room: RoomId,
    backoff: Duration,
}

impl DeliveryGuarantor {
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        routing: Arc<RoutingTable>,
        default_room: RoomId,
        backoff: Duration,
    ) -> Self {
        Self {
            chat,
            routing,
            default_room,
            backoff,
        }
    }

    /// Decide target room and body for a notification
    pub fn route(&self, notification: &InboundNotification) -> DeliveryTask {
        let key = RoutingConvention::key_for_number(notification.number());
        let qualified = notification.qualified_body();

        match self.routing.resolve_room_for_key(&key) {
            Some(room) => DeliveryTask::new(
                room,
                notification.routed_body(),
                self.default_room.clone(),
                qualified,
            ),
            None => DeliveryTask::new(
                self.default_room.clone(),
                qualified.clone(),
                self.default_room.clone(),
                qualified,
            ),
        }
    }

    /// Spawn the delivery of a notification and return immediately.
    ///
    /// The handle resolves to the finished task; dropping it does not cancel
    /// the delivery.
    pub fn dispatch(&self, notification: InboundNotification) -> JoinHandle<DeliveryTask> {
        let task = self.route(&notification);
        let chat = Arc::clone(&self.chat);

        match notification {
            InboundNotification::SmsReceived { .. } => {
                tokio::spawn(deliver_until_sent(chat, task, self.backoff))
            }
            InboundNotification::CallRinging { .. } => tokio::spawn(deliver_once(chat, task)),
        }
    }
}

/// Send until success, demoting after every failure. Never gives up.
pub async fn deliver_until_sent(
    chat: Arc<dyn ChatTransport>,
    mut task: DeliveryTask,
    backoff: Duration,
) -> DeliveryTask {
    loop {
        task.attempts += 1;
        match chat.send_text(&task.room, &task.body).await {
            Ok(()) => {
                info!(attempts = task.attempts, "Delivered to {}", task.room);
                return task;
            }
            Err(e) => {
                warn!(attempt = task.attempts, "Retrying delivery to {}: {}", task.room, e);
                task.demote();
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Single best-effort send; a failure drops the notification
pub async fn deliver_once(chat: Arc<dyn ChatTransport>, mut task: DeliveryTask) -> DeliveryTask {
    task.attempts += 1;
    if let Err(e) = chat.send_text(&task.room, &task.body).await {
        warn!("Dropping notification for {}: {}", task.room, e);
    }
    task
}
