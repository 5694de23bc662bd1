//! Chat event handling
//!
//! Events are handled one at a time in receipt order: topic changes update
//! the routing table, invites from the allowed user are accepted, and
//! admitted messages are parsed and executed.
//!
//! The end of the first sync batch is published as "routing ready": from
//! then on the table holds every room topic known at startup.

use crate::chat::{ChatEvent, ChatTransport, Membership, RoomId};
use crate::command::{Admission, Command};
use crate::executor::CommandExecutor;
use crate::routing::RoutingTable;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

pub struct Bridge {
    chat: Arc<dyn ChatTransport>,
    routing: Arc<RoutingTable>,
    admission: Admission,
    executor: CommandExecutor,
    routing_ready: watch::Sender<bool>,
}

impl Bridge {
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        routing: Arc<RoutingTable>,
        admission: Admission,
        executor: CommandExecutor,
    ) -> Self {
        Self {
            chat,
            routing,
            admission,
            executor,
            routing_ready: watch::Sender::new(false),
        }
    }

    /// Flips to `true` once the first sync batch has been handled
    pub fn routing_ready(&self) -> watch::Receiver<bool> {
        self.routing_ready.subscribe()
    }

    /// Handle events until the sender side closes
    pub async fn run(&self, mut events: mpsc::Receiver<ChatEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("Chat event stream ended");
    }

    pub async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::TopicChanged { room, topic } => {
                self.routing.update_from_topic(&room, &topic);
            }
            ChatEvent::Membership {
                room,
                sender,
                membership,
            } => self.handle_membership(&room, &sender, &membership).await,
            ChatEvent::Message {
                room,
                sender,
                body,
                timestamp_ms,
            } => {
                if !self.admission.admits(&sender, timestamp_ms) {
                    debug!(%sender, timestamp_ms, "Skipping message");
                    return;
                }

                let prefix = self.routing.prefix_for_room(&room);
                let parsed = Command::parse_in_room(prefix.as_deref(), &body);
                self.executor.execute(&room, parsed).await;
            }
            ChatEvent::SyncCompleted => {
                if !*self.routing_ready.borrow() {
                    info!(rooms = self.routing.len(), "Initial sync handled, routing ready");
                    self.routing_ready.send_replace(true);
                }
            }
        }
    }

    async fn handle_membership(&self, room: &RoomId, sender: &str, membership: &Membership) {
        if sender != self.admission.allowed_user() {
            debug!(%sender, "Skipping membership event: not from the allowed user");
            return;
        }

        if membership.is_invite_or_join() {
            info!("Joining room {}", room);
            if let Err(e) = self.chat.join_room(room).await {
                error!("Error joining room {}: {}", room, e);
            }
        }
    }
}
