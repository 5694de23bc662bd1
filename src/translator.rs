//! Inbound event translation: modem notifications to chat notifications
//!
//! One `ModemWorker` per modem consumes that modem's property-change feed for
//! the process lifetime. Each received SMS or ringing call becomes an
//! `InboundNotification` that is handed to the delivery guarantor without
//! waiting for it to be delivered.

use crate::delivery::{DeliveryGuarantor, DeliveryTask};
use crate::error::Result;
use crate::modem::{CallId, CallState, Modem, PropertiesChanged, SmsId, SmsState};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Marker delivered to a number's own room when it calls
pub const CALLED_MARKER: &str = "<called>";

/// Something the modem wants to tell the chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundNotification {
    SmsReceived { number: String, text: String },
    CallRinging { number: String },
}

impl InboundNotification {
    pub fn number(&self) -> &str {
        match self {
            InboundNotification::SmsReceived { number, .. } => number,
            InboundNotification::CallRinging { number } => number,
        }
    }

    /// Body for the number's own room, where the room already names the sender
    pub fn routed_body(&self) -> String {
        match self {
            InboundNotification::SmsReceived { text, .. } => text.clone(),
            InboundNotification::CallRinging { .. } => CALLED_MARKER.to_string(),
        }
    }

    /// Body for the shared default room, naming the sender
    pub fn qualified_body(&self) -> String {
        match self {
            InboundNotification::SmsReceived { number, text } => format!("sms {} {}", number, text),
            InboundNotification::CallRinging { number } => format!("call {}", number),
        }
    }
}

/// Translate one SMS; `None` unless it is in the received state.
///
/// Sent and draft messages are skipped so the bridge's own outbound SMS are
/// never echoed back.
pub async fn received_sms(modem: &dyn Modem, sms: &SmsId) -> Result<Option<InboundNotification>> {
    let text = modem.sms_text(sms).await?;
    let number = modem.sms_number(sms).await?;
    let state = modem.sms_state(sms).await?;

    if state != SmsState::Received {
        return Ok(None);
    }
    Ok(Some(InboundNotification::SmsReceived { number, text }))
}

/// Translate one call; `None` unless it is ringing in
pub async fn ringing_call(modem: &dyn Modem, call: &CallId) -> Result<Option<InboundNotification>> {
    let number = modem.call_number(call).await?;
    let state = modem.call_state(call).await?;

    if state != CallState::RingingIn {
        return Ok(None);
    }
    Ok(Some(InboundNotification::CallRinging { number }))
}

/// Consumes one modem's change feed
pub struct ModemWorker {
    modem: Arc<dyn Modem>,
    guarantor: Arc<DeliveryGuarantor>,
}

impl ModemWorker {
    pub fn new(modem: Arc<dyn Modem>, guarantor: Arc<DeliveryGuarantor>) -> Self {
        Self { modem, guarantor }
    }

    /// Wait until `routing_ready` turns true, then `run`.
    ///
    /// SMS already stored on the modem are announced by the first poll, so
    /// the feed is not opened before the room topics are known.
    pub async fn run_after(self, mut routing_ready: watch::Receiver<bool>) {
        let ready = routing_ready.wait_for(|ready| *ready).await.is_ok();
        if !ready {
            warn!("Chat closed before the first sync, not listening to {}", self.modem.name());
            return;
        }
        self.run().await;
    }

    /// Run until the modem's feed closes
    pub async fn run(self) {
        let mut changes = self.modem.properties_changed();
        info!("Listening to {}", self.modem.name());

        while let Some(change) = changes.recv().await {
            self.handle_change(&change).await;
        }

        warn!("Property feed of {} closed", self.modem.name());
    }

    /// Translate one notification; returns the spawned deliveries
    pub async fn handle_change(&self, change: &PropertiesChanged) -> Vec<JoinHandle<DeliveryTask>> {
        let mut deliveries = Vec::new();
        if change.touches_messages() {
            deliveries.extend(self.forward_messages().await);
        }
        if change.touches_calls() {
            deliveries.extend(self.forward_calls().await);
        }
        deliveries
    }

    async fn forward_messages(&self) -> Vec<JoinHandle<DeliveryTask>> {
        let messages = match self.modem.list_sms().await {
            Ok(messages) => messages,
            Err(e) => {
                error!("Failed to list messages on {}: {}", self.modem.name(), e);
                return Vec::new();
            }
        };

        let mut deliveries = Vec::new();
        for sms in messages {
            let notification = match received_sms(self.modem.as_ref(), &sms).await {
                Ok(Some(notification)) => notification,
                Ok(None) => continue,
                Err(e) => {
                    error!("Skipping sms {}: {}", sms, e);
                    continue;
                }
            };

            info!("{}", notification.qualified_body());
            deliveries.push(self.guarantor.dispatch(notification));

            // Acknowledge by deleting; if this fails the message is forwarded
            // again on the next change notification.
            if let Err(e) = self.modem.delete_sms(&sms).await {
                warn!("Failed to delete sms {}: {}", sms, e);
            }
        }
        deliveries
    }

    async fn forward_calls(&self) -> Vec<JoinHandle<DeliveryTask>> {
        let calls = match self.modem.list_calls().await {
            Ok(calls) => calls,
            Err(e) => {
                error!("Failed to list calls on {}: {}", self.modem.name(), e);
                return Vec::new();
            }
        };

        let mut deliveries = Vec::new();
        for call in calls {
            match ringing_call(self.modem.as_ref(), &call).await {
                Ok(Some(notification)) => {
                    info!("{}", notification.qualified_body());
                    deliveries.push(self.guarantor.dispatch(notification));
                }
                Ok(None) => {}
                Err(e) => error!("Skipping call {}: {}", call, e),
            }
        }
        deliveries
    }
}
