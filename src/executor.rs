//! Execute parsed commands against the modem and reply in chat
//!
//! Each command produces exactly one reply to the originating room. Outbound
//! command execution is never retried.

use crate::chat::{ChatTransport, RoomId};
use crate::command::{Command, ParseError, HELP_TEXT};
use crate::error::Result;
use crate::modem::{LocationFix, Modem};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const SENT_REPLY: &str = "sent";
pub const CALLING_REPLY: &str = "calling";
pub const UNRECOGNIZED_REPLY: &str = "Sorry, I don't understand";

/// Runs commands on the command modem (the first one found at startup)
pub struct CommandExecutor {
    modem: Arc<dyn Modem>,
    chat: Arc<dyn ChatTransport>,
}

impl CommandExecutor {
    pub fn new(modem: Arc<dyn Modem>, chat: Arc<dyn ChatTransport>) -> Self {
        Self { modem, chat }
    }

    /// Execute a command (or report its parse error) and send the reply
    pub async fn execute(&self, room: &RoomId, parsed: std::result::Result<Command, ParseError>) {
        let reply = match parsed {
            Ok(command) => self.reply_for(command).await,
            Err(e) => {
                warn!("Invalid command in {}: {}", room, e);
                e.to_string()
            }
        };

        if let Err(e) = self.chat.send_text(room, &reply).await {
            error!("Failed to reply in {}: {}", room, e);
        }
    }

    async fn reply_for(&self, command: Command) -> String {
        match command {
            Command::SendSms { destination, text } => {
                match self.send_sms(&destination, &text).await {
                    Ok(()) => {
                        info!("sms {} {}", destination, text);
                        SENT_REPLY.to_string()
                    }
                    Err(e) => {
                        error!("Failed to send sms to {}: {}", destination, e);
                        format!("failed to send sms: {}", e)
                    }
                }
            }
            Command::PlaceCall { destination } => match self.modem.create_call(&destination).await {
                Ok(call) => {
                    info!(call = %call, "call {}", destination);
                    CALLING_REPLY.to_string()
                }
                Err(e) => {
                    error!("Failed to call {}: {}", destination, e);
                    format!("failed to place call: {}", e)
                }
            },
            Command::QueryLocation => match self.modem.location().await {
                Ok(fix) => {
                    info!("location");
                    format_location(&fix)
                }
                Err(e) => {
                    error!("Failed to get location: {}", e);
                    format!("failed to get location: {}", e)
                }
            },
            Command::Help => {
                info!("help");
                HELP_TEXT.to_string()
            }
            Command::Unrecognized { raw } => {
                info!("unknown command {}", raw);
                UNRECOGNIZED_REPLY.to_string()
            }
        }
    }

    async fn send_sms(&self, destination: &str, text: &str) -> Result<()> {
        let sms = self.modem.create_sms(destination, text).await?;
        self.modem.send_sms(&sms).await
    }
}

/// `location <nmea> <mcc,mnc,lac,cid>`
pub fn format_location(fix: &LocationFix) -> String {
    format!("location {} {}", fix.gps_nmea, fix.three_gpp_lac_ci)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::SMS_USAGE;
    use crate::testing::{FakeChat, FakeModem};

    const ROOM: &str = "!ops:hs";

    fn executor() -> (CommandExecutor, Arc<FakeModem>, Arc<FakeChat>) {
        let modem = Arc::new(FakeModem::new());
        let chat = Arc::new(FakeChat::new());
        (CommandExecutor::new(modem.clone(), chat.clone()), modem, chat)
    }

    fn replies(chat: &FakeChat) -> Vec<String> {
        chat.sent().into_iter().map(|(_, body)| body).collect()
    }

    fn sms(destination: &str, text: &str) -> Command {
        Command::SendSms {
            destination: destination.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_sms_success() {
        let (executor, modem, chat) = executor();
        executor.execute(&RoomId::new(ROOM), Ok(sms("555", "hi"))).await;

        assert_eq!(modem.created_sms(), vec![("555".to_string(), "hi".to_string())]);
        assert_eq!(modem.sent_sms().len(), 1);
        assert_eq!(chat.sent(), vec![(RoomId::new(ROOM), SENT_REPLY.to_string())]);
    }

    #[tokio::test]
    async fn test_create_sms_failure_is_reported_without_sending() {
        let (executor, modem, chat) = executor();
        modem.fail_create_sms(true);
        executor.execute(&RoomId::new(ROOM), Ok(sms("555", "hi"))).await;

        assert!(modem.sent_sms().is_empty());
        assert_eq!(
            replies(&chat),
            vec!["failed to send sms: Modem access error: sms storage full"]
        );
    }

    #[tokio::test]
    async fn test_send_sms_failure_is_reported() {
        let (executor, modem, chat) = executor();
        modem.fail_send_sms(true);
        executor.execute(&RoomId::new(ROOM), Ok(sms("555", "hi"))).await;

        assert_eq!(modem.sent_sms().len(), 1);
        assert_eq!(
            replies(&chat),
            vec!["failed to send sms: Modem access error: no network"]
        );
    }

    #[tokio::test]
    async fn test_place_call_success_and_failure() {
        let (executor, modem, chat) = executor();
        let call = || Command::PlaceCall {
            destination: "777".to_string(),
        };
        executor.execute(&RoomId::new(ROOM), Ok(call())).await;
        modem.fail_create_call(true);
        executor.execute(&RoomId::new(ROOM), Ok(call())).await;

        assert_eq!(modem.created_calls(), vec!["777".to_string(), "777".to_string()]);
        assert_eq!(
            replies(&chat),
            vec![
                CALLING_REPLY.to_string(),
                "failed to place call: Modem access error: voice not supported".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_location_failure_is_reported() {
        let (executor, _, chat) = executor();
        executor.execute(&RoomId::new(ROOM), Ok(Command::QueryLocation)).await;

        assert_eq!(
            replies(&chat),
            vec!["failed to get location: Modem access error: location not enabled"]
        );
    }

    #[tokio::test]
    async fn test_parse_error_reply_carries_usage() {
        let (executor, modem, chat) = executor();
        executor
            .execute(&RoomId::new(ROOM), Err(ParseError::MissingText))
            .await;

        assert!(modem.created_sms().is_empty());
        let replies = replies(&chat);
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains(SMS_USAGE));
    }

    #[tokio::test]
    async fn test_reply_failure_does_not_panic() {
        let (executor, _, chat) = executor();
        chat.fail_next_sends(1);
        executor.execute(&RoomId::new(ROOM), Ok(Command::Help)).await;

        assert_eq!(chat.attempts(), 1);
        assert!(chat.sent().is_empty());
    }

    #[test]
    fn test_format_location() {
        let fix = LocationFix {
            gps_nmea: "$GPGGA,1".to_string(),
            three_gpp_lac_ci: "262,01,00A1,01B2".to_string(),
        };
        assert_eq!(format_location(&fix), "location $GPGGA,1 262,01,00A1,01B2");
    }

    #[test]
    fn test_format_location_without_fix() {
        assert_eq!(format_location(&LocationFix::default()), "location  ");
    }
}
