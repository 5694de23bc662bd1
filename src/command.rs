//! Command protocol typed by the operator in chat
//!
//! ```text
//! sms <phone_number> <message>
//! call <phone_number>
//! location
//! help
//! ```

use thiserror::Error;

pub const HELP_TEXT: &str = "help
sms <phone_number> <message>
call <phone_number>
location";

pub const SMS_USAGE: &str = "sms <phone_number> <message>";
pub const CALL_USAGE: &str = "call <phone_number>";

/// A parsed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendSms { destination: String, text: String },
    PlaceCall { destination: String },
    QueryLocation,
    Help,
    Unrecognized { raw: String },
}

/// A command verb was recognised but its arguments are unusable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing phone number, usage: {usage}")]
    MissingDestination { usage: &'static str },

    #[error("missing message text, usage: {}", SMS_USAGE)]
    MissingText,
}

/// Split `rest` into its first token and the remainder after one whitespace char
fn split_token(rest: &str) -> (&str, &str) {
    match rest.char_indices().find(|(_, c)| c.is_whitespace()) {
        Some((i, c)) => (&rest[..i], &rest[i + c.len_utf8()..]),
        None => (rest, ""),
    }
}

impl Command {
    /// Parse a message body. Verbs are matched in priority order: `sms `,
    /// `call `, `location`, `help`.
    pub fn parse(body: &str) -> Result<Self, ParseError> {
        if let Some(rest) = body.strip_prefix("sms ") {
            let (destination, text) = split_token(rest);
            if destination.is_empty() {
                return Err(ParseError::MissingDestination { usage: SMS_USAGE });
            }
            if text.is_empty() {
                return Err(ParseError::MissingText);
            }
            return Ok(Command::SendSms {
                destination: destination.to_string(),
                text: text.to_string(),
            });
        }

        if let Some(rest) = body.strip_prefix("call ") {
            let (destination, _) = split_token(rest);
            if destination.is_empty() {
                return Err(ParseError::MissingDestination { usage: CALL_USAGE });
            }
            return Ok(Command::PlaceCall {
                destination: destination.to_string(),
            });
        }

        if body.starts_with("location") {
            return Ok(Command::QueryLocation);
        }

        if body.starts_with("help") {
            return Ok(Command::Help);
        }

        Ok(Command::Unrecognized {
            raw: body.to_string(),
        })
    }

    /// Parse a message typed in a room, applying the room's outbound prefix
    /// first (`<prefix> <body>` when the prefix is non-empty).
    ///
    /// `Unrecognized` keeps the body as typed, without the prefix.
    pub fn parse_in_room(prefix: Option<&str>, body: &str) -> Result<Self, ParseError> {
        let parsed = match prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => Command::parse(&format!("{} {}", prefix, body))?,
            None => Command::parse(body)?,
        };

        Ok(match parsed {
            Command::Unrecognized { .. } => Command::Unrecognized {
                raw: body.to_string(),
            },
            other => other,
        })
    }
}

/// Gate in front of the parser: only the allowed sender, only live messages
#[derive(Debug, Clone)]
pub struct Admission {
    allowed_user: String,
    start_ms: i64,
}

impl Admission {
    pub fn new(allowed_user: impl Into<String>, start_ms: i64) -> Self {
        Self {
            allowed_user: allowed_user.into(),
            start_ms,
        }
    }

    pub fn allowed_user(&self) -> &str {
        &self.allowed_user
    }

    /// Messages at or before process start would replay history on reconnect
    pub fn admits(&self, sender: &str, timestamp_ms: i64) -> bool {
        sender == self.allowed_user && timestamp_ms > self.start_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_sms() {
        assert_eq!(
            Command::parse("sms 5559999 hello there").unwrap(),
            Command::SendSms {
                destination: "5559999".to_string(),
                text: "hello there".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_sms_keeps_later_occurrences() {
        // Only the leading "sms <dest> " is removed
        assert_eq!(
            Command::parse("sms 555 sms 555 again").unwrap(),
            Command::SendSms {
                destination: "555".to_string(),
                text: "sms 555 again".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_sms_multiline_text() {
        assert_eq!(
            Command::parse("sms +4912345 line one\nline two").unwrap(),
            Command::SendSms {
                destination: "+4912345".to_string(),
                text: "line one\nline two".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_call() {
        assert_eq!(
            Command::parse("call +15551234").unwrap(),
            Command::PlaceCall {
                destination: "+15551234".to_string(),
            }
        );
        assert_eq!(
            Command::parse("call 555 ignored words").unwrap(),
            Command::PlaceCall {
                destination: "555".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_location_and_help_are_prefix_matches() {
        assert_eq!(Command::parse("location").unwrap(), Command::QueryLocation);
        assert_eq!(Command::parse("location please").unwrap(), Command::QueryLocation);
        assert_eq!(Command::parse("help").unwrap(), Command::Help);
        assert_eq!(Command::parse("helpme").unwrap(), Command::Help);
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(
            Command::parse("what's up").unwrap(),
            Command::Unrecognized {
                raw: "what's up".to_string(),
            }
        );
        // Verb without its trailing space is not a command
        assert_eq!(
            Command::parse("sms").unwrap(),
            Command::Unrecognized {
                raw: "sms".to_string(),
            }
        );
    }

    #[test]
    fn test_malformed_sms_is_validation_error() {
        assert_eq!(
            Command::parse("sms "),
            Err(ParseError::MissingDestination { usage: SMS_USAGE })
        );
        assert_eq!(
            Command::parse("sms  5551234 hi"),
            Err(ParseError::MissingDestination { usage: SMS_USAGE })
        );
        assert_eq!(Command::parse("sms 5551234"), Err(ParseError::MissingText));
        assert_eq!(Command::parse("sms 5551234 "), Err(ParseError::MissingText));
    }

    #[test]
    fn test_malformed_call_is_validation_error() {
        assert_eq!(
            Command::parse("call "),
            Err(ParseError::MissingDestination { usage: CALL_USAGE })
        );
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::MissingDestination { usage: CALL_USAGE };
        assert_eq!(err.to_string(), "missing phone number, usage: call <phone_number>");
        assert!(ParseError::MissingText.to_string().contains(SMS_USAGE));
    }

    #[test]
    fn test_room_prefix_supplies_destination() {
        assert_eq!(
            Command::parse_in_room(Some("sms 5551234"), "running late").unwrap(),
            Command::SendSms {
                destination: "5551234".to_string(),
                text: "running late".to_string(),
            }
        );
    }

    #[test]
    fn test_empty_prefix_is_ignored() {
        assert_eq!(Command::parse_in_room(Some(""), "help").unwrap(), Command::Help);
        assert_eq!(Command::parse_in_room(None, "location").unwrap(), Command::QueryLocation);
    }

    #[test]
    fn test_unrecognized_keeps_original_body() {
        assert_eq!(
            Command::parse_in_room(Some("Family"), "hello").unwrap(),
            Command::Unrecognized {
                raw: "hello".to_string(),
            }
        );
    }

    #[test]
    fn test_admission() {
        let admission = Admission::new("@owner:hs", 1_000);
        assert!(admission.admits("@owner:hs", 1_001));
        assert!(!admission.admits("@owner:hs", 1_000));
        assert!(!admission.admits("@owner:hs", 999));
        assert!(!admission.admits("@stranger:hs", 5_000));
    }

    proptest! {
        #[test]
        fn prop_sms_round_trip(dest in "[+0-9]{1,15}", text in "[^\\s][\\PC\\s]{0,40}") {
            let body = format!("sms {} {}", dest, text);
            prop_assert_eq!(
                Command::parse(&body).unwrap(),
                Command::SendSms { destination: dest, text }
            );
        }

        #[test]
        fn prop_call_round_trip(dest in "[+0-9]{1,15}") {
            prop_assert_eq!(
                Command::parse(&format!("call {}", dest)).unwrap(),
                Command::PlaceCall { destination: dest }
            );
        }

        #[test]
        fn prop_sms_prefix_never_unrecognized(rest in "\\PC{0,30}") {
            let parsed = Command::parse(&format!("sms {}", rest));
            prop_assert!(!matches!(parsed, Ok(Command::Unrecognized { .. })), "sms-prefixed body parsed as Unrecognized: {:?}", parsed);
        }

        #[test]
        fn prop_other_bodies_unrecognized(body in "[a-z ]{0,20}") {
            prop_assume!(!body.starts_with("sms ")
                && !body.starts_with("call ")
                && !body.starts_with("location")
                && !body.starts_with("help"));
            prop_assert_eq!(
                Command::parse(&body).unwrap(),
                Command::Unrecognized { raw: body.clone() }
            );
        }
    }
}
