//! Modem side of the bridge
//!
//! `Modem` mirrors the subset of ModemManager the bridge needs. `mmcli` is the
//! production adapter.

pub mod mmcli;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// ModemManager object id of an SMS (the trailing number of its object path)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SmsId(pub String);

/// ModemManager object id of a call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(pub String);

impl fmt::Display for SmsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsState {
    Unknown,
    Stored,
    Receiving,
    Received,
    Sending,
    Sent,
}

impl SmsState {
    pub fn parse(s: &str) -> Self {
        match s {
            "stored" => SmsState::Stored,
            "receiving" => SmsState::Receiving,
            "received" => SmsState::Received,
            "sending" => SmsState::Sending,
            "sent" => SmsState::Sent,
            _ => SmsState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Unknown,
    Dialing,
    RingingOut,
    RingingIn,
    Active,
    Held,
    Waiting,
    Terminated,
}

impl CallState {
    pub fn parse(s: &str) -> Self {
        match s {
            "dialing" => CallState::Dialing,
            "ringing-out" => CallState::RingingOut,
            "ringing-in" => CallState::RingingIn,
            "active" => CallState::Active,
            "held" => CallState::Held,
            "waiting" => CallState::Waiting,
            "terminated" => CallState::Terminated,
            _ => CallState::Unknown,
        }
    }
}

/// Modem interface whose properties changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemInterface {
    Messaging,
    Voice,
    Other(String),
}

pub const MESSAGES_PROPERTY: &str = "Messages";
pub const CALLS_PROPERTY: &str = "Calls";

/// One "properties changed" notification from a modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertiesChanged {
    pub interface: ModemInterface,
    pub properties: Vec<String>,
}

impl PropertiesChanged {
    pub fn messages() -> Self {
        Self {
            interface: ModemInterface::Messaging,
            properties: vec![MESSAGES_PROPERTY.to_string()],
        }
    }

    pub fn calls() -> Self {
        Self {
            interface: ModemInterface::Voice,
            properties: vec![CALLS_PROPERTY.to_string()],
        }
    }

    /// True when the messaging interface's message list changed
    pub fn touches_messages(&self) -> bool {
        self.interface == ModemInterface::Messaging
            && self.properties.iter().any(|p| p == MESSAGES_PROPERTY)
    }

    /// True when the voice interface's call list changed
    pub fn touches_calls(&self) -> bool {
        self.interface == ModemInterface::Voice
            && self.properties.iter().any(|p| p == CALLS_PROPERTY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSource {
    GpsNmea,
    ThreeGppLacCi,
}

/// Current position fix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationFix {
    pub gps_nmea: String,
    pub three_gpp_lac_ci: String,
}

/// One modem.
///
/// Every accessor may fail independently; callers log and skip.
#[async_trait]
pub trait Modem: Send + Sync {
    /// Human readable identifier for logs
    fn name(&self) -> String;

    /// Feed of property-change notifications, one per batch of new messages or calls
    fn properties_changed(&self) -> mpsc::Receiver<PropertiesChanged>;

    async fn list_sms(&self) -> Result<Vec<SmsId>>;
    async fn sms_text(&self, sms: &SmsId) -> Result<String>;
    async fn sms_number(&self, sms: &SmsId) -> Result<String>;
    async fn sms_state(&self, sms: &SmsId) -> Result<SmsState>;
    async fn delete_sms(&self, sms: &SmsId) -> Result<()>;
    async fn create_sms(&self, destination: &str, text: &str) -> Result<SmsId>;
    async fn send_sms(&self, sms: &SmsId) -> Result<()>;

    async fn list_calls(&self) -> Result<Vec<CallId>>;
    async fn call_number(&self, call: &CallId) -> Result<String>;
    async fn call_state(&self, call: &CallId) -> Result<CallState>;
    async fn create_call(&self, destination: &str) -> Result<CallId>;

    async fn setup_location(&self, sources: &[LocationSource], signal_location: bool) -> Result<()>;
    async fn location(&self) -> Result<LocationFix>;
}

/// Location sources enabled on every modem at startup
pub const STARTUP_LOCATION_SOURCES: [LocationSource; 2] =
    [LocationSource::GpsNmea, LocationSource::ThreeGppLacCi];

/// Enable GPS-NMEA and 3GPP LAC/CI reporting with location signalling on
pub async fn enable_location(modem: &dyn Modem) -> Result<()> {
    modem.setup_location(&STARTUP_LOCATION_SOURCES, true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeModem;

    #[tokio::test]
    async fn test_enable_location_requests_both_sources_with_signal() {
        let modem = FakeModem::new();
        enable_location(&modem).await.unwrap();

        assert_eq!(
            modem.location_setup(),
            vec![(
                vec![LocationSource::GpsNmea, LocationSource::ThreeGppLacCi],
                true
            )]
        );
    }

    #[tokio::test]
    async fn test_enable_location_failure_is_reported() {
        let modem = FakeModem::new();
        modem.fail_setup_location(true);

        assert!(enable_location(&modem).await.is_err());
    }

    #[test]
    fn test_sms_state_parse() {
        assert_eq!(SmsState::parse("received"), SmsState::Received);
        assert_eq!(SmsState::parse("sent"), SmsState::Sent);
        assert_eq!(SmsState::parse("stored"), SmsState::Stored);
        assert_eq!(SmsState::parse("--"), SmsState::Unknown);
    }

    #[test]
    fn test_call_state_parse() {
        assert_eq!(CallState::parse("ringing-in"), CallState::RingingIn);
        assert_eq!(CallState::parse("ringing-out"), CallState::RingingOut);
        assert_eq!(CallState::parse("terminated"), CallState::Terminated);
        assert_eq!(CallState::parse("bogus"), CallState::Unknown);
    }

    #[test]
    fn test_properties_changed_classification() {
        assert!(PropertiesChanged::messages().touches_messages());
        assert!(!PropertiesChanged::messages().touches_calls());
        assert!(PropertiesChanged::calls().touches_calls());

        let signal = PropertiesChanged {
            interface: ModemInterface::Other("Modem".to_string()),
            properties: vec!["SignalQuality".to_string()],
        };
        assert!(!signal.touches_messages());
        assert!(!signal.touches_calls());

        let other_messaging = PropertiesChanged {
            interface: ModemInterface::Messaging,
            properties: vec!["DefaultStorage".to_string()],
        };
        assert!(!other_messaging.touches_messages());
    }
}
