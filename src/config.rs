//! Configuration and tunables

use crate::chat::RoomId;
use std::path::PathBuf;
use std::time::Duration;

/// Wait between two delivery attempts of an inbound SMS
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 10;

/// Battery poll period (5 minutes)
pub const DEFAULT_BATTERY_POLL_SECS: u64 = 300;

/// Percentage strictly below which the low battery warning is sent
pub const DEFAULT_LOW_BATTERY_THRESHOLD: f64 = 16.0;

/// How often each modem's SMS and call lists are polled for changes
pub const DEFAULT_MODEM_POLL_MS: u64 = 2000;

/// Server-side long-poll timeout for Matrix /sync
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 30_000;

/// Wait before retrying a failed /sync
pub const DEFAULT_SYNC_RETRY_SECS: u64 = 5;

pub const LOW_BATTERY_MESSAGE: &str = "I'm dying. Please plug me in.";

/// All process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub homeserver: String,
    pub username: String,
    pub password: String,
    pub default_room: RoomId,
    /// The only Matrix user allowed to command the bridge
    pub allowed_user: String,
    /// UPower device name, e.g. `battery_BAT0`
    pub battery: String,
    pub mmcli: PathBuf,
    pub upower: PathBuf,
    pub retry_backoff: Duration,
    pub battery_poll_interval: Duration,
    pub low_battery_threshold: f64,
    pub modem_poll_interval: Duration,
    pub sync_timeout_ms: u64,
    pub sync_retry_delay: Duration,
}

impl Config {
    /// Build a config with default tunables for the given required values
    pub fn new(
        homeserver: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        default_room: impl Into<String>,
        allowed_user: impl Into<String>,
        battery: impl Into<String>,
    ) -> Self {
        Self {
            homeserver: homeserver.into(),
            username: username.into(),
            password: password.into(),
            default_room: RoomId::new(default_room),
            allowed_user: allowed_user.into(),
            battery: battery.into(),
            mmcli: PathBuf::from("mmcli"),
            upower: PathBuf::from("upower"),
            retry_backoff: Duration::from_secs(DEFAULT_RETRY_BACKOFF_SECS),
            battery_poll_interval: Duration::from_secs(DEFAULT_BATTERY_POLL_SECS),
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
            modem_poll_interval: Duration::from_millis(DEFAULT_MODEM_POLL_MS),
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            sync_retry_delay: Duration::from_secs(DEFAULT_SYNC_RETRY_SECS),
        }
    }

    /// Create config for testing: fake identities and millisecond timings
    pub fn for_test() -> Self {
        let mut config = Self::new(
            "http://localhost:8008",
            "bridge",
            "secret",
            "!default:localhost",
            "@owner:localhost",
            "battery_BAT0",
        );
        config.retry_backoff = Duration::from_millis(1);
        config.battery_poll_interval = Duration::from_millis(5);
        config.modem_poll_interval = Duration::from_millis(5);
        config.sync_retry_delay = Duration::from_millis(5);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_default_tunables() {
        let config = Config::new("https://hs", "bot", "pw", "!room:hs", "@me:hs", "battery_BAT0");
        assert_eq!(config.retry_backoff, Duration::from_secs(10));
        assert_eq!(config.battery_poll_interval, Duration::from_secs(300));
        assert_eq!(config.low_battery_threshold, 16.0);
        assert_eq!(config.default_room.as_str(), "!room:hs");
        assert_eq!(config.mmcli, PathBuf::from("mmcli"));
    }

    #[test]
    fn test_test_config() {
        let config = Config::for_test();
        assert_eq!(config.allowed_user, "@owner:localhost");
        assert!(config.retry_backoff < Duration::from_secs(1));
    }
}
