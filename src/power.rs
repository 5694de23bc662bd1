//! Battery monitoring
//!
//! Polls the battery every `battery_poll_interval` and warns in the default
//! room while the charge is below the threshold.

use crate::chat::{ChatTransport, RoomId};
use crate::config::LOW_BATTERY_MESSAGE;
use crate::error::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

static PERCENTAGE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*percentage:\s*([0-9]+(?:[.,][0-9]+)?)\s*%").expect("Invalid percentage regex")
});

#[async_trait]
pub trait PowerSource: Send + Sync {
    /// Charge in percent
    async fn percentage(&self) -> Result<f64>;
}

/// Parse the `percentage:` line of `upower -i` output
pub fn parse_percentage(output: &str) -> Option<f64> {
    let cap = PERCENTAGE_LINE.captures(output)?;
    cap[1].replace(',', ".").parse().ok()
}

/// UPower battery queried through the `upower` tool
#[derive(Debug, Clone)]
pub struct UPowerBattery {
    upower: PathBuf,
    device: String,
}

impl UPowerBattery {
    pub fn new(upower: impl Into<PathBuf>, device: impl Into<String>) -> Self {
        Self {
            upower: upower.into(),
            device: device.into(),
        }
    }

    pub fn device_path(&self) -> String {
        format!("/org/freedesktop/UPower/devices/{}", self.device)
    }
}

#[async_trait]
impl PowerSource for UPowerBattery {
    async fn percentage(&self) -> Result<f64> {
        let path = self.device_path();
        let output = Command::new(&self.upower)
            .args(["-i", path.as_str()])
            .output()
            .await
            .map_err(|e| Error::Power(format!("{}: {}", self.upower.display(), e)))?;

        if !output.status.success() {
            return Err(Error::Power(format!(
                "upower -i {} failed: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_percentage(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| Error::Power(format!("no percentage reported for {}", self.device)))
    }
}

pub struct PowerMonitor {
    source: Arc<dyn PowerSource>,
    chat: Arc<dyn ChatTransport>,
    room: RoomId,
    threshold: f64,
    interval: Duration,
}

impl PowerMonitor {
    pub fn new(
        source: Arc<dyn PowerSource>,
        chat: Arc<dyn ChatTransport>,
        room: RoomId,
        threshold: f64,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            chat,
            room,
            threshold,
            interval,
        }
    }

    /// One poll; true when a warning was sent.
    ///
    /// A failed query is logged and the next poll tries again.
    pub async fn check_once(&self) -> bool {
        info!("Checking battery level");
        let percentage = match self.source.percentage().await {
            Ok(p) => p,
            Err(e) => {
                warn!("Error getting battery state: {}", e);
                return false;
            }
        };

        if percentage >= self.threshold {
            debug!(percentage, "Battery fine");
            return false;
        }

        info!(percentage, "Sending low battery warning");
        match self.chat.send_text(&self.room, LOW_BATTERY_MESSAGE).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send low battery warning: {}", e);
                false
            }
        }
    }

    /// Poll forever; the first check happens one interval after start
    pub async fn run(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        loop {
            ticker.tick().await;
            self.check_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBattery, FakeChat};

    const UPOWER_OUTPUT: &str = "  native-path:          BAT0
  vendor:               SMP
  power supply:         yes
  battery
    present:             yes
    state:               discharging
    energy:              12.6 Wh
    percentage:          15%
    capacity:            91.2%
";

    fn monitor(battery: Arc<FakeBattery>, chat: Arc<FakeChat>) -> PowerMonitor {
        PowerMonitor::new(
            battery,
            chat,
            RoomId::new("!default:hs"),
            16.0,
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_parse_percentage() {
        assert_eq!(parse_percentage(UPOWER_OUTPUT), Some(15.0));
        assert_eq!(parse_percentage("    percentage:          87,5%"), Some(87.5));
        assert_eq!(parse_percentage("    state: charging"), None);
    }

    #[test]
    fn test_device_path() {
        let battery = UPowerBattery::new("upower", "battery_BAT0");
        assert_eq!(battery.device_path(), "/org/freedesktop/UPower/devices/battery_BAT0");
    }

    #[tokio::test]
    async fn test_below_threshold_warns_once() {
        let chat = Arc::new(FakeChat::new());
        let m = monitor(Arc::new(FakeBattery::new(Some(15.0))), chat.clone());

        assert!(m.check_once().await);
        assert_eq!(
            chat.sent(),
            vec![(RoomId::new("!default:hs"), LOW_BATTERY_MESSAGE.to_string())]
        );
    }

    #[tokio::test]
    async fn test_at_threshold_is_silent() {
        let chat = Arc::new(FakeChat::new());
        let m = monitor(Arc::new(FakeBattery::new(Some(16.0))), chat.clone());

        assert!(!m.check_once().await);
        assert_eq!(chat.attempts(), 0);
    }

    #[tokio::test]
    async fn test_query_failure_does_not_stop_polling() {
        let chat = Arc::new(FakeChat::new());
        let battery = Arc::new(FakeBattery::new(None));
        let m = monitor(battery.clone(), chat.clone());

        assert!(!m.check_once().await);
        battery.set(Some(3.0));
        assert!(m.check_once().await);
        assert_eq!(battery.queries(), 2);
    }

    #[tokio::test]
    async fn test_run_repeats_warning_every_poll() {
        let chat = Arc::new(FakeChat::new());
        let battery = Arc::new(FakeBattery::new(None));
        let handle = tokio::spawn(monitor(battery.clone(), chat.clone()).run());

        // Keeps polling through failures, then warns on each poll below threshold
        for _ in 0..200 {
            if battery.queries() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        battery.set(Some(10.0));
        for _ in 0..200 {
            if chat.sent().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        handle.abort();

        assert!(chat.sent().len() >= 2);
    }
}
