//! ModemManager adapter driving the `mmcli` command line tool
//!
//! Every query runs `mmcli ... -K` (key-value output) and parses the result.
//! ModemManager has no CLI for property-change signals, so the change feed
//! is produced by polling the SMS and call lists.

use super::{
    CallId, CallState, LocationFix, LocationSource, Modem, PropertiesChanged, SmsId, SmsState,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// `key : value` line of `mmcli -K` output
static KEY_VALUE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z0-9._\-\[\]]+)\s*:\s?(.*)$").expect("Invalid key-value regex"));

static CREATED_SMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/org/freedesktop/ModemManager1/SMS/(\d+)").expect("Invalid SMS path regex"));

static CREATED_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/org/freedesktop/ModemManager1/Call/(\d+)").expect("Invalid call path regex"));

/// Parsed `mmcli -K` output, in output order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValues {
    entries: Vec<(String, String)>,
}

impl KeyValues {
    pub fn parse(output: &str) -> Self {
        let entries = output
            .lines()
            .filter_map(|line| KEY_VALUE_LINE.captures(line))
            .map(|cap| {
                let value = cap[2].trim();
                // mmcli prints "--" for unset values
                let value = if value == "--" { "" } else { value };
                (cap[1].to_string(), value.to_string())
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::ModemAccess(format!("mmcli output has no '{}'", key)))
    }

    /// Values of a list key (`<key>.value[n]`), skipping empty entries
    pub fn list(&self, key: &str) -> Vec<&str> {
        let prefix = format!("{}.value[", key);
        self.entries
            .iter()
            .filter(|(k, v)| k.starts_with(&prefix) && !v.is_empty())
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Trailing component of a ModemManager object path
pub fn object_index(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Pick a quote character for an `mmcli` key-value argument.
///
/// mmcli's parser supports `'` or `"` quoting without escapes.
fn quote_value(value: &str) -> Result<String> {
    if !value.contains('\'') {
        Ok(format!("'{}'", value))
    } else if !value.contains('"') {
        Ok(format!("\"{}\"", value))
    } else {
        Err(Error::ModemAccess(
            "value contains both quote characters and cannot be passed to mmcli".to_string(),
        ))
    }
}

/// Format the 3GPP location fields as `mcc,mnc,lac,cid`
fn location_from(kv: &KeyValues) -> LocationFix {
    let field = |name: &str| kv.get(&format!("modem.location.3gpp.{}", name)).unwrap_or("");
    let parts = [field("mcc"), field("mnc"), field("lac"), field("cid")];
    let three_gpp_lac_ci = if parts.iter().all(|p| p.is_empty()) {
        String::new()
    } else {
        parts.join(",")
    };

    LocationFix {
        gps_nmea: kv.list("modem.location.gps.nmea").join("\n"),
        three_gpp_lac_ci,
    }
}

/// Record a freshly polled list; true when a change notification is due.
///
/// The first poll only notifies when items are already waiting.
fn list_changed<T: PartialEq>(last: &mut Option<Vec<T>>, current: Vec<T>) -> bool {
    let changed = match last {
        Some(previous) => *previous != current,
        None => !current.is_empty(),
    };
    *last = Some(current);
    changed
}

/// Thin async wrapper over the `mmcli` binary
#[derive(Debug, Clone)]
pub struct Mmcli {
    program: PathBuf,
}

impl Mmcli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!("mmcli {}", args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::ModemAccess(format!("{}: {}", self.program.display(), e)))?;

        if !output.status.success() {
            return Err(Error::ModemAccess(format!(
                "mmcli {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn query(&self, args: &[String]) -> Result<KeyValues> {
        let mut args = args.to_vec();
        args.push("-K".to_string());
        Ok(KeyValues::parse(&self.run(&args).await?))
    }

    /// ModemManager client version, e.g. `mmcli 1.20.0`
    pub async fn version(&self) -> Result<String> {
        let output = self.run(&["--version".to_string()]).await?;
        Ok(output.lines().next().unwrap_or("").trim().to_string())
    }

    /// Indexes of all modems known to ModemManager
    pub async fn list_modems(&self) -> Result<Vec<String>> {
        let kv = self.query(&["-L".to_string()]).await?;
        Ok(kv
            .list("modem-list")
            .into_iter()
            .map(|path| object_index(path).to_string())
            .collect())
    }
}

/// One modem reached through `mmcli -m <index>`
#[derive(Debug, Clone)]
pub struct MmcliModem {
    mmcli: Mmcli,
    index: String,
    poll_interval: Duration,
}

impl MmcliModem {
    pub fn new(mmcli: Mmcli, index: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            mmcli,
            index: index.into(),
            poll_interval,
        }
    }

    fn modem_args(&self, action: impl Into<String>) -> Vec<String> {
        vec!["-m".to_string(), self.index.clone(), action.into()]
    }

    async fn sms_info(&self, sms: &SmsId) -> Result<KeyValues> {
        self.mmcli.query(&["-s".to_string(), sms.0.clone()]).await
    }

    async fn call_info(&self, call: &CallId) -> Result<KeyValues> {
        self.mmcli.query(&["-o".to_string(), call.0.clone()]).await
    }

    async fn poll_changes(self, tx: mpsc::Sender<PropertiesChanged>) {
        let mut last_sms: Option<Vec<SmsId>> = None;
        let mut last_calls: Option<Vec<CallId>> = None;
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            ticker.tick().await;

            match self.list_sms().await {
                Ok(list) => {
                    if list_changed(&mut last_sms, list)
                        && tx.send(PropertiesChanged::messages()).await.is_err()
                    {
                        return;
                    }
                }
                Err(e) => warn!(modem = %self.index, "Failed to poll SMS list: {}", e),
            }

            match self.list_calls().await {
                Ok(list) => {
                    if list_changed(&mut last_calls, list)
                        && tx.send(PropertiesChanged::calls()).await.is_err()
                    {
                        return;
                    }
                }
                Err(e) => warn!(modem = %self.index, "Failed to poll call list: {}", e),
            }
        }
    }
}

#[async_trait]
impl Modem for MmcliModem {
    fn name(&self) -> String {
        format!("modem {}", self.index)
    }

    fn properties_changed(&self) -> mpsc::Receiver<PropertiesChanged> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(self.clone().poll_changes(tx));
        rx
    }

    async fn list_sms(&self) -> Result<Vec<SmsId>> {
        let kv = self.mmcli.query(&self.modem_args("--messaging-list-sms")).await?;
        Ok(kv
            .list("modem.messaging.sms")
            .into_iter()
            .map(|path| SmsId(object_index(path).to_string()))
            .collect())
    }

    async fn sms_text(&self, sms: &SmsId) -> Result<String> {
        Ok(self.sms_info(sms).await?.require("sms.content.text")?.to_string())
    }

    async fn sms_number(&self, sms: &SmsId) -> Result<String> {
        Ok(self.sms_info(sms).await?.require("sms.content.number")?.to_string())
    }

    async fn sms_state(&self, sms: &SmsId) -> Result<SmsState> {
        let kv = self.sms_info(sms).await?;
        Ok(SmsState::parse(kv.require("sms.properties.state")?))
    }

    async fn delete_sms(&self, sms: &SmsId) -> Result<()> {
        self.mmcli
            .run(&self.modem_args(format!("--messaging-delete-sms={}", sms)))
            .await?;
        Ok(())
    }

    async fn create_sms(&self, destination: &str, text: &str) -> Result<SmsId> {
        let create_arg = format!(
            "--messaging-create-sms=number={},text={}",
            quote_value(destination)?,
            quote_value(text)?
        );
        let output = self.mmcli.run(&self.modem_args(create_arg)).await?;
        CREATED_SMS
            .captures(&output)
            .map(|cap| SmsId(cap[1].to_string()))
            .ok_or_else(|| Error::ModemAccess(format!("no SMS path in mmcli output: {}", output.trim())))
    }

    async fn send_sms(&self, sms: &SmsId) -> Result<()> {
        self.mmcli
            .run(&["-s".to_string(), sms.0.clone(), "--send".to_string()])
            .await?;
        Ok(())
    }

    async fn list_calls(&self) -> Result<Vec<CallId>> {
        let kv = self.mmcli.query(&self.modem_args("--voice-list-calls")).await?;
        Ok(kv
            .list("modem.voice.call")
            .into_iter()
            .map(|path| CallId(object_index(path).to_string()))
            .collect())
    }

    async fn call_number(&self, call: &CallId) -> Result<String> {
        Ok(self.call_info(call).await?.require("call.properties.number")?.to_string())
    }

    async fn call_state(&self, call: &CallId) -> Result<CallState> {
        let kv = self.call_info(call).await?;
        Ok(CallState::parse(kv.require("call.properties.state")?))
    }

    /// Create the call object and start dialing it
    async fn create_call(&self, destination: &str) -> Result<CallId> {
        let create_arg = format!("--voice-create-call=number={}", quote_value(destination)?);
        let output = self.mmcli.run(&self.modem_args(create_arg)).await?;
        let call = CREATED_CALL
            .captures(&output)
            .map(|cap| CallId(cap[1].to_string()))
            .ok_or_else(|| Error::ModemAccess(format!("no call path in mmcli output: {}", output.trim())))?;

        self.mmcli
            .run(&["-o".to_string(), call.0.clone(), "--start".to_string()])
            .await?;
        Ok(call)
    }

    async fn setup_location(&self, sources: &[LocationSource], signal_location: bool) -> Result<()> {
        let mut args = vec!["-m".to_string(), self.index.clone()];
        for source in sources {
            args.push(
                match source {
                    LocationSource::GpsNmea => "--location-enable-gps-nmea",
                    LocationSource::ThreeGppLacCi => "--location-enable-3gpp",
                }
                .to_string(),
            );
        }
        if signal_location {
            args.push("--location-set-enable-signal".to_string());
        }
        self.mmcli.run(&args).await?;
        Ok(())
    }

    async fn location(&self) -> Result<LocationFix> {
        let kv = self.mmcli.query(&self.modem_args("--location-get")).await?;
        Ok(location_from(&kv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMS_LIST: &str = "\
modem.messaging.sms.length    : 2
modem.messaging.sms.value[1]  : /org/freedesktop/ModemManager1/SMS/4
modem.messaging.sms.value[2]  : /org/freedesktop/ModemManager1/SMS/7
";

    const SMS_INFO: &str = "\
sms.dbus-path                 : /org/freedesktop/ModemManager1/SMS/4
sms.content.number            : +15551234
sms.content.text              : see you at 10:30
sms.content.data              : --
sms.properties.pdu-type       : deliver
sms.properties.state          : received
";

    #[test]
    fn test_parse_list() {
        let kv = KeyValues::parse(SMS_LIST);
        assert_eq!(kv.get("modem.messaging.sms.length"), Some("2"));
        assert_eq!(
            kv.list("modem.messaging.sms"),
            vec![
                "/org/freedesktop/ModemManager1/SMS/4",
                "/org/freedesktop/ModemManager1/SMS/7"
            ]
        );
    }

    #[test]
    fn test_parse_values_with_colons_and_dashes() {
        let kv = KeyValues::parse(SMS_INFO);
        assert_eq!(kv.get("sms.content.text"), Some("see you at 10:30"));
        assert_eq!(kv.get("sms.content.data"), Some(""));
        assert_eq!(kv.get("sms.properties.state"), Some("received"));
        assert!(kv.require("sms.content.missing").is_err());
    }

    #[test]
    fn test_empty_list() {
        let kv = KeyValues::parse("modem.voice.call.length : 0\n");
        assert!(kv.list("modem.voice.call").is_empty());
    }

    #[test]
    fn test_object_index() {
        assert_eq!(object_index("/org/freedesktop/ModemManager1/SMS/12"), "12");
        assert_eq!(object_index("3"), "3");
    }

    #[test]
    fn test_quote_value() {
        assert_eq!(quote_value("hello").unwrap(), "'hello'");
        assert_eq!(quote_value("don't").unwrap(), "\"don't\"");
        assert!(quote_value("it's \"bad\"").is_err());
    }

    #[test]
    fn test_created_paths() {
        let out = "Successfully created new SMS: /org/freedesktop/ModemManager1/SMS/21 (unknown)\n";
        assert_eq!(&CREATED_SMS.captures(out).unwrap()[1], "21");
        let out = "Successfully created new call: /org/freedesktop/ModemManager1/Call/3\n";
        assert_eq!(&CREATED_CALL.captures(out).unwrap()[1], "3");
    }

    #[test]
    fn test_location_formatting() {
        let kv = KeyValues::parse(
            "\
modem.location.3gpp.mcc       : 262
modem.location.3gpp.mnc       : 01
modem.location.3gpp.lac       : 00A1
modem.location.3gpp.tac       : --
modem.location.3gpp.cid       : 01B2C3D4
modem.location.gps.nmea.length : 2
modem.location.gps.nmea.value[1] : $GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47
modem.location.gps.nmea.value[2] : $GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A
",
        );
        let fix = location_from(&kv);
        assert_eq!(fix.three_gpp_lac_ci, "262,01,00A1,01B2C3D4");
        assert!(fix.gps_nmea.starts_with("$GPGGA"));
        assert_eq!(fix.gps_nmea.lines().count(), 2);
    }

    #[test]
    fn test_location_without_fix() {
        let fix = location_from(&KeyValues::parse("modem.location.3gpp.mcc : --\n"));
        assert_eq!(fix, LocationFix::default());
    }

    #[test]
    fn test_list_changed() {
        let mut last: Option<Vec<u32>> = None;
        // Empty on first poll: nothing waiting
        assert!(!list_changed(&mut last, vec![]));
        assert!(list_changed(&mut last, vec![1]));
        assert!(!list_changed(&mut last, vec![1]));
        assert!(list_changed(&mut last, vec![1, 2]));
        assert!(list_changed(&mut last, vec![]));

        let mut fresh: Option<Vec<u32>> = None;
        // Items already stored at startup are announced
        assert!(list_changed(&mut fresh, vec![5]));
    }
}
