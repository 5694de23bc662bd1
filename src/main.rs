//! Matrix Modem Bridge Daemon
//!
//! Logs into Matrix, attaches to every ModemManager modem and relays between them.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use matrix_modem_bridge::bridge::Bridge;
use matrix_modem_bridge::chat::matrix::MatrixClient;
use matrix_modem_bridge::chat::ChatTransport;
use matrix_modem_bridge::command::Admission;
use matrix_modem_bridge::config::{
    Config, DEFAULT_BATTERY_POLL_SECS, DEFAULT_LOW_BATTERY_THRESHOLD, DEFAULT_MODEM_POLL_MS,
    DEFAULT_RETRY_BACKOFF_SECS, DEFAULT_SYNC_TIMEOUT_MS,
};
use matrix_modem_bridge::delivery::DeliveryGuarantor;
use matrix_modem_bridge::executor::CommandExecutor;
use matrix_modem_bridge::modem::mmcli::{Mmcli, MmcliModem};
use matrix_modem_bridge::modem::{enable_location, Modem};
use matrix_modem_bridge::power::{PowerMonitor, UPowerBattery};
use matrix_modem_bridge::routing::RoutingTable;
use matrix_modem_bridge::translator::ModemWorker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Matrix Modem Bridge - SMS, calls and location over Matrix
#[derive(Parser)]
#[command(name = "matrix-modem-bridge")]
#[command(about = "Relay SMS, calls and location between Matrix rooms and a ModemManager modem")]
struct Cli {
    /// Matrix homeserver URL
    #[arg(long, env = "BRIDGE_HOMESERVER")]
    homeserver: String,

    /// Matrix username localpart
    #[arg(long, env = "BRIDGE_USERNAME")]
    username: String,

    /// Matrix password
    #[arg(long, env = "BRIDGE_PASSWORD")]
    password: String,

    /// Matrix room where default output can go
    #[arg(long = "default-room-id", env = "BRIDGE_DEFAULT_ROOM_ID")]
    default_room_id: String,

    /// Matrix userid that may command this bot, others are ignored
    #[arg(long, env = "BRIDGE_USERID")]
    userid: String,

    /// UPower battery name to monitor for power level (e.g. battery_BAT0)
    #[arg(long, env = "BRIDGE_BATTERY")]
    battery: String,

    /// Path to the mmcli binary
    #[arg(long, default_value = "mmcli")]
    mmcli: PathBuf,

    /// Path to the upower binary
    #[arg(long, default_value = "upower")]
    upower: PathBuf,

    /// Seconds between delivery attempts of an inbound SMS
    #[arg(long, default_value_t = DEFAULT_RETRY_BACKOFF_SECS)]
    retry_backoff_secs: u64,

    /// Seconds between battery checks
    #[arg(long, default_value_t = DEFAULT_BATTERY_POLL_SECS)]
    battery_poll_secs: u64,

    /// Warn when the battery percentage is below this value
    #[arg(long, default_value_t = DEFAULT_LOW_BATTERY_THRESHOLD)]
    low_battery_threshold: f64,

    /// Milliseconds between modem SMS/call list polls
    #[arg(long, default_value_t = DEFAULT_MODEM_POLL_MS)]
    modem_poll_ms: u64,

    /// Matrix /sync long-poll timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_SYNC_TIMEOUT_MS)]
    sync_timeout_ms: u64,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::new(
            self.homeserver,
            self.username,
            self.password,
            self.default_room_id,
            self.userid,
            self.battery,
        );
        config.mmcli = self.mmcli;
        config.upower = self.upower;
        config.retry_backoff = Duration::from_secs(self.retry_backoff_secs);
        config.battery_poll_interval = Duration::from_secs(self.battery_poll_secs);
        config.low_battery_threshold = self.low_battery_threshold;
        config.modem_poll_interval = Duration::from_millis(self.modem_poll_ms);
        config.sync_timeout_ms = self.sync_timeout_ms;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    cmd_run(cli.into_config()).await
}

// ============================================================================
// Daemon
// ============================================================================

async fn cmd_run(config: Config) -> anyhow::Result<()> {
    info!("Logging into {} as {}", config.homeserver, config.username);
    let matrix = Arc::new(
        MatrixClient::login(&config.homeserver, &config.username, &config.password)
            .await
            .context("login failed")?,
    );
    info!("Logged in as {}", matrix.user_id());
    let chat: Arc<dyn ChatTransport> = matrix.clone();

    chat.join_room(&config.default_room)
        .await
        .with_context(|| format!("joining default room {}", config.default_room))?;

    // Modems
    let mmcli = Mmcli::new(&config.mmcli);
    let version = mmcli.version().await.context("querying ModemManager")?;
    info!("ModemManager version: {}", version);

    let indexes = mmcli.list_modems().await.context("listing modems")?;
    if indexes.is_empty() {
        bail!("no modem found");
    }
    let modems: Vec<Arc<dyn Modem>> = indexes
        .into_iter()
        .map(|index| {
            Arc::new(MmcliModem::new(mmcli.clone(), index, config.modem_poll_interval)) as Arc<dyn Modem>
        })
        .collect();

    let routing = Arc::new(RoutingTable::new());
    let guarantor = Arc::new(DeliveryGuarantor::new(
        chat.clone(),
        routing.clone(),
        config.default_room.clone(),
        config.retry_backoff,
    ));

    for modem in &modems {
        enable_location(modem.as_ref())
            .await
            .with_context(|| format!("setting up location on {}", modem.name()))?;
    }

    // Battery
    let battery = Arc::new(UPowerBattery::new(&config.upower, &config.battery));
    tokio::spawn(
        PowerMonitor::new(
            battery,
            chat.clone(),
            config.default_room.clone(),
            config.low_battery_threshold,
            config.battery_poll_interval,
        )
        .run(),
    );

    // Commands go to the first modem
    let executor = CommandExecutor::new(modems[0].clone(), chat.clone());
    let admission = Admission::new(config.allowed_user.clone(), Utc::now().timestamp_millis());
    let bridge = Bridge::new(chat, routing, admission, executor);

    // Stored SMS are routed only once the first sync has filled the routing table
    for modem in &modems {
        tokio::spawn(
            ModemWorker::new(modem.clone(), guarantor.clone()).run_after(bridge.routing_ready()),
        );
    }

    let (tx, rx) = mpsc::channel(256);
    let sync = tokio::spawn({
        let matrix = matrix.clone();
        let timeout = config.sync_timeout_ms;
        let retry = config.sync_retry_delay;
        async move { matrix.sync_forever(tx, timeout, retry).await }
    });

    tokio::select! {
        _ = bridge.run(rx) => warn!("Chat sync ended"),
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    sync.abort();
    Ok(())
}
