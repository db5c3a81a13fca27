// MIT License - Copyright (c) 2026 Peter Wright
// MQTT bridge

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, interval, sleep};
use tracing::{debug, error, info, warn};

use pertronic_mimic::{
    Condition, LinkHealth, MimicPanel, PanelConfig, PanelEvent, ResyncPolicy, TriState,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "pertronic2mqtt")]
#[command(about = "Bridge between a Pertronic F100A mimic interface and MQTT")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    panel: PanelToml,
    mqtt: MqttToml,
    #[serde(default)]
    lamps: LampsToml,
}

#[derive(Debug, Deserialize)]
struct PanelToml {
    #[serde(default = "default_panel_name")]
    name: String,
    host: String,
    #[serde(default = "default_panel_port")]
    port: u16,
    #[serde(default = "default_read_timeout")]
    read_timeout_ms: u64,
    #[serde(default = "default_probe_timeout")]
    probe_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    max_reconnect_attempts: u32,
    /// Skip unrecognized bytes instead of waiting for the stream to realign
    #[serde(default)]
    scan_forward: bool,
}

fn default_panel_name() -> String {
    "Pertronic F100A".to_string()
}
fn default_panel_port() -> u16 {
    20108
}
fn default_read_timeout() -> u64 {
    1000
}
fn default_probe_timeout() -> u64 {
    5000
}
fn default_reconnect_delay() -> u64 {
    10000
}
fn default_max_reconnect_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_subscribe_topic")]
    subscribe_topic: String,
    #[serde(default = "default_publish_topic")]
    publish_topic: String,
    #[serde(default = "default_snapshot_interval")]
    snapshot_interval_secs: u64,
}

fn default_client_id() -> String {
    "pertronic-bridge".to_string()
}
fn default_subscribe_topic() -> String {
    "pertronic/cmd".to_string()
}
fn default_publish_topic() -> String {
    "pertronic".to_string()
}
fn default_snapshot_interval() -> u64 {
    60
}

/// How many lamps of each bank are wired up.
///
/// Bank counts are offsets into 1-99, 100-199 and 200-256: `led_100_199 = 5`
/// exposes lamps 100 through 105.
#[derive(Debug, Clone, Copy, Deserialize)]
struct LampsToml {
    #[serde(default = "default_led_0_99")]
    led_0_99: u32,
    #[serde(default = "default_led_100_199")]
    led_100_199: u32,
    #[serde(default = "default_led_200_256")]
    led_200_256: u32,
}

fn default_led_0_99() -> u32 {
    99
}
fn default_led_100_199() -> u32 {
    99
}
fn default_led_200_256() -> u32 {
    56
}

impl Default for LampsToml {
    fn default() -> Self {
        Self {
            led_0_99: default_led_0_99(),
            led_100_199: default_led_100_199(),
            led_200_256: default_led_200_256(),
        }
    }
}

impl LampsToml {
    fn validate(&self) -> Result<()> {
        if self.led_0_99 > 99 {
            anyhow::bail!("lamps.led_0_99 must be 0-99, got {}", self.led_0_99);
        }
        if self.led_100_199 > 99 {
            anyhow::bail!("lamps.led_100_199 must be 0-99, got {}", self.led_100_199);
        }
        if self.led_200_256 > 56 {
            anyhow::bail!("lamps.led_200_256 must be 0-56, got {}", self.led_200_256);
        }
        Ok(())
    }

    fn is_exposed(&self, lamp: u32) -> bool {
        let (base, count) = match lamp {
            1..=99 => (0, self.led_0_99),
            100..=199 => (100, self.led_100_199),
            200..=256 => (200, self.led_200_256),
            _ => return false,
        };
        count > 0 && lamp <= base + count
    }

    fn exposed(&self) -> Vec<u32> {
        (1..=256).filter(|&lamp| self.is_exposed(lamp)).collect()
    }
}

fn build_panel_config(toml: &PanelToml) -> Result<PanelConfig> {
    let resync = if toml.scan_forward {
        ResyncPolicy::ScanForward
    } else {
        ResyncPolicy::Stall
    };
    let config = PanelConfig::builder()
        .host(&toml.host)
        .port(toml.port)
        .read_timeout_ms(toml.read_timeout_ms)
        .probe_timeout_ms(toml.probe_timeout_ms)
        .reconnect_delay_ms(toml.reconnect_delay_ms)
        .max_reconnect_attempts(toml.max_reconnect_attempts)
        .resync_policy(resync)
        .build();
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// MQTT JSON types
// ---------------------------------------------------------------------------

// Published messages share a flat {now, op, ...} structure

#[derive(Serialize)]
struct MqttLampEvent {
    now: u64,
    op: String,
    lamp: u16,
    on: bool,
}

#[derive(Serialize)]
struct MqttConditionEvent {
    now: u64,
    op: String,
    condition: String,
    on: Option<bool>,
}

#[derive(Serialize)]
struct MqttLcdEvent {
    now: u64,
    op: String,
    line1: Option<String>,
    line2: Option<String>,
}

#[derive(Serialize)]
struct MqttLinkEvent {
    now: u64,
    op: String,
    health: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempt: Option<u32>,
}

#[derive(Serialize)]
struct MqttSnapshot {
    now: u64,
    op: String,
    state: MqttSnapshotState,
}

#[derive(Serialize)]
struct MqttSnapshotState {
    panel: String,
    link: String,
    heartbeat: Option<bool>,
    global: MqttGlobalLeds,
    conditions: BTreeMap<&'static str, Option<bool>>,
    lcd: MqttLcdState,
    lamps: Vec<MqttLampState>,
}

#[derive(Serialize)]
struct MqttGlobalLeds {
    normal: Option<bool>,
    fire: Option<bool>,
    defect: Option<bool>,
    evacuate: Option<bool>,
    #[serde(rename = "silenceAlarms")]
    silence_alarms: Option<bool>,
}

#[derive(Serialize)]
struct MqttLcdState {
    line1: Option<String>,
    line2: Option<String>,
}

#[derive(Serialize)]
struct MqttLampState {
    lamp: u32,
    on: Option<bool>,
}

// CMD_ACK response
#[derive(Serialize)]
struct MqttCmdAck {
    now: u64,
    op: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    src: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

// Inbound command (subscribed)
#[derive(Deserialize)]
struct MqttCommand {
    op: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

async fn publish_json(client: &AsyncClient, topic: &str, payload: &impl Serialize, retain: bool) {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = client.publish(topic, QoS::AtLeastOnce, retain, json).await {
                error!("Failed to publish to {topic}: {e}");
            }
        }
        Err(e) => error!("Failed to serialize MQTT payload: {e}"),
    }
}

async fn publish_cmd_ack(
    client: &AsyncClient,
    topic: &str,
    success: bool,
    src: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
) {
    let msg = MqttCmdAck {
        now: now_epoch_ms(),
        op: "CMD_ACK".to_string(),
        success,
        src,
        data,
    };
    publish_json(client, topic, &msg, false).await;
}

async fn publish_link(client: &AsyncClient, topic: &str, health: LinkHealth) {
    let attempt = match health {
        LinkHealth::Recovering { attempt } => Some(attempt),
        _ => None,
    };
    let msg = MqttLinkEvent {
        now: now_epoch_ms(),
        op: "LINK".to_string(),
        health: health.as_str().to_string(),
        attempt,
    };
    publish_json(client, topic, &msg, true).await;
}

async fn build_snapshot(panel: &MimicPanel, name: &str, lamps: &LampsToml) -> MqttSnapshot {
    let state = panel.snapshot().await;
    let global = state.led_global;

    MqttSnapshot {
        now: now_epoch_ms(),
        op: "SNAPSHOT".to_string(),
        state: MqttSnapshotState {
            panel: name.to_string(),
            link: panel.health().as_str().to_string(),
            heartbeat: state.heartbeat.status,
            global: MqttGlobalLeds {
                normal: global.normal,
                fire: global.fire,
                defect: global.defect,
                evacuate: global.evacuate,
                silence_alarms: global.silence_alarms,
            },
            conditions: state
                .lcd_conditions
                .iter()
                .map(|(c, v)| (c.as_str(), v))
                .collect(),
            lcd: MqttLcdState {
                line1: state.lcd_text(1).map(str::to_string),
                line2: state.lcd_text(2).map(str::to_string),
            },
            lamps: lamps
                .exposed()
                .into_iter()
                .map(|lamp| MqttLampState {
                    lamp,
                    on: state.led_state(lamp),
                })
                .collect(),
        },
    }
}

async fn publish_snapshot(
    client: &AsyncClient,
    topic: &str,
    panel: &MimicPanel,
    name: &str,
    lamps: &LampsToml,
) {
    let snapshot = build_snapshot(panel, name, lamps).await;
    publish_json(client, topic, &snapshot, true).await;
}

// ---------------------------------------------------------------------------
// Panel callbacks → MQTT
// ---------------------------------------------------------------------------

/// Values handed off from the panel's I/O task.
#[derive(Debug, Clone, PartialEq)]
enum Update {
    Lamp(u16, bool),
    Condition(Condition, TriState),
    Lcd(Option<String>, Option<String>),
}

/// Callbacks fire on every frame; only values that differ from the last
/// published one go out.
#[derive(Default)]
struct Dedup {
    lamps: HashMap<u16, bool>,
    conditions: HashMap<Condition, TriState>,
    lcd: Option<(Option<String>, Option<String>)>,
}

impl Dedup {
    fn is_new(&mut self, update: &Update) -> bool {
        match update {
            Update::Lamp(lamp, on) => self.lamps.insert(*lamp, *on) != Some(*on),
            Update::Condition(condition, value) => {
                self.conditions.insert(*condition, *value) != Some(*value)
            }
            Update::Lcd(l1, l2) => {
                let next = (l1.clone(), l2.clone());
                if self.lcd.as_ref() == Some(&next) {
                    return false;
                }
                self.lcd = Some(next);
                true
            }
        }
    }
}

async fn publish_update(client: &AsyncClient, topic: &str, update: Update) {
    let now = now_epoch_ms();
    match update {
        Update::Lamp(lamp, on) => {
            debug!("Lamp {lamp} -> {on}");
            let msg = MqttLampEvent {
                now,
                op: "LAMP".to_string(),
                lamp,
                on,
            };
            publish_json(client, topic, &msg, false).await;
        }
        Update::Condition(condition, on) => {
            info!("{} -> {:?}", condition.label(), on);
            let msg = MqttConditionEvent {
                now,
                op: "CONDITION".to_string(),
                condition: condition.as_str().to_string(),
                on,
            };
            publish_json(client, topic, &msg, false).await;
        }
        Update::Lcd(line1, line2) => {
            debug!("LCD {:?} / {:?}", line1, line2);
            let msg = MqttLcdEvent {
                now,
                op: "LCD".to_string(),
                line1,
                line2,
            };
            publish_json(client, topic, &msg, true).await;
        }
    }
}

/// Register callbacks that forward into `tx`. Sending on an unbounded channel
/// never blocks the panel's I/O task.
async fn register_callbacks(
    panel: &MimicPanel,
    lamps: &LampsToml,
    tx: &mpsc::UnboundedSender<Update>,
) -> Result<()> {
    for condition in Condition::ALL {
        let tx = tx.clone();
        panel
            .subscribe_condition_key(condition, move |value| {
                let _ = tx.send(Update::Condition(condition, value));
            })
            .await;
    }

    let exposed = lamps.exposed();
    info!("Exposing {} lamps", exposed.len());
    for lamp in exposed {
        let tx = tx.clone();
        panel
            .subscribe_lamp(lamp, move |on| {
                let _ = tx.send(Update::Lamp(lamp as u16, on));
            })
            .await?;
    }

    let tx = tx.clone();
    panel
        .subscribe_lcd(move |l1, l2| {
            let _ = tx.send(Update::Lcd(l1.map(str::to_string), l2.map(str::to_string)));
        })
        .await;
    Ok(())
}

// ---------------------------------------------------------------------------
// MQTT command handler
// ---------------------------------------------------------------------------

async fn handle_command(
    payload_str: &str,
    cmd: MqttCommand,
    client: &AsyncClient,
    topic: &str,
    panel: &MimicPanel,
    name: &str,
    lamps: &LampsToml,
) {
    // Parse the raw payload as a JSON value for the CMD_ACK src field
    let src_json = serde_json::from_str::<serde_json::Value>(payload_str).ok();

    match cmd.op.as_str() {
        "SNAPSHOT" => {
            debug!("Command: SNAPSHOT");
            let snapshot = build_snapshot(panel, name, lamps).await;
            let snapshot_value = serde_json::to_value(&snapshot).ok();
            publish_json(client, topic, &snapshot, true).await;
            publish_cmd_ack(client, topic, true, src_json, snapshot_value).await;
        }
        "PING" => {
            info!("Command: PING");
            publish_cmd_ack(client, topic, true, src_json, None).await;
        }
        "PROBE" => {
            info!("Command: PROBE");
            let success = match panel.test_connection().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Probe failed: {e}");
                    false
                }
            };
            publish_cmd_ack(client, topic, success, src_json, None).await;
        }
        other => {
            warn!("Unknown command: {other}");
            publish_cmd_ack(client, topic, false, src_json, None).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Panel start
// ---------------------------------------------------------------------------

/// Delay between start attempts after a config reload.
const RESTART_RETRY: Duration = Duration::from_secs(30);

/// Start the panel. The first start of the process fails fast so a bad setup
/// is reported; after a reload the panel may be briefly unreachable, so keep
/// retrying until it answers or `stop` resolves.
///
/// Returns `Ok(false)` when stopped before the panel came up.
async fn start_panel(
    panel: &mut MimicPanel,
    first_start: bool,
    retry: Duration,
    stop: impl Future<Output = ()>,
) -> Result<bool> {
    tokio::pin!(stop);
    loop {
        match panel.start().await {
            Ok(()) => return Ok(true),
            Err(e) if first_start => {
                return Err(anyhow::Error::new(e).context("Panel interface is not reachable"));
            }
            Err(e) => {
                warn!("Panel not reachable, retrying in {}s: {e}", retry.as_secs());
                tokio::select! {
                    _ = sleep(retry) => {}
                    _ = &mut stop => return Ok(false),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=pertronic_mimic=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut first_start = true;

    loop {
        let panel_config = build_panel_config(&config.panel)?;
        let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;
        let publish_topic = config.mqtt.publish_topic.clone();
        let subscribe_topic = config.mqtt.subscribe_topic.clone();
        let panel_name = config.panel.name.clone();
        let lamps = config.lamps;

        let mut panel = MimicPanel::new(panel_config);
        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        register_callbacks(&panel, &lamps, &update_tx).await?;
        let event_rx = panel.subscribe();

        info!(
            "Connecting to {} at {}",
            panel_name,
            panel.config().address()
        );
        let stop = async {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT while starting"),
                _ = sigterm.recv() => info!("Received SIGTERM while starting"),
            }
        };
        if !start_panel(&mut panel, first_start, RESTART_RETRY, stop).await? {
            break;
        }
        first_start = false;
        let panel = Arc::new(Mutex::new(panel));

        // Set up MQTT
        let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 256);

        // Task 1: callback updates
        let client_updates = client.clone();
        let topic_updates = publish_topic.clone();
        let update_handle = tokio::spawn(async move {
            let mut dedup = Dedup::default();
            while let Some(update) = update_rx.recv().await {
                if dedup.is_new(&update) {
                    publish_update(&client_updates, &topic_updates, update).await;
                }
            }
        });

        // Task 2: link health and connection events
        let client_events = client.clone();
        let topic_events = publish_topic.clone();
        let event_handle = tokio::spawn(async move {
            let mut rx = event_rx;
            loop {
                match rx.recv().await {
                    Ok(PanelEvent::HealthChanged(health)) => {
                        publish_link(&client_events, &topic_events, health).await;
                    }
                    Ok(PanelEvent::ReconnectFailed { attempts }) => {
                        error!("Panel unreachable after {attempts} reconnect attempts");
                    }
                    Ok(PanelEvent::Heartbeat) => info!("Panel heartbeat received"),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged, missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        info!("Event channel closed");
                        break;
                    }
                }
            }
        });

        // Task 3: MQTT event loop (receives messages, handles commands)
        let panel_cmds = Arc::clone(&panel);
        let client_cmds = client.clone();
        let topic_cmds = publish_topic.clone();
        let sub_topic = subscribe_topic.clone();
        let name_cmds = panel_name.clone();
        let mqtt_handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // rumqttc does not resubscribe after a broker reconnect
                        info!("MQTT: connected, subscribing to {sub_topic}");
                        if let Err(e) = client_cmds.subscribe(&sub_topic, QoS::AtLeastOnce).await {
                            error!("Failed to subscribe to {sub_topic}: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        if msg.topic == sub_topic {
                            let payload = String::from_utf8_lossy(&msg.payload);
                            match serde_json::from_str::<MqttCommand>(&payload) {
                                Ok(cmd) => {
                                    debug!("MQTT command received: {payload}");
                                    let panel_lock = panel_cmds.lock().await;
                                    handle_command(
                                        &payload,
                                        cmd,
                                        &client_cmds,
                                        &topic_cmds,
                                        &panel_lock,
                                        &name_cmds,
                                        &lamps,
                                    )
                                    .await;
                                }
                                Err(e) => {
                                    warn!("Failed to parse MQTT command: {e}");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Task 4: snapshot timer
        let panel_snap = Arc::clone(&panel);
        let client_snap = client.clone();
        let topic_snap = publish_topic.clone();
        let name_snap = panel_name.clone();
        let snapshot_interval_secs = config.mqtt.snapshot_interval_secs.max(1);
        let snap_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(snapshot_interval_secs));
            loop {
                ticker.tick().await;
                let panel_lock = panel_snap.lock().await;
                publish_snapshot(&client_snap, &topic_snap, &panel_lock, &name_snap, &lamps).await;
            }
        });

        // Wait for a signal
        info!("MQTT bridge running. Send SIGHUP to restart, SIGINT/SIGTERM to stop.");
        let restart = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                false
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading config and restarting connections...");
                true
            }
        };

        // Abort tasks
        mqtt_handle.abort();
        snap_handle.abort();
        event_handle.abort();

        // Stop panel; its callbacks hold the last update senders
        {
            let mut panel_lock = panel.lock().await;
            if let Err(e) = panel_lock.stop().await {
                warn!("Error stopping panel: {e}");
            }
        }
        drop(update_tx);
        drop(panel);
        update_handle.abort();

        if !restart {
            break;
        }

        // Reload config from disk; keep previous config on failure
        info!("Reloading config from {}", cli.config);
        match load_config(&cli.config) {
            Ok(new_config) => {
                config = new_config;
                info!("Config reloaded successfully");
            }
            Err(e) => warn!("Failed to reload config, keeping previous: {e:#}"),
        }

        info!("Reconnecting...");
    }

    info!("Shutdown complete");
    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).context("Failed to read config file")?;
    let config: Config = toml::from_str(&text).context("Failed to parse config file")?;
    config.lamps.validate()?;
    build_panel_config(&config.panel)?;
    parse_mqtt_url(&config.mqtt.url)?;
    Ok(config)
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port).
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port_str) = stripped
        .rsplit_once(':')
        .context("MQTT URL must be in format mqtt://host:port")?;

    let port: u16 = port_str.parse().context("Invalid MQTT port number")?;

    Ok((host.to_string(), port))
}
