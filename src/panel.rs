// MIT License - Copyright (c) 2026 Peter Wright
// Lifecycle controller and I/O loop for the F100A mimic client

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PanelConfig;
use crate::decoder::{Decoded, LcdLineUpdate, LedMimicUpdate, decode_frame};
use crate::error::{MimicError, Result};
use crate::event::{EventReceiver, EventSender, LinkHealth, PanelEvent, event_channel};
use crate::protocol::FrameKind;
use crate::state::{Condition, Heartbeat, LedGlobal, PanelState, TriState};
use crate::subscription::{SubscriptionRegistry, invoke_guarded};
use crate::transport::connection::{ConnectionManager, Recovery, probe, shutdown_signalled};
use crate::transport::reader::{FrameReader, FrameStats};

/// State shared between the public handle and the I/O task.
struct Shared {
    config: PanelConfig,
    state: RwLock<PanelState>,
    registry: RwLock<SubscriptionRegistry>,
    stats: RwLock<FrameStats>,
    event_tx: EventSender,
    health_tx: watch::Sender<LinkHealth>,
}

impl Shared {
    fn emit(&self, event: PanelEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_health(&self, health: LinkHealth) {
        let modified = self.health_tx.send_if_modified(|current| {
            if *current == health {
                return false;
            }
            *current = health;
            true
        });
        if modified {
            debug!("Link health: {}", health);
            self.emit(PanelEvent::HealthChanged(health));
        }
    }
}

/// Client for the mimic stream of a Pertronic F100A fire panel.
///
/// # Example
///
/// ```no_run
/// use pertronic_mimic::{MimicPanel, PanelConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = PanelConfig::builder().host("192.168.1.50").build();
///     let mut panel = MimicPanel::new(config);
///
///     panel.subscribe_condition("fire", |on| println!("fire: {:?}", on)).await?;
///     panel.subscribe_lamp(17, |on| println!("lamp 17: {}", on)).await?;
///
///     panel.start().await?;
///     tokio::signal::ctrl_c().await?;
///     panel.stop().await?;
///     Ok(())
/// }
/// ```
pub struct MimicPanel {
    shared: Arc<Shared>,
    io_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl MimicPanel {
    pub fn new(config: PanelConfig) -> Self {
        let (event_tx, _event_rx) = event_channel(config.event_capacity.max(1));
        let (health_tx, _health_rx) = watch::channel(LinkHealth::Stopped);
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(PanelState::default()),
                registry: RwLock::new(SubscriptionRegistry::new()),
                stats: RwLock::new(FrameStats::default()),
                event_tx,
                health_tx,
            }),
            io_handle: None,
            shutdown_tx: None,
        }
    }

    pub fn config(&self) -> &PanelConfig {
        &self.shared.config
    }

    // --- Lifecycle ---

    /// Probe the interface and, if it answers, start the background I/O task.
    ///
    /// All state is reset to unknown. Nothing is started when the probe fails.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(MimicError::AlreadyRunning);
        }
        // A task that exited on its own still needs reaping.
        self.reap().await;

        self.shared.config.validate()?;
        self.test_connection().await?;

        *self.shared.state.write().await = PanelState::default();
        *self.shared.stats.write().await = FrameStats::default();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();
        self.io_handle = Some(tokio::spawn(io_loop(shared, shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
        info!("Mimic client started for {}", self.shared.config.address());
        Ok(())
    }

    /// Stop the I/O task and wait for it to exit.
    ///
    /// Once this returns no further frame is decoded and no callback runs.
    pub async fn stop(&mut self) -> Result<()> {
        if self.io_handle.is_none() {
            return Err(MimicError::NotRunning);
        }
        info!("Stopping mimic client");
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(true);
        }
        self.reap().await;
        self.shared.set_health(LinkHealth::Stopped);
        Ok(())
    }

    async fn reap(&mut self) {
        self.shutdown_tx = None;
        if let Some(handle) = self.io_handle.take() {
            if let Err(e) = handle.await {
                error!("I/O task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.io_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Check that the configured interface accepts connections.
    pub async fn test_connection(&self) -> Result<()> {
        let config = &self.shared.config;
        probe(&config.address(), config.probe_timeout()).await
    }

    /// Check an arbitrary address, e.g. while validating new settings.
    pub async fn test_connection_to(&self, host: &str, port: u16) -> Result<()> {
        probe(&format!("{}:{}", host, port), self.shared.config.probe_timeout()).await
    }

    // --- State accessors ---

    /// Lamp 1-256; anything else is unknown.
    pub async fn led_state(&self, lamp: u32) -> TriState {
        self.shared.state.read().await.led_state(lamp)
    }

    /// Named condition; unrecognized names are unknown.
    pub async fn condition_state(&self, name: &str) -> TriState {
        self.shared.state.read().await.condition_state(name)
    }

    pub async fn condition(&self, condition: Condition) -> TriState {
        self.shared.state.read().await.lcd_conditions.get(condition)
    }

    /// Text of LCD line 1 or 2, `None` until the line has been received.
    pub async fn lcd_text(&self, line: u8) -> Result<Option<String>> {
        let state = self.shared.state.read().await;
        let lcd = state.lcd_line(line).ok_or(MimicError::InvalidLcdLine { line })?;
        Ok(lcd.display_text.clone())
    }

    pub async fn led_global(&self) -> LedGlobal {
        self.shared.state.read().await.led_global
    }

    pub async fn heartbeat(&self) -> Heartbeat {
        self.shared.state.read().await.heartbeat
    }

    /// Consistent copy of everything mirrored so far.
    pub async fn snapshot(&self) -> PanelState {
        self.shared.state.read().await.clone()
    }

    pub async fn stats(&self) -> FrameStats {
        *self.shared.stats.read().await
    }

    pub fn health(&self) -> LinkHealth {
        *self.shared.health_tx.borrow()
    }

    pub fn watch_health(&self) -> watch::Receiver<LinkHealth> {
        self.shared.health_tx.subscribe()
    }

    // --- Subscriptions ---

    /// Call `callback` with the lamp's value on every LED mimic frame.
    pub async fn subscribe_lamp(
        &self,
        lamp: u32,
        callback: impl Fn(bool) + Send + Sync + 'static,
    ) -> Result<()> {
        self.shared
            .registry
            .write()
            .await
            .add_lamp(lamp, Arc::new(callback))
    }

    /// Call `callback` with the condition's value on every LCD line frame.
    pub async fn subscribe_condition(
        &self,
        name: &str,
        callback: impl Fn(TriState) + Send + Sync + 'static,
    ) -> Result<()> {
        let condition = Condition::from_name(name).ok_or_else(|| MimicError::UnknownCondition {
            name: name.to_string(),
        })?;
        self.subscribe_condition_key(condition, callback).await;
        Ok(())
    }

    pub async fn subscribe_condition_key(
        &self,
        condition: Condition,
        callback: impl Fn(TriState) + Send + Sync + 'static,
    ) {
        self.shared
            .registry
            .write()
            .await
            .add_condition(condition, Arc::new(callback));
    }

    /// Call `callback` with the text of both LCD lines on every LCD line frame.
    pub async fn subscribe_lcd(
        &self,
        callback: impl Fn(Option<&str>, Option<&str>) + Send + Sync + 'static,
    ) {
        self.shared.registry.write().await.add_lcd(Arc::new(callback));
    }

    /// Receive change events without blocking the I/O task.
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.event_tx.subscribe()
    }
}

impl Drop for MimicPanel {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(h) = self.io_handle.take() {
            h.abort();
        }
    }
}

/// The single background task: read, split into frames, decode, notify.
async fn io_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    let config = &shared.config;
    let mut conn = ConnectionManager::new(config);
    let mut reader = FrameReader::new(config.resync_policy, config.max_pending_bytes);

    shared.set_health(LinkHealth::Connecting);
    let connected = tokio::select! {
        r = conn.connect() => r,
        _ = shutdown_signalled(&mut shutdown_rx) => {
            shared.set_health(LinkHealth::Stopped);
            return;
        }
    };
    match connected {
        Ok(()) => {
            shared.set_health(LinkHealth::Connected);
            shared.emit(PanelEvent::Connected);
        }
        Err(e) => warn!("Initial connection failed: {}", e),
    }

    'outer: loop {
        let read = tokio::select! {
            r = conn.read() => r.map(|data| reader.extend(data)),
            _ = shutdown_signalled(&mut shutdown_rx) => break,
        };

        if let Err(e) = read {
            if e.is_retryable() {
                warn!("Panel stream interrupted: {}", e);
            } else {
                error!("Panel stream failed: {}", e);
            }
            if conn.is_connected() {
                shared.emit(PanelEvent::Disconnected);
            }
            reader.clear();

            let outcome = conn
                .recover(&mut shutdown_rx, |attempt| {
                    shared.set_health(LinkHealth::Recovering { attempt })
                })
                .await;
            match outcome {
                Recovery::Reconnected { attempt } => {
                    info!("Reconnected after {} attempt(s)", attempt);
                    shared.set_health(LinkHealth::Connected);
                    shared.emit(PanelEvent::Connected);
                }
                Recovery::Exhausted { attempts } => {
                    error!("Could not reconnect to {} after {} attempts", conn.addr(), attempts);
                    shared.set_health(LinkHealth::Down);
                    shared.emit(PanelEvent::ReconnectFailed { attempts });
                }
                Recovery::Shutdown => break,
            }
            continue;
        }

        while let Some((kind, frame)) = reader.next_frame() {
            if *shutdown_rx.borrow() {
                break 'outer;
            }
            handle_frame(&shared, &mut reader, kind, &frame).await;
        }
        *shared.stats.write().await = reader.stats();
    }

    conn.close();
    *shared.stats.write().await = reader.stats();
    shared.set_health(LinkHealth::Stopped);
    debug!("I/O task exited");
}

async fn handle_frame(shared: &Shared, reader: &mut FrameReader, kind: FrameKind, frame: &[u8]) {
    let decoded = decode_frame(kind, frame);
    match &decoded {
        Err(_) => reader.record_invalid(),
        Ok(_) if kind.is_discarded() => reader.record_discarded(),
        Ok(_) => {}
    }
    // Counters are published before the state they describe.
    *shared.stats.write().await = reader.stats();

    let decoded = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Dropping frame: {}", e);
            return;
        }
    };

    match decoded {
        Decoded::LedMimic(update) => on_led_mimic(shared, &update).await,
        Decoded::LcdLine(update) => on_lcd_line(shared, &update).await,
        Decoded::Heartbeat => {
            let first = shared.state.write().await.apply_heartbeat(Utc::now());
            if first {
                debug!("First heartbeat received");
                shared.emit(PanelEvent::Heartbeat);
            }
        }
        Decoded::Discarded(kind) => debug!("Discarded {} frame", kind),
    }
}

async fn on_led_mimic(shared: &Shared, update: &LedMimicUpdate) {
    let changes = shared
        .state
        .write()
        .await
        .apply_led_mimic(update, Utc::now());

    for change in &changes {
        debug!("Lamp {}: {:?} -> {}", change.lamp, change.previous, change.state);
        shared.emit(PanelEvent::LampChanged {
            lamp: change.lamp,
            state: change.state,
        });
    }

    // Clone the callbacks out so the registry lock is not held while they run.
    let targets: Vec<_> = {
        let registry = shared.registry.read().await;
        update
            .lamps()
            .filter_map(|(lamp, on)| {
                let callbacks = registry.lamp_callbacks(lamp);
                (!callbacks.is_empty()).then(|| (lamp, on, callbacks.to_vec()))
            })
            .collect()
    };

    for (lamp, on, callbacks) in targets {
        let observable = format!("lamp {}", lamp);
        for callback in callbacks {
            let _ = invoke_guarded(&observable, || callback(on));
        }
    }
}

async fn on_lcd_line(shared: &Shared, update: &LcdLineUpdate) {
    let (changed, text_changed, line1, line2, conditions) = {
        let mut state = shared.state.write().await;
        let text_changed = state.lcd_text(update.line) != Some(update.text.as_str());
        let changed = state.apply_lcd_line(update, Utc::now());
        (
            changed,
            text_changed,
            state.lcd_text(1).map(str::to_string),
            state.lcd_text(2).map(str::to_string),
            state.lcd_conditions,
        )
    };

    if text_changed {
        debug!("LCD line {}: {:?}", update.line, update.text);
        shared.emit(PanelEvent::LcdChanged {
            line1: line1.clone(),
            line2: line2.clone(),
        });
    }
    for condition in changed {
        shared.emit(PanelEvent::ConditionChanged {
            condition,
            state: conditions.get(condition),
        });
    }

    let (lcd_callbacks, condition_callbacks) = {
        let registry = shared.registry.read().await;
        let per_condition: Vec<_> = Condition::ALL
            .into_iter()
            .map(|c| (c, registry.condition_callbacks(c).to_vec()))
            .collect();
        (registry.lcd_callbacks().to_vec(), per_condition)
    };

    for callback in lcd_callbacks {
        let _ = invoke_guarded("lcd", || callback(line1.as_deref(), line2.as_deref()));
    }
    for (condition, callbacks) in condition_callbacks {
        let value = conditions.get(condition);
        for callback in callbacks {
            let _ = invoke_guarded(condition.as_str(), || callback(value));
        }
    }
}
