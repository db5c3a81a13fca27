// MIT License - Copyright (c) 2026 Peter Wright
// Broadcast events emitted by the mimic client

use std::fmt;

use crate::state::{Condition, TriState};

/// Health of the link to the panel interface, as seen by the I/O loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkHealth {
    /// No I/O loop is running.
    #[default]
    Stopped,
    /// Opening the first connection after `start()`.
    Connecting,
    /// Connected and reading frames.
    Connected,
    /// The stream stalled or dropped; reconnect attempt `attempt` is pending.
    Recovering { attempt: u32 },
    /// Every attempt in the last recovery cycle failed.
    Down,
}

impl LinkHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Recovering { .. } => "recovering",
            Self::Down => "down",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for LinkHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recovering { attempt } => write!(f, "recovering (attempt {})", attempt),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Events published by `MimicPanel`.
///
/// Users subscribe via `panel.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<PanelEvent>`. State events are only sent
/// when a value actually changes; the inline callbacks see every frame.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    /// TCP connection to the interface established
    Connected,
    /// TCP connection closed or stalled
    Disconnected,
    /// A recovery cycle gave up after `attempts` reconnects
    ReconnectFailed { attempts: u32 },
    /// Link health moved to a new value
    HealthChanged(LinkHealth),
    /// First heartbeat since `start()`
    Heartbeat,
    /// Addressable lamp (1-256) changed
    LampChanged { lamp: u16, state: bool },
    /// Named condition changed
    ConditionChanged {
        condition: Condition,
        state: TriState,
    },
    /// LCD text changed
    LcdChanged {
        line1: Option<String>,
        line2: Option<String>,
    },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<PanelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<PanelEvent>;

pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}
