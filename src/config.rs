// MIT License - Copyright (c) 2026 Peter Wright
// Mimic client configuration

use std::time::Duration;

use crate::constants::{
    DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_PENDING, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_MAX_RECONNECT_DELAY_MS, DEFAULT_PORT, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_READ_BUFFER,
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_RECONNECT_DELAY_MS,
};
use crate::error::{MimicError, Result};

/// What the frame reader does when the head of its buffer matches no catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResyncPolicy {
    /// Leave the bytes in place and wait for the next read.
    #[default]
    Stall,
    /// Drop bytes one at a time until a known frame prefix reaches the head.
    ScanForward,
}

/// Configuration for connecting to the F100A RS485-to-Ethernet interface.
#[derive(Debug, Clone)]
pub struct PanelConfig {
    /// Interface host name or IP address
    pub host: String,
    /// Interface TCP port (default: 20108)
    pub port: u16,
    /// Per-read timeout before the stream is treated as stalled
    pub read_timeout_ms: u64,
    /// Maximum bytes taken from the socket in one read (default: 500)
    pub read_buffer_size: usize,
    /// Maximum bytes held waiting for a frame to complete before they are dropped
    pub max_pending_bytes: usize,
    /// Timeout for the connectivity probe
    pub probe_timeout_ms: u64,
    /// Base delay before a reconnect attempt (doubles per attempt)
    pub reconnect_delay_ms: u64,
    /// Upper bound on the reconnect delay
    pub max_reconnect_delay_ms: u64,
    /// Reconnect attempts per recovery cycle before the link is reported down
    pub max_reconnect_attempts: u32,
    /// Behaviour on unrecognized bytes
    pub resync_policy: ResyncPolicy,
    /// Capacity of the broadcast event channel
    pub event_capacity: usize,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.1".to_string(),
            port: DEFAULT_PORT,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            read_buffer_size: DEFAULT_READ_BUFFER,
            max_pending_bytes: DEFAULT_MAX_PENDING,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            resync_policy: ResyncPolicy::Stall,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl PanelConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> PanelConfigBuilder {
        PanelConfigBuilder::default()
    }

    /// `host:port` as used for socket connects and log messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Reject settings the I/O loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(MimicError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.host.trim().is_empty() {
            return invalid("host must not be empty");
        }
        if self.port == 0 {
            return invalid("port must not be 0");
        }
        if self.read_buffer_size == 0 {
            return invalid("read_buffer_size must be at least 1");
        }
        if self.max_pending_bytes < self.read_buffer_size {
            return invalid("max_pending_bytes must be at least read_buffer_size");
        }
        if self.read_timeout_ms == 0 || self.probe_timeout_ms == 0 {
            return invalid("timeouts must be non-zero");
        }
        if self.event_capacity == 0 {
            return invalid("event_capacity must be at least 1");
        }
        Ok(())
    }
}

/// Builder for PanelConfig.
#[derive(Debug, Clone, Default)]
pub struct PanelConfigBuilder {
    config: PanelConfig,
}

impl PanelConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn max_pending_bytes(mut self, size: usize) -> Self {
        self.config.max_pending_bytes = size;
        self
    }

    pub fn probe_timeout_ms(mut self, ms: u64) -> Self {
        self.config.probe_timeout_ms = ms;
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    pub fn max_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.max_reconnect_delay_ms = ms;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn resync_policy(mut self, policy: ResyncPolicy) -> Self {
        self.config.resync_policy = policy;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> PanelConfig {
        self.config
    }
}
