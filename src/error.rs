// MIT License - Copyright (c) 2026 Peter Wright
// Error types for the mimic client

use crate::protocol::FrameKind;

/// All errors that can occur in the pertronic-mimic library.
#[derive(Debug, thiserror::Error)]
pub enum MimicError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection to {addr} failed: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    #[error("Read timeout")]
    ReadTimeout,

    #[error("Socket disconnected")]
    Disconnected,

    #[error("Invalid {kind} frame: {details}")]
    FrameValidation { kind: FrameKind, details: String },

    #[error("Callback for {observable} failed: {message}")]
    Callback { observable: String, message: String },

    #[error("Invalid lamp: {index} (valid: 1-{max})")]
    InvalidLamp { index: u32, max: u32 },

    #[error("Unknown condition: {name}")]
    UnknownCondition { name: String },

    #[error("Invalid LCD line: {line} (valid: 1-2)")]
    InvalidLcdLine { line: u8 },

    #[error("Mimic client already running")]
    AlreadyRunning,

    #[error("Mimic client not running")]
    NotRunning,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl MimicError {
    /// Whether this error is transient and the connection should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MimicError::Io(_)
                | MimicError::ConnectionFailed { .. }
                | MimicError::ReadTimeout
                | MimicError::Disconnected
        )
    }
}

pub type Result<T> = std::result::Result<T, MimicError>;
