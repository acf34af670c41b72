//! Error types for the voice client.

pub mod category;

pub use category::{ErrorCategory, RecoveryAction};

use thiserror::Error;

use crate::bus::BusError;

/// Primary error type for all voice-client operations.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The duplex channel could not be established. No session exists yet.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    Send(String),

    /// A single inbound frame could not be decoded. The transport stays usable.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Stream ended{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    StreamEnded { reason: Option<String> },

    /// The agent reported a fatal error through a `bidi_error` frame.
    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Hardware error ({device}): {message}")]
    Hardware { device: String, message: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VoiceError {
    /// Create a hardware error for a named device.
    pub fn hardware(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hardware {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a stream-ended error, optionally carrying the peer's close reason.
    pub fn stream_ended(reason: Option<String>) -> Self {
        Self::StreamEnded { reason }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Connection(_) => ErrorCategory::Connection,
            Self::Send(_) | Self::Decode(_) | Self::Serialization(_) => ErrorCategory::PerEvent,
            Self::StreamEnded { .. } => ErrorCategory::StreamEnded,
            Self::Agent(_) => ErrorCategory::Agent,
            Self::Hardware { .. } => ErrorCategory::Hardware,
            Self::InvalidState(_) | Self::Bus(_) | Self::Io(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this error ends the streaming session.
    ///
    /// Per-event failures (one bad frame, one failed send that did not
    /// break the connection) are isolated and do not end the session.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.category(), ErrorCategory::PerEvent)
    }

    /// Suggest what the caller should do next.
    pub fn recovery_action(&self) -> RecoveryAction {
        match self.category() {
            ErrorCategory::Configuration => RecoveryAction::FixConfiguration,
            ErrorCategory::Connection => RecoveryAction::RetryConnect,
            ErrorCategory::PerEvent => RecoveryAction::SkipEvent,
            ErrorCategory::StreamEnded | ErrorCategory::Agent => RecoveryAction::EndSession,
            ErrorCategory::Hardware => RecoveryAction::CheckDevice,
            ErrorCategory::Internal => RecoveryAction::EndSession,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, VoiceError>;
