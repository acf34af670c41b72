//! Error classification used to route failure handling.

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Connection,
    PerEvent,
    StreamEnded,
    Agent,
    Hardware,
    Internal,
}

/// Suggested follow-up for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    FixConfiguration,
    RetryConnect,
    SkipEvent,
    EndSession,
    CheckDevice,
}
