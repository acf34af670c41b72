//! Session lifecycle state, flags, and the records surfaced to callers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use strum::Display;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`Session`](super::Session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Closing,
    Closed,
}

/// Why a session left `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionOutcome {
    /// The local user asked to stop.
    Stopped,
    /// The agent sent a fatal error event.
    AgentError,
    /// The peer closed the connection or the socket dropped.
    StreamEnded,
    /// An outbound frame could not be written.
    SendFailed,
    /// The speaker failed while playing.
    HardwareFailed,
}

impl SessionOutcome {
    /// Anything other than a user stop.
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

/// Something the caller should know about, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRecord {
    Transcript {
        role: String,
        text: String,
        is_final: bool,
    },
    ToolUse {
        name: String,
        input: Value,
    },
    Interrupted {
        reason: String,
        discarded: usize,
    },
    Reconnecting,
    Failed {
        outcome: SessionOutcome,
        message: String,
    },
    Closed {
        outcome: SessionOutcome,
    },
}

impl fmt::Display for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transcript {
                role,
                text,
                is_final: true,
            } => write!(f, "{role}: {text}"),
            Self::Transcript {
                role,
                text,
                is_final: false,
            } => write!(f, "{role} (preview): {text}"),
            Self::ToolUse { name, input } => write!(f, "Using tool: {name}. Input: {input}"),
            Self::Interrupted { reason, discarded } => {
                write!(f, "Interrupted ({reason}); discarded {discarded} queued payload(s)")
            }
            Self::Reconnecting => f.write_str("Connection restarting"),
            Self::Failed { outcome, message } => write!(f, "Session failed ({outcome}): {message}"),
            Self::Closed { outcome } => write!(f, "Session closed ({outcome})"),
        }
    }
}

impl SessionRecord {
    fn is_preview(&self) -> bool {
        matches!(self, Self::Transcript { is_final: false, .. })
    }
}

/// Bounded buffer between the session and its record reader.
///
/// Once full, the oldest transcript preview is evicted to make room, or the
/// oldest record when no preview is buffered.
pub(crate) struct RecordBuffer {
    inner: Mutex<RecordQueue>,
    ready: Notify,
    capacity: usize,
}

#[derive(Default)]
struct RecordQueue {
    records: VecDeque<SessionRecord>,
    ended: bool,
}

impl RecordBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RecordQueue::default()),
            ready: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, record: SessionRecord, end: bool) {
        let mut inner = self.inner.lock();
        if inner.ended {
            return;
        }
        if inner.records.len() >= self.capacity {
            let evict = inner
                .records
                .iter()
                .position(SessionRecord::is_preview)
                .unwrap_or(0);
            if let Some(evicted) = inner.records.remove(evict) {
                tracing::debug!(record = %evicted, "Record buffer full; evicting");
            }
        }
        inner.records.push_back(record);
        inner.ended = end;
        drop(inner);
        self.ready.notify_one();
    }

    fn end(&self) {
        self.inner.lock().ended = true;
        self.ready.notify_one();
    }

    /// Next record, or `None` once ended and drained.
    pub(crate) async fn next(&self) -> Option<SessionRecord> {
        loop {
            let notified = self.ready.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(record) = inner.records.pop_front() {
                    return Some(record);
                }
                if inner.ended {
                    return None;
                }
            }
            notified.await;
        }
    }
}

/// Flags owned by the session. Other components only read them.
#[derive(Debug, Default)]
pub(crate) struct SessionFlags {
    active: AtomicBool,
    interrupted: AtomicBool,
}

impl SessionFlags {
    /// Frames may be sent. Cleared once closing starts, never set again.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// An interruption purge is in progress.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub(crate) fn set_interrupted(&self, interrupted: bool) {
        self.interrupted.store(interrupted, Ordering::Release);
    }
}

/// State shared between the session handle and its background tasks.
pub(crate) struct SessionControl {
    pub(crate) flags: SessionFlags,
    state: watch::Sender<SessionState>,
    outcome: Mutex<Option<SessionOutcome>>,
    records: Arc<RecordBuffer>,
    shutdown: CancellationToken,
}

impl SessionControl {
    pub(crate) fn new(records: Arc<RecordBuffer>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            flags: SessionFlags::default(),
            state,
            outcome: Mutex::new(None),
            records,
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Session state changed");
        }
        if next == SessionState::Closed {
            self.shutdown.cancel();
        }
    }

    pub(crate) fn outcome(&self) -> Option<SessionOutcome> {
        *self.outcome.lock()
    }

    /// Move `Streaming -> Closing` and record why. Only the first caller wins.
    pub(crate) fn begin_closing(&self, outcome: SessionOutcome) -> bool {
        let mut slot = self.outcome.lock();
        if slot.is_some() || self.state() != SessionState::Streaming {
            return false;
        }
        *slot = Some(outcome);
        self.flags.set_active(false);
        self.set_state(SessionState::Closing);
        drop(slot);
        self.shutdown.cancel();
        true
    }

    /// Close for a failure and tell the caller about it, once.
    pub(crate) fn fail(&self, outcome: SessionOutcome, message: impl Into<String>) {
        if self.begin_closing(outcome) {
            let message = message.into();
            tracing::error!(outcome = %outcome, message = %message, "Session closing after failure");
            self.emit(SessionRecord::Failed { outcome, message });
        }
    }

    pub(crate) fn emit(&self, record: SessionRecord) {
        self.records.push(record, false);
    }

    /// Emit the last record and end the record stream.
    pub(crate) fn finish(&self, record: SessionRecord) {
        self.records.push(record, true);
    }

    pub(crate) fn end_records(&self) {
        self.records.end();
    }

    pub(crate) async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> (SessionControl, Arc<RecordBuffer>) {
        let records = Arc::new(RecordBuffer::new(8));
        (SessionControl::new(Arc::clone(&records)), records)
    }

    fn preview(text: &str) -> SessionRecord {
        SessionRecord::Transcript {
            role: "user".into(),
            text: text.into(),
            is_final: false,
        }
    }

    #[test]
    fn final_and_preview_transcripts_render_differently() {
        let final_line = SessionRecord::Transcript {
            role: "assistant".into(),
            text: "Hi".into(),
            is_final: true,
        };
        let preview = SessionRecord::Transcript {
            role: "user".into(),
            text: "Hel".into(),
            is_final: false,
        };
        assert_eq!(final_line.to_string(), "assistant: Hi");
        assert_eq!(preview.to_string(), "user (preview): Hel");
    }

    #[test]
    fn begin_closing_requires_streaming_and_wins_once() {
        let (control, _records) = control();
        assert!(!control.begin_closing(SessionOutcome::Stopped));

        control.flags.set_active(true);
        control.set_state(SessionState::Streaming);
        assert!(control.begin_closing(SessionOutcome::AgentError));
        assert!(!control.begin_closing(SessionOutcome::Stopped));

        assert_eq!(control.state(), SessionState::Closing);
        assert_eq!(control.outcome(), Some(SessionOutcome::AgentError));
        assert!(!control.flags.is_active());
    }

    #[tokio::test]
    async fn fail_emits_one_record() {
        let (control, mut records) = control();
        control.set_state(SessionState::Streaming);

        control.fail(SessionOutcome::SendFailed, "broken pipe");
        control.fail(SessionOutcome::HardwareFailed, "speaker gone");
        control.finish(SessionRecord::Closed {
            outcome: SessionOutcome::SendFailed,
        });

        assert!(matches!(
            records.next().await,
            Some(SessionRecord::Failed { outcome: SessionOutcome::SendFailed, .. })
        ));
        assert!(matches!(records.next().await, Some(SessionRecord::Closed { .. })));
        assert!(records.next().await.is_none());
    }

    #[tokio::test]
    async fn full_buffer_evicts_oldest_preview_first() {
        let records = RecordBuffer::new(3);
        records.push(SessionRecord::Reconnecting, false);
        records.push(preview("He"), false);
        records.push(preview("Hel"), false);
        records.push(preview("Hello"), false);
        records.push(
            SessionRecord::Closed {
                outcome: SessionOutcome::Stopped,
            },
            true,
        );
        records.push(SessionRecord::Reconnecting, false);

        assert_eq!(records.next().await, Some(SessionRecord::Reconnecting));
        assert_eq!(records.next().await, Some(preview("Hello")));
        assert_eq!(
            records.next().await,
            Some(SessionRecord::Closed {
                outcome: SessionOutcome::Stopped
            })
        );
        assert_eq!(records.next().await, None);
    }

    #[tokio::test]
    async fn reader_wakes_when_a_record_arrives() {
        let records = Arc::new(RecordBuffer::new(4));
        let reader = {
            let records = Arc::clone(&records);
            tokio::spawn(async move { records.next().await })
        };
        tokio::task::yield_now().await;
        records.push(preview("Hi"), false);
        assert_eq!(reader.await.unwrap(), Some(preview("Hi")));
    }

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(SessionState::Streaming.to_string(), "streaming");
        assert_eq!(SessionOutcome::AgentError.to_string(), "agent_error");
    }
}
