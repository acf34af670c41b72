//! Session orchestrator.
//!
//! A [`Session`] owns one duplex connection plus its capture source and
//! playback sink, and moves through
//! `Idle -> Connecting -> Streaming -> Closing -> Closed`.
//!
//! While streaming, three background tasks run: a socket reader feeding the
//! inbound bus, a dispatcher applying inbound events, and a forwarder sending
//! captured frames. Failures observed by any of them move the session to
//! `Closing`; [`Session::close`] (or [`Session::run_until`]) then tears the
//! pipeline down in a fixed order.

mod dispatch;
pub mod state;

pub use state::{SessionOutcome, SessionRecord, SessionState};

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use crate::audio::{
    AudioFrame, CaptureSource, InputDevice, OutputDevice, PlaybackQueue, PlaybackSink,
};
use crate::bus::{self, Subscriber};
use crate::config::{DefaultResolver, EndpointResolver, VoiceConfig};
use crate::error::{Result, VoiceError};
use crate::protocol::OutboundEvent;
use crate::transport::{self, EventSender};
use dispatch::{InboundDispatcher, OutboundForwarder};
use state::{RecordBuffer, SessionControl};

/// Records produced by a session, in order. Ends after the `Closed` record.
///
/// The buffer is bounded by `record_queue_capacity`; a reader that falls
/// behind loses the oldest transcript previews first.
pub struct RecordStream {
    buffer: Arc<RecordBuffer>,
}

impl RecordStream {
    pub async fn next(&mut self) -> Option<SessionRecord> {
        self.buffer.next().await
    }
}

/// One voice conversation over one connection.
pub struct Session {
    config: VoiceConfig,
    resolver: Arc<dyn EndpointResolver>,
    control: Arc<SessionControl>,
    records: Option<RecordStream>,
    capture: CaptureSource,
    capture_frames: Option<Subscriber<AudioFrame>>,
    queue: Arc<PlaybackQueue>,
    playback: PlaybackSink,
    sender: Option<EventSender>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Build a session around already-acquired devices. Nothing runs yet.
    pub fn new(
        config: VoiceConfig,
        input: Box<dyn InputDevice>,
        output: Box<dyn OutputDevice>,
    ) -> Self {
        let records = Arc::new(RecordBuffer::new(config.record_queue_capacity));
        let (capture_tx, capture_rx) = bus::channel(config.capture_queue_capacity);
        let queue = Arc::new(PlaybackQueue::new(config.playback.queue_capacity));
        let playback = PlaybackSink::new(output, Arc::clone(&queue), config.playback.clone());

        Self {
            resolver: Arc::new(DefaultResolver),
            control: Arc::new(SessionControl::new(Arc::clone(&records))),
            records: Some(RecordStream { buffer: records }),
            capture: CaptureSource::new(input, capture_tx),
            capture_frames: Some(capture_rx),
            queue,
            playback,
            sender: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            config,
        }
    }

    /// Use a custom endpoint resolver, e.g. one that presigns routed URLs.
    pub fn with_resolver(mut self, resolver: impl EndpointResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.control.subscribe_state()
    }

    pub fn is_active(&self) -> bool {
        self.control.flags.is_active()
    }

    pub fn is_interrupted(&self) -> bool {
        self.control.flags.is_interrupted()
    }

    /// Why the session left `Streaming`, once it has.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.control.outcome()
    }

    pub fn playback_queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Frames lost because the outbound channel was full.
    pub fn capture_frames_dropped(&self) -> u64 {
        self.capture.frames_dropped()
    }

    /// Next record, or `None` once the session is closed and drained (or the
    /// stream was taken with [`take_records`](Self::take_records)).
    pub async fn next_record(&mut self) -> Option<SessionRecord> {
        match self.records.as_mut() {
            Some(records) => records.next().await,
            None => None,
        }
    }

    /// Detach the record stream so it can be consumed on another task.
    pub fn take_records(&mut self) -> Option<RecordStream> {
        self.records.take()
    }

    /// Connect and start streaming.
    ///
    /// On failure every resource acquired so far is released, the session
    /// ends in `Closed`, and the error is returned.
    pub async fn initialize(&mut self) -> Result<()> {
        let state = self.state();
        if state != SessionState::Idle {
            return Err(VoiceError::InvalidState(format!(
                "cannot initialize a session that is {state}"
            )));
        }
        self.control.set_state(SessionState::Connecting);

        match self.start_streaming().await {
            Ok(()) => {
                tracing::info!(endpoint = %self.config.endpoint, "Session streaming");
                Ok(())
            }
            Err(error) => {
                tracing::error!(error = %error, "Session failed to start");
                self.control.flags.set_active(false);
                self.teardown().await;
                self.control.set_state(SessionState::Closed);
                self.control.end_records();
                Err(error)
            }
        }
    }

    async fn start_streaming(&mut self) -> Result<()> {
        self.config.validate()?;
        let target = self.resolver.resolve(&self.config).await?;
        let (sender, receiver) = transport::connect(&target).await?;
        self.sender = Some(sender.clone());

        self.capture.start()?;
        self.control.flags.set_active(true);
        self.control.set_state(SessionState::Streaming);

        let control = Arc::clone(&self.control);
        self.playback.start(Box::new(move |error: VoiceError| {
            control.fail(SessionOutcome::HardwareFailed, error.to_string());
        }))?;

        let (inbound_tx, inbound_rx) = bus::channel(self.config.inbound_queue_capacity);
        self.tasks.push(tokio::spawn(dispatch::receive_loop(
            receiver,
            inbound_tx,
            self.cancel.child_token(),
            self.config.debug,
        )));
        self.tasks.push(inbound_rx.subscribe(InboundDispatcher {
            control: Arc::clone(&self.control),
            queue: Arc::clone(&self.queue),
        }));
        if let Some(frames) = self.capture_frames.take() {
            self.tasks.push(frames.subscribe(OutboundForwarder {
                control: Arc::clone(&self.control),
                sender,
                audio: self.config.audio.clone(),
            }));
        }
        Ok(())
    }

    /// Resolve once the session wants to close: a failure moved it to
    /// `Closing`, or it is already closed.
    pub async fn wait_for_shutdown_signal(&self) {
        self.control.shutdown_requested().await;
    }

    /// Start the session if needed, stream until `stop` resolves or the
    /// session fails, then close. Returns why the session ended.
    pub async fn run_until<F>(&mut self, stop: F) -> Result<SessionOutcome>
    where
        F: Future<Output = ()>,
    {
        if self.state() == SessionState::Idle {
            self.initialize().await?;
        }
        tokio::select! {
            _ = stop => tracing::info!("Stop requested"),
            _ = self.wait_for_shutdown_signal() => {}
        }
        self.close().await;
        Ok(self.outcome().unwrap_or(SessionOutcome::Stopped))
    }

    /// Stop streaming and release everything. Safe to call repeatedly.
    ///
    /// Each teardown step runs even if an earlier one failed; failures are
    /// logged, never returned.
    pub async fn close(&mut self) {
        match self.state() {
            SessionState::Closed => return,
            SessionState::Streaming => {
                self.control.begin_closing(SessionOutcome::Stopped);
            }
            _ => self.control.flags.set_active(false),
        }
        self.teardown().await;
        self.control.set_state(SessionState::Closed);
        let outcome = self.outcome().unwrap_or(SessionOutcome::Stopped);
        self.control.finish(SessionRecord::Closed { outcome });
        tracing::info!(outcome = %outcome, "Session closed");
    }

    async fn teardown(&mut self) {
        if let Err(error) = self.capture.stop() {
            tracing::warn!(error = %error, "Failed to stop capture");
        }

        self.playback.stop().await;
        self.queue.close();

        if let Some(sender) = self.sender.as_ref().filter(|sender| sender.is_open()) {
            if let Err(error) = sender.send(&OutboundEvent::end_conversation()).await {
                tracing::warn!(error = %error, "Failed to send end of conversation");
            }
        }

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
            if let Err(error) = task.await {
                if !error.is_cancelled() {
                    tracing::warn!(error = %error, "Session task ended abnormally");
                }
            }
        }

        if let Some(sender) = self.sender.take() {
            match self.control.outcome() {
                None | Some(SessionOutcome::Stopped) => sender.close().await,
                Some(outcome) => {
                    sender
                        .close_with(CloseCode::Error, format!("client closing: {outcome}"))
                        .await
                }
            }
        }

        if let Err(error) = self.capture.close() {
            tracing::warn!(error = %error, "Failed to close input device");
        }
        if let Err(error) = self.playback.close() {
            tracing::warn!(error = %error, "Failed to close output device");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        self.control.flags.set_active(false);
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}
