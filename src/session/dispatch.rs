//! Background work of a streaming session: the socket reader, the inbound
//! dispatcher, and the outbound audio forwarder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::state::{SessionControl, SessionOutcome, SessionRecord};
use crate::audio::{AudioConfig, AudioFrame, PlaybackQueue};
use crate::bus::{Emitter, SignalHandler};
use crate::error::VoiceError;
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::transport::{EventReceiver, EventSender};

/// Pause after a server-side connection restart notice.
pub(crate) const RESTART_PAUSE: Duration = Duration::from_millis(50);

/// Read frames off the socket and publish them in arrival order.
///
/// Undecodable frames are skipped. A terminal transport error fails the bus;
/// cancellation completes it.
pub(crate) async fn receive_loop(
    mut receiver: EventReceiver,
    inbound: Emitter<InboundEvent>,
    cancel: CancellationToken,
    debug: bool,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = receiver.receive() => next,
        };

        match next {
            Ok(event) => {
                if debug {
                    tracing::info!(event_type = %event.kind(), "Inbound event");
                } else {
                    tracing::trace!(event_type = %event.kind(), "Inbound event");
                }
                let published = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    published = inbound.publish(event) => published,
                };
                if published.is_err() {
                    return;
                }
            }
            Err(error) if !error.is_terminal() => {
                tracing::warn!(error = %error, "Skipping undecodable inbound frame");
            }
            Err(error) => {
                tracing::debug!(error = %error, "Inbound stream terminated");
                inbound.fail(error);
                return;
            }
        }
    }
    inbound.complete();
}

/// Applies inbound events to the session.
pub(crate) struct InboundDispatcher {
    pub(crate) control: Arc<SessionControl>,
    pub(crate) queue: Arc<PlaybackQueue>,
}

#[async_trait]
impl SignalHandler<InboundEvent> for InboundDispatcher {
    async fn on_next(&mut self, event: InboundEvent) -> Result<(), VoiceError> {
        if !self.control.flags.is_active() {
            return Ok(());
        }
        match event {
            InboundEvent::AudioOutput { audio } => {
                if let Err(error) = self.queue.push(audio).await {
                    tracing::debug!(error = %error, "Dropping audio after playback closed");
                }
            }
            InboundEvent::Transcript {
                role,
                text,
                is_final,
            } => {
                self.control.emit(SessionRecord::Transcript {
                    role,
                    text,
                    is_final,
                });
            }
            InboundEvent::ToolUse { name, input } => {
                tracing::info!(tool = %name, "Agent is using a tool");
                self.control.emit(SessionRecord::ToolUse { name, input });
            }
            InboundEvent::Interruption { reason } => {
                self.control.flags.set_interrupted(true);
                let discarded = self.queue.interrupt();
                tracing::info!(reason = %reason, discarded, "Playback interrupted");
                self.control
                    .emit(SessionRecord::Interrupted { reason, discarded });
                self.control.flags.set_interrupted(false);
            }
            InboundEvent::ConnectionRestart => {
                tracing::info!("Server is restarting the connection");
                self.control.emit(SessionRecord::Reconnecting);
                tokio::time::sleep(RESTART_PAUSE).await;
            }
            InboundEvent::Error { message } => return Err(VoiceError::Agent(message)),
            InboundEvent::Unknown { event_type } => {
                tracing::debug!(event_type = %event_type, "Ignoring unknown inbound event");
            }
        }
        Ok(())
    }

    async fn on_error(&mut self, error: VoiceError) {
        match error {
            VoiceError::Agent(message) => self.control.fail(SessionOutcome::AgentError, message),
            other => self
                .control
                .fail(SessionOutcome::StreamEnded, other.to_string()),
        }
    }

    async fn on_complete(&mut self) {
        tracing::debug!("Inbound dispatch finished");
    }
}

/// Encodes captured frames and sends them while the session is active.
pub(crate) struct OutboundForwarder {
    pub(crate) control: Arc<SessionControl>,
    pub(crate) sender: EventSender,
    pub(crate) audio: AudioConfig,
}

#[async_trait]
impl SignalHandler<AudioFrame> for OutboundForwarder {
    async fn on_next(&mut self, frame: AudioFrame) -> Result<(), VoiceError> {
        if !self.control.flags.is_active() {
            return Ok(());
        }
        let event = OutboundEvent::audio_input(frame, &self.audio);
        let control = Arc::clone(&self.control);
        self.sender
            .send_if(&event, move || control.flags.is_active())
            .await?;
        Ok(())
    }

    async fn on_error(&mut self, error: VoiceError) {
        if !self.control.flags.is_active() {
            tracing::debug!(error = %error, "Send failed after session stopped");
            return;
        }
        if let VoiceError::StreamEnded { .. } = error {
            // The receive loop reports the end of stream once earlier events are dispatched.
            tracing::debug!(error = %error, "Dropping captured audio after peer closed");
            return;
        }
        self.control.fail(SessionOutcome::SendFailed, error.to_string());
    }
}
