//! Microphone capture bridged from the device thread into the outbound bus.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::types::AudioFrame;
use crate::bus::{BusError, Emitter};
use crate::error::VoiceError;

/// Callback invoked by an input device on its own thread with one raw frame.
pub type FrameHandler = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// A hardware (or simulated) audio input.
///
/// Implementations call the registered [`FrameHandler`] from whatever thread
/// the hardware drives. The handler never blocks.
pub trait InputDevice: Send {
    fn name(&self) -> String;

    /// Acquire the device and register the handler. Called at most once.
    fn open(&mut self, handler: FrameHandler) -> Result<(), VoiceError>;

    fn resume(&mut self) -> Result<(), VoiceError>;

    fn pause(&mut self) -> Result<(), VoiceError>;

    /// Release the device. Called at most once.
    fn close(&mut self) -> Result<(), VoiceError>;
}

#[derive(Default)]
struct CaptureCounters {
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Owns one input device and forwards its frames while streaming is enabled.
pub struct CaptureSource {
    device: Box<dyn InputDevice>,
    emitter: Emitter<AudioFrame>,
    streaming: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    opened: bool,
    closed: bool,
}

impl CaptureSource {
    pub fn new(device: Box<dyn InputDevice>, emitter: Emitter<AudioFrame>) -> Self {
        Self {
            device,
            emitter,
            streaming: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CaptureCounters::default()),
            opened: false,
            closed: false,
        }
    }

    /// Begin forwarding frames. Opens the device on first use.
    pub fn start(&mut self) -> Result<(), VoiceError> {
        if self.closed {
            return Err(VoiceError::InvalidState(
                "capture source is already closed".into(),
            ));
        }
        if !self.opened {
            let handler = frame_handler(
                self.emitter.clone(),
                Arc::clone(&self.streaming),
                Arc::clone(&self.counters),
            );
            self.device.open(handler)?;
            self.opened = true;
            tracing::debug!(device = %self.device.name(), "Input device opened");
        }
        self.streaming.store(true, Ordering::Release);
        if let Err(error) = self.device.resume() {
            self.streaming.store(false, Ordering::Release);
            return Err(error);
        }
        Ok(())
    }

    /// Stop forwarding. Frames delivered from now on are dropped silently.
    pub fn stop(&mut self) -> Result<(), VoiceError> {
        self.streaming.store(false, Ordering::Release);
        if self.opened && !self.closed {
            self.device.pause()?;
        }
        Ok(())
    }

    /// Stop, release the device, and complete the outbound channel.
    pub fn close(&mut self) -> Result<(), VoiceError> {
        self.streaming.store(false, Ordering::Release);
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.emitter.complete();
        if self.opened {
            tracing::debug!(device = %self.device.name(), "Closing input device");
            self.device.close()?;
        }
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.counters.forwarded.load(Ordering::Relaxed)
    }

    /// Frames lost because the outbound channel was full.
    pub fn frames_dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

fn frame_handler(
    emitter: Emitter<AudioFrame>,
    streaming: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
) -> FrameHandler {
    Box::new(move |data: &[u8]| {
        if data.is_empty() || !streaming.load(Ordering::Acquire) {
            return;
        }
        match emitter.emit(AudioFrame::copy_from_slice(data)) {
            Ok(()) => {
                counters.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(BusError::Full) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(BusError::Terminated | BusError::Disconnected) => {}
        }
    })
}
