//! Speaker playback: a bounded queue drained into an output device.
//!
//! Payloads are tagged with the interruption generation current when they
//! were queued. [`PlaybackQueue::interrupt`] bumps the generation and purges
//! the queue in one step, so a payload queued before an interruption is
//! never written afterwards, even if the sink had already dequeued it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::types::AudioFrame;
use crate::error::VoiceError;

/// A hardware (or simulated) audio output.
pub trait OutputDevice: Send {
    fn name(&self) -> String;

    /// Write PCM bytes, blocking until the device has accepted them.
    fn write(&mut self, pcm: &[u8]) -> Result<(), VoiceError>;

    /// Flush and release the device. Called at most once.
    fn close(&mut self) -> Result<(), VoiceError>;
}

/// Tuning for the playback loop.
#[derive(Debug, Clone, Builder, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Longest wait for a payload before re-checking for shutdown.
    #[builder(default = Duration::from_millis(100))]
    pub poll_interval: Duration,
    /// Bytes handed to the device per write.
    #[builder(default = 1024)]
    pub chunk_bytes: usize,
    #[builder(default = 256)]
    pub queue_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A payload waiting in the [`PlaybackQueue`].
#[derive(Debug, Clone)]
pub struct QueuedAudio {
    pub generation: u64,
    pub frame: AudioFrame,
}

/// Bounded FIFO shared by the session (producer) and the sink (consumer).
pub struct PlaybackQueue {
    items: Mutex<VecDeque<QueuedAudio>>,
    capacity: usize,
    generation: AtomicU64,
    closed: AtomicBool,
    item_ready: Notify,
    space_ready: Notify,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
        }
    }

    /// Append a payload, suspending while the queue is full.
    pub async fn push(&self, frame: AudioFrame) -> Result<(), VoiceError> {
        let mut frame = Some(frame);
        loop {
            {
                let mut items = self.items.lock();
                if self.is_closed() {
                    return Err(VoiceError::InvalidState("playback queue is closed".into()));
                }
                if items.len() < self.capacity {
                    if let Some(frame) = frame.take() {
                        items.push_back(QueuedAudio {
                            generation: self.generation.load(Ordering::Acquire),
                            frame,
                        });
                    }
                    drop(items);
                    self.item_ready.notify_one();
                    return Ok(());
                }
            }
            self.space_ready.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<QueuedAudio> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.space_ready.notify_one();
        }
        item
    }

    /// Wait up to `timeout` for the next payload.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<QueuedAudio> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            if tokio::time::timeout_at(deadline, self.item_ready.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    /// Void everything queued so far. Returns how many payloads were discarded.
    pub fn interrupt(&self) -> usize {
        let mut items = self.items.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let discarded = items.len();
        items.clear();
        drop(items);
        if discarded > 0 {
            self.space_ready.notify_one();
        }
        discarded
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether a payload tagged with `generation` may still be played.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reject further pushes and wake any waiters.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.item_ready.notify_waiters();
        self.space_ready.notify_waiters();
        // A waiter between its closed check and its await would miss the above.
        self.item_ready.notify_one();
        self.space_ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Called once if the output device fails while playing.
pub type PlaybackFailureHandler = Box<dyn FnOnce(VoiceError) + Send + 'static>;

type SharedDevice = Arc<Mutex<Option<Box<dyn OutputDevice>>>>;

/// Drains a [`PlaybackQueue`] into an [`OutputDevice`] at the device's pace.
pub struct PlaybackSink {
    device: SharedDevice,
    device_name: String,
    queue: Arc<PlaybackQueue>,
    config: PlaybackConfig,
    streaming: Arc<AtomicBool>,
    chunks_written: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackSink {
    pub fn new(
        device: Box<dyn OutputDevice>,
        queue: Arc<PlaybackQueue>,
        config: PlaybackConfig,
    ) -> Self {
        let device_name = device.name();
        Self {
            device: Arc::new(Mutex::new(Some(device))),
            device_name,
            queue,
            config,
            streaming: Arc::new(AtomicBool::new(false)),
            chunks_written: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Spawn the playback loop.
    pub fn start(&mut self, on_failure: PlaybackFailureHandler) -> Result<(), VoiceError> {
        if self.task.is_some() {
            return Ok(());
        }
        if self.device.lock().is_none() {
            return Err(VoiceError::InvalidState("output device is closed".into()));
        }
        self.streaming.store(true, Ordering::Release);
        self.task = Some(tokio::spawn(run_playback_loop(PlaybackLoop {
            device: Arc::clone(&self.device),
            device_name: self.device_name.clone(),
            queue: Arc::clone(&self.queue),
            config: self.config.clone(),
            streaming: Arc::clone(&self.streaming),
            chunks_written: Arc::clone(&self.chunks_written),
            on_failure: Some(on_failure),
        })));
        tracing::debug!(device = %self.device_name, "Playback started");
        Ok(())
    }

    /// Stop consuming and wait for the loop to exit.
    ///
    /// Returns within roughly one poll interval or one sub-chunk write.
    pub async fn stop(&mut self) {
        self.streaming.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::warn!(device = %self.device_name, error = %error, "Playback task ended abnormally");
            }
        }
    }

    /// Release the output device. Later calls are no-ops.
    pub fn close(&mut self) -> Result<(), VoiceError> {
        self.streaming.store(false, Ordering::Release);
        let device = self.device.lock().take();
        match device {
            Some(mut device) => {
                tracing::debug!(device = %self.device_name, "Closing output device");
                device.close()
            }
            None => Ok(()),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written.load(Ordering::Relaxed)
    }
}

struct PlaybackLoop {
    device: SharedDevice,
    device_name: String,
    queue: Arc<PlaybackQueue>,
    config: PlaybackConfig,
    streaming: Arc<AtomicBool>,
    chunks_written: Arc<AtomicU64>,
    on_failure: Option<PlaybackFailureHandler>,
}

impl PlaybackLoop {
    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    fn fail(&mut self, error: VoiceError) {
        self.streaming.store(false, Ordering::Release);
        tracing::error!(device = %self.device_name, error = %error, "Playback failed");
        if let Some(on_failure) = self.on_failure.take() {
            on_failure(error);
        }
    }
}

async fn run_playback_loop(mut playback: PlaybackLoop) {
    while playback.is_streaming() {
        if playback.queue.is_closed() && playback.queue.is_empty() {
            break;
        }
        let Some(queued) = playback.queue.pop_timeout(playback.config.poll_interval).await else {
            continue;
        };
        if !playback.queue.is_current(queued.generation) {
            tracing::trace!(bytes = queued.frame.len(), "Dropping payload voided by interruption");
            continue;
        }

        for chunk in queued.frame.chunks(playback.config.chunk_bytes) {
            if !playback.is_streaming() || !playback.queue.is_current(queued.generation) {
                break;
            }
            let device = Arc::clone(&playback.device);
            let device_name = playback.device_name.clone();
            let written = tokio::task::spawn_blocking(move || match device.lock().as_mut() {
                Some(device) => device.write(&chunk),
                None => Err(VoiceError::hardware(device_name, "device already closed")),
            })
            .await
            .unwrap_or_else(|error| {
                Err(VoiceError::hardware(
                    playback.device_name.clone(),
                    format!("write task failed: {error}"),
                ))
            });

            if let Err(error) = written {
                playback.fail(error);
                return;
            }
            playback.chunks_written.fetch_add(1, Ordering::Relaxed);
            tokio::task::yield_now().await;
        }
    }
    tracing::debug!(device = %playback.device_name, "Playback loop exited");
}
