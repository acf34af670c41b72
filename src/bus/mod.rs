//! Bounded publish/subscribe channels that decouple producers from the session.
//!
//! A channel carries a stream of values followed by exactly one terminal
//! signal: either completion or a failure. Producers on hardware threads use
//! the non-blocking [`Emitter::emit`]; producers inside the runtime may use the
//! backpressured [`Emitter::publish`]. Values emitted before the terminal
//! signal are always delivered before it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::VoiceError;

/// Failure to hand a value to a channel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("channel is full")]
    Full,
    #[error("channel already terminated")]
    Terminated,
    #[error("subscriber is gone")]
    Disconnected,
}

enum Termination {
    Completed,
    Failed(VoiceError),
}

struct Shared {
    terminated: AtomicBool,
    termination: Mutex<Option<Termination>>,
    notify: Notify,
}

/// Create a bounded channel holding at most `capacity` undelivered values.
pub fn channel<T>(capacity: usize) -> (Emitter<T>, Subscriber<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        terminated: AtomicBool::new(false),
        termination: Mutex::new(None),
        notify: Notify::new(),
    });
    (
        Emitter {
            tx,
            shared: Arc::clone(&shared),
        },
        Subscriber {
            rx,
            shared,
            finished: false,
        },
    )
}

/// Producer half. Cheap to clone; all clones share one terminal state.
pub struct Emitter<T> {
    tx: mpsc::Sender<T>,
    shared: Arc<Shared>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Emitter<T> {
    /// Hand off a value without waiting. Safe to call from any thread.
    pub fn emit(&self, value: T) -> Result<(), BusError> {
        if self.is_terminated() {
            return Err(BusError::Terminated);
        }
        self.tx.try_send(value).map_err(|error| match error {
            TrySendError::Full(_) => BusError::Full,
            TrySendError::Closed(_) => BusError::Disconnected,
        })
    }

    /// Hand off a value, suspending while the channel is full.
    pub async fn publish(&self, value: T) -> Result<(), BusError> {
        if self.is_terminated() {
            return Err(BusError::Terminated);
        }
        self.tx
            .send(value)
            .await
            .map_err(|_| BusError::Disconnected)
    }

    /// Terminate the channel with an error. Later calls are ignored.
    pub fn fail(&self, error: VoiceError) {
        self.terminate(Termination::Failed(error));
    }

    /// Terminate the channel normally. Later calls are ignored.
    pub fn complete(&self) {
        self.terminate(Termination::Completed);
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }

    fn terminate(&self, termination: Termination) {
        let mut slot = self.shared.termination.lock();
        if self.shared.terminated.load(Ordering::Acquire) {
            return;
        }
        *slot = Some(termination);
        self.shared.terminated.store(true, Ordering::Release);
        drop(slot);
        self.shared.notify.notify_one();
    }
}

/// Consumer half.
pub struct Subscriber<T> {
    rx: mpsc::Receiver<T>,
    shared: Arc<Shared>,
    finished: bool,
}

impl<T> Subscriber<T> {
    /// Wait for the next signal.
    ///
    /// Yields `Some(Ok(value))` for each value, `Some(Err(_))` once if the
    /// channel failed, and `None` after completion (or after the failure has
    /// been reported). Dropping every emitter counts as completion.
    pub async fn recv(&mut self) -> Option<Result<T, VoiceError>> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(Ok(value)),
                Err(TryRecvError::Disconnected) => return self.finish(),
                Err(TryRecvError::Empty) => {}
            }

            if self.shared.terminated.load(Ordering::Acquire) {
                // A value may have landed between the drain above and the flag.
                return match self.rx.try_recv() {
                    Ok(value) => Some(Ok(value)),
                    Err(_) => self.finish(),
                };
            }

            tokio::select! {
                biased;
                value = self.rx.recv() => {
                    return match value {
                        Some(value) => Some(Ok(value)),
                        None => self.finish(),
                    };
                }
                _ = self.shared.notify.notified() => {}
            }
        }
    }

    /// Number of values waiting to be received.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    fn finish(&mut self) -> Option<Result<T, VoiceError>> {
        self.finished = true;
        self.rx.close();
        match self.shared.termination.lock().take() {
            Some(Termination::Failed(error)) => Some(Err(error)),
            Some(Termination::Completed) | None => None,
        }
    }
}

/// Callbacks driven by [`Subscriber::subscribe`].
#[async_trait]
pub trait SignalHandler<T: Send + 'static>: Send + 'static {
    /// Handle one value. Returning an error ends the subscription and routes
    /// the error to [`on_error`](Self::on_error).
    async fn on_next(&mut self, value: T) -> Result<(), VoiceError>;

    async fn on_error(&mut self, error: VoiceError) {
        tracing::warn!(error = %error, "Bus subscription terminated with error");
    }

    async fn on_complete(&mut self) {}
}

impl<T: Send + 'static> Subscriber<T> {
    /// Drive `handler` on a background task until the channel terminates.
    pub fn subscribe<H>(mut self, mut handler: H) -> JoinHandle<()>
    where
        H: SignalHandler<T>,
    {
        tokio::spawn(async move {
            while let Some(signal) = self.recv().await {
                let outcome = match signal {
                    Ok(value) => handler.on_next(value).await,
                    Err(error) => Err(error),
                };
                if let Err(error) = outcome {
                    handler.on_error(error).await;
                    return;
                }
            }
            handler.on_complete().await;
        })
    }
}
