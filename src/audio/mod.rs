//! Audio pipeline: capture, playback, and their hardware bindings.

pub mod capture;
#[cfg(feature = "device")]
pub mod device;
pub mod playback;
pub mod resample;
pub mod types;

pub use capture::{CaptureSource, FrameHandler, InputDevice};
pub use playback::{
    OutputDevice, PlaybackConfig, PlaybackFailureHandler, PlaybackQueue, PlaybackSink, QueuedAudio,
};
pub use types::*;
