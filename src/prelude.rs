//! Convenience re-exports for common use.

pub use crate::audio::{AudioConfig, AudioFrame, InputDevice, OutputDevice, PlaybackConfig};
pub use crate::config::{Endpoint, EndpointResolver, VoiceConfig};
pub use crate::error::{Result, VoiceError};
pub use crate::protocol::{InboundEvent, OutboundEvent};
pub use crate::session::{Session, SessionOutcome, SessionRecord, SessionState};
