//! Wire protocol spoken with the voice agent: one JSON object per frame.

mod codec;
pub mod events;

pub use events::{InboundEvent, OutboundEvent, END_CONVERSATION_TEXT};
