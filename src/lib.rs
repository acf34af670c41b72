//! bidi-voice: client core for real-time, two-way voice conversations.
//!
//! Captures microphone audio, streams it as JSON events over a WebSocket to
//! a voice agent, and plays the agent's synthesized audio back while
//! honouring mid-utterance interruptions.
//!
//! # Quick Start
//!
//! ```no_run
//! use bidi_voice::prelude::*;
//! # use bidi_voice::audio::{InputDevice, OutputDevice};
//!
//! # async fn example(mic: Box<dyn InputDevice>, speaker: Box<dyn OutputDevice>) -> bidi_voice::error::Result<()> {
//! let config = VoiceConfig::from_env()?;
//! let mut session = Session::new(config, mic, speaker);
//! session.initialize().await?;
//! while let Some(record) = session.next_record().await {
//!     println!("{record}");
//!     if matches!(record, SessionRecord::Failed { .. }) {
//!         break;
//!     }
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod bus;
pub mod config;
pub mod error;
pub mod prelude;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(feature = "cli")]
pub mod cli;
