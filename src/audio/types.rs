//! Audio-related types.

use bon::Builder;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// PCM sample encoding agreed with the agent at session start.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PcmFormat {
    /// Signed 16-bit little-endian samples. Sent on the wire as `"pcm"`.
    #[default]
    #[serde(rename = "pcm")]
    #[strum(serialize = "pcm")]
    Pcm16,
}

impl PcmFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Pcm16 => 2,
        }
    }
}

/// Fixed audio layout for one session. Never renegotiated per frame.
#[derive(Debug, Clone, Builder, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[builder(default = 16_000)]
    pub input_sample_rate: u32,
    #[builder(default = 16_000)]
    pub output_sample_rate: u32,
    #[builder(default = 1)]
    pub channels: u16,
    #[builder(default)]
    pub format: PcmFormat,
    /// Samples per channel delivered by each capture callback.
    #[builder(default = 512)]
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AudioConfig {
    /// Bytes in one captured frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_size * usize::from(self.channels.max(1)) * self.format.bytes_per_sample()
    }
}

/// One chunk of raw PCM. Cloning shares the underlying buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioFrame(Bytes);

impl AudioFrame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into sub-chunks of at most `chunk_bytes`, sharing the buffer.
    pub fn chunks(&self, chunk_bytes: usize) -> impl Iterator<Item = Bytes> + '_ {
        let step = chunk_bytes.max(1);
        (0..self.0.len())
            .step_by(step)
            .map(move |start| self.0.slice(start..(start + step).min(self.0.len())))
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}
