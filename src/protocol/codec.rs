//! Base64 (standard alphabet, padded) encoding for audio payloads.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serializer};

use crate::audio::AudioFrame;
use crate::error::VoiceError;

pub(crate) fn encode(frame: &AudioFrame) -> String {
    STANDARD.encode(frame.as_bytes())
}

pub(crate) fn decode(encoded: &str) -> Result<AudioFrame, VoiceError> {
    STANDARD
        .decode(encoded.trim())
        .map(AudioFrame::from)
        .map_err(|error| VoiceError::Decode(format!("invalid base64 audio payload: {error}")))
}

/// `#[serde(with = "...")]` adapter for [`AudioFrame`] fields.
pub(crate) mod base64_audio {
    use super::*;

    pub fn serialize<S: Serializer>(frame: &AudioFrame, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(frame))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AudioFrame, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        decode(&encoded).map_err(serde::de::Error::custom)
    }
}
