//! Outbound and inbound event types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec;
use crate::audio::{AudioConfig, AudioFrame, PcmFormat};
use crate::error::VoiceError;

/// Text sent with the terminal `bidi_text_input` event when a session ends.
pub const END_CONVERSATION_TEXT: &str = "Ending conversation";

/// Events the client sends to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "bidi_audio_input")]
    AudioInput {
        #[serde(with = "codec::base64_audio")]
        audio: AudioFrame,
        format: PcmFormat,
        sample_rate: u32,
        channels: u16,
    },
    #[serde(rename = "bidi_text_input")]
    TextInput { text: String, role: String },
}

impl OutboundEvent {
    /// Wrap one captured frame using the session's input layout.
    pub fn audio_input(audio: AudioFrame, config: &AudioConfig) -> Self {
        Self::AudioInput {
            audio,
            format: config.format,
            sample_rate: config.input_sample_rate,
            channels: config.channels,
        }
    }

    pub fn text_input(text: impl Into<String>, role: impl Into<String>) -> Self {
        Self::TextInput {
            text: text.into(),
            role: role.into(),
        }
    }

    /// The terminal signal sent while a session closes.
    pub fn end_conversation() -> Self {
        Self::text_input(END_CONVERSATION_TEXT, "user")
    }

    pub fn to_json(&self) -> Result<String, VoiceError> {
        serde_json::to_string(self).map_err(VoiceError::from)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AudioInput { .. } => "bidi_audio_input",
            Self::TextInput { .. } => "bidi_text_input",
        }
    }
}

/// Events the agent sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Synthesized speech, already base64-decoded.
    AudioOutput { audio: AudioFrame },
    Transcript {
        role: String,
        text: String,
        is_final: bool,
    },
    ToolUse { name: String, input: Value },
    /// The agent dropped its buffered speech because the user started talking.
    Interruption { reason: String },
    ConnectionRestart,
    Error { message: String },
    /// A frame type this client does not know. Ignored by the session.
    Unknown { event_type: String },
}

impl InboundEvent {
    /// Decode one text frame.
    pub fn from_json(payload: &str) -> Result<Self, VoiceError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|error| VoiceError::Decode(format!("frame is not valid JSON: {error}")))?;
        Self::from_payload(&value)
    }

    /// Decode an already-parsed frame.
    pub fn from_payload(payload: &Value) -> Result<Self, VoiceError> {
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| VoiceError::Decode("frame has no string `type` field".into()))?;

        match event_type {
            "bidi_audio_stream" => {
                let encoded = required_str(payload, event_type, "audio")?;
                Ok(Self::AudioOutput {
                    audio: codec::decode(encoded)?,
                })
            }
            "bidi_transcript_stream" => Ok(Self::Transcript {
                role: required_str(payload, event_type, "role")?.to_string(),
                text: required_str(payload, event_type, "text")?.to_string(),
                is_final: payload
                    .get("is_final")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            "tool_use_stream" => {
                let tool_use = payload.get("current_tool_use").ok_or_else(|| {
                    VoiceError::Decode(format!("{event_type} is missing `current_tool_use`"))
                })?;
                Ok(Self::ToolUse {
                    name: required_str(tool_use, event_type, "name")?.to_string(),
                    input: tool_use.get("input").cloned().unwrap_or(Value::Null),
                })
            }
            "bidi_interruption" => Ok(Self::Interruption {
                reason: string_field(payload, "reason").unwrap_or_else(|| "unknown".into()),
            }),
            "bidi_connection_restart" => Ok(Self::ConnectionRestart),
            "bidi_error" => Ok(Self::Error {
                message: string_field(payload, "message")
                    .unwrap_or_else(|| "Agent reported an error".into()),
            }),
            other => Ok(Self::Unknown {
                event_type: other.to_string(),
            }),
        }
    }

    /// Wire type name, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::AudioOutput { .. } => "bidi_audio_stream",
            Self::Transcript { .. } => "bidi_transcript_stream",
            Self::ToolUse { .. } => "tool_use_stream",
            Self::Interruption { .. } => "bidi_interruption",
            Self::ConnectionRestart => "bidi_connection_restart",
            Self::Error { .. } => "bidi_error",
            Self::Unknown { event_type } => event_type,
        }
    }
}

fn required_str<'a>(value: &'a Value, event_type: &str, field: &str) -> Result<&'a str, VoiceError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| VoiceError::Decode(format!("{event_type} is missing string `{field}`")))
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}
