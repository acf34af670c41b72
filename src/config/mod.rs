//! Configuration (layered: builder > `BIDI_VOICE_*` env > `.env` file).

pub mod endpoint;

pub use endpoint::{ConnectTarget, DefaultResolver, EndpointResolver, RUNTIME_SESSION_HEADER};

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bon::Builder;
use url::Url;

use crate::audio::{AudioConfig, PlaybackConfig};
use crate::error::{Result, VoiceError};

/// Direct endpoint used when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

/// Region used for routed endpoints when none is configured.
pub const DEFAULT_REGION: &str = "ap-northeast-1";

/// Where the session connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A WebSocket URL used as-is.
    Direct { url: String },
    /// A managed agent runtime, reached through its regional gateway.
    Runtime { runtime_arn: String, region: String },
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Direct {
            url: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl Endpoint {
    /// Combine the optional endpoint settings.
    ///
    /// A URL and a runtime identifier are mutually exclusive. With neither,
    /// the default direct endpoint is used.
    pub fn from_parts(
        url: Option<String>,
        runtime_arn: Option<String>,
        region: Option<String>,
    ) -> Result<Self> {
        match (url, runtime_arn) {
            (Some(_), Some(_)) => Err(VoiceError::Configuration(
                "an endpoint URL and a runtime ARN cannot both be set".into(),
            )),
            (Some(url), None) => Ok(Self::Direct { url }),
            (None, Some(runtime_arn)) => Ok(Self::Runtime {
                runtime_arn,
                region: region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            }),
            (None, None) => Ok(Self::default()),
        }
    }

    pub fn is_routed(&self) -> bool {
        matches!(self, Self::Runtime { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { url } => write!(f, "{url}"),
            Self::Runtime {
                runtime_arn,
                region,
            } => write!(f, "{runtime_arn} ({region})"),
        }
    }
}

/// Everything a [`Session`](crate::session::Session) needs to run.
#[derive(Clone, Builder)]
pub struct VoiceConfig {
    #[builder(default)]
    pub endpoint: Endpoint,
    #[builder(default)]
    pub audio: AudioConfig,
    #[builder(default)]
    pub playback: PlaybackConfig,
    /// Captured frames buffered between the device thread and the sender.
    #[builder(default = 64)]
    pub capture_queue_capacity: usize,
    /// Decoded events buffered between the socket and the dispatcher.
    #[builder(default = 64)]
    pub inbound_queue_capacity: usize,
    /// Records held for the caller. When full, the oldest transcript preview
    /// is evicted first.
    #[builder(default = 256)]
    pub record_queue_capacity: usize,
    /// Log every inbound event type.
    #[builder(default)]
    pub debug: bool,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// Sent as `Authorization: Bearer ...` on routed connections.
    pub bearer_token: Option<String>,
}

impl fmt::Debug for VoiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceConfig")
            .field("endpoint", &self.endpoint)
            .field("audio", &self.audio)
            .field("playback", &self.playback)
            .field("capture_queue_capacity", &self.capture_queue_capacity)
            .field("inbound_queue_capacity", &self.inbound_queue_capacity)
            .field("record_queue_capacity", &self.record_queue_capacity)
            .field("debug", &self.debug)
            .field("input_device", &self.input_device)
            .field("output_device", &self.output_device)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl VoiceConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // missing .env is fine
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from a specific env file. Process variables fill the gaps.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let vars = dotenvy::from_path_iter(path)
            .and_then(|iter| iter.collect::<std::result::Result<HashMap<_, _>, _>>())
            .map_err(|error| {
                VoiceError::Configuration(format!("failed to read {}: {error}", path.display()))
            })?;
        Self::from_lookup(|key| vars.get(key).cloned().or_else(|| std::env::var(key).ok()))
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let region = get("BIDI_VOICE_REGION").or_else(|| get("AWS_DEFAULT_REGION"));
        let endpoint = Endpoint::from_parts(
            get("BIDI_VOICE_ENDPOINT"),
            get("BIDI_VOICE_RUNTIME_ARN"),
            region,
        )?;

        let defaults = AudioConfig::default();
        let audio = AudioConfig::builder()
            .input_sample_rate(parse_or(&get, "BIDI_VOICE_INPUT_SAMPLE_RATE", defaults.input_sample_rate)?)
            .output_sample_rate(parse_or(&get, "BIDI_VOICE_OUTPUT_SAMPLE_RATE", defaults.output_sample_rate)?)
            .channels(parse_or(&get, "BIDI_VOICE_CHANNELS", defaults.channels)?)
            .frame_size(parse_or(&get, "BIDI_VOICE_FRAME_SIZE", defaults.frame_size)?)
            .build();

        let playback_defaults = PlaybackConfig::default();
        let playback = PlaybackConfig::builder()
            .poll_interval(playback_defaults.poll_interval)
            .chunk_bytes(parse_or(&get, "BIDI_VOICE_CHUNK_BYTES", audio.frame_bytes())?)
            .queue_capacity(parse_or(
                &get,
                "BIDI_VOICE_PLAYBACK_QUEUE_CAPACITY",
                playback_defaults.queue_capacity,
            )?)
            .build();

        let config = Self::builder()
            .endpoint(endpoint)
            .audio(audio)
            .playback(playback)
            .debug(parse_or(&get, "BIDI_VOICE_DEBUG", false)?)
            .maybe_input_device(get("BIDI_VOICE_INPUT_DEVICE"))
            .maybe_output_device(get("BIDI_VOICE_OUTPUT_DEVICE"))
            .maybe_bearer_token(get("BIDI_VOICE_BEARER_TOKEN"))
            .build();
        config.validate()?;
        Ok(config)
    }

    /// Check that every setting is usable before any resource is acquired.
    pub fn validate(&self) -> Result<()> {
        match &self.endpoint {
            Endpoint::Direct { url } => {
                let parsed = Url::parse(url).map_err(|error| {
                    VoiceError::Configuration(format!("invalid endpoint URL {url:?}: {error}"))
                })?;
                if !matches!(parsed.scheme(), "ws" | "wss") {
                    return Err(VoiceError::Configuration(format!(
                        "endpoint URL must use ws:// or wss://, got {url:?}"
                    )));
                }
            }
            Endpoint::Runtime {
                runtime_arn,
                region,
            } => {
                if runtime_arn.trim().is_empty() {
                    return Err(VoiceError::Configuration("runtime ARN is empty".into()));
                }
                if region.trim().is_empty() {
                    return Err(VoiceError::Configuration("region is empty".into()));
                }
            }
        }

        let audio = &self.audio;
        if audio.input_sample_rate == 0 || audio.output_sample_rate == 0 {
            return Err(VoiceError::Configuration("sample rates must be positive".into()));
        }
        if audio.channels == 0 {
            return Err(VoiceError::Configuration("channel count must be positive".into()));
        }
        if audio.frame_size == 0 {
            return Err(VoiceError::Configuration("frame size must be positive".into()));
        }
        let sample_bytes = audio.format.bytes_per_sample();
        if self.playback.chunk_bytes == 0 || self.playback.chunk_bytes % sample_bytes != 0 {
            return Err(VoiceError::Configuration(format!(
                "playback chunk size must be a positive multiple of {sample_bytes} bytes"
            )));
        }
        if self.playback.poll_interval.is_zero() {
            return Err(VoiceError::Configuration("poll interval must be positive".into()));
        }
        if self.playback.queue_capacity == 0
            || self.capture_queue_capacity == 0
            || self.inbound_queue_capacity == 0
            || self.record_queue_capacity == 0
        {
            return Err(VoiceError::Configuration("queue capacities must be positive".into()));
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|error: T::Err| {
            VoiceError::Configuration(format!("{key}={raw:?} is invalid: {error}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_local_relay() {
        let config = VoiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.endpoint, Endpoint::default());
        assert!(!config.endpoint.is_routed());
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.playback.chunk_bytes, 1024);
        assert!(!config.debug);
    }

    #[test]
    fn runtime_region_falls_back_to_aws_default_region() {
        let config = VoiceConfig::from_lookup(lookup(&[
            ("BIDI_VOICE_RUNTIME_ARN", "arn:aws:bedrock-agentcore:us-west-2:1:runtime/voice"),
            ("AWS_DEFAULT_REGION", "us-west-2"),
        ]))
        .unwrap();
        assert_eq!(
            config.endpoint,
            Endpoint::Runtime {
                runtime_arn: "arn:aws:bedrock-agentcore:us-west-2:1:runtime/voice".into(),
                region: "us-west-2".into(),
            }
        );

        let config =
            VoiceConfig::from_lookup(lookup(&[("BIDI_VOICE_RUNTIME_ARN", "arn:x")])).unwrap();
        assert!(matches!(config.endpoint, Endpoint::Runtime { ref region, .. } if region == DEFAULT_REGION));
    }

    #[test]
    fn url_and_runtime_together_are_rejected() {
        let error = VoiceConfig::from_lookup(lookup(&[
            ("BIDI_VOICE_ENDPOINT", "ws://example.test/ws"),
            ("BIDI_VOICE_RUNTIME_ARN", "arn:x"),
        ]))
        .unwrap_err();
        assert!(matches!(error, VoiceError::Configuration(_)));
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let error =
            VoiceConfig::from_lookup(lookup(&[("BIDI_VOICE_CHANNELS", "stereo")])).unwrap_err();
        assert!(error.to_string().contains("BIDI_VOICE_CHANNELS"));
    }

    #[test]
    fn validate_rejects_http_urls_and_odd_chunks() {
        let config = VoiceConfig::builder()
            .endpoint(Endpoint::Direct {
                url: "http://localhost:8080/ws".into(),
            })
            .build();
        assert!(config.validate().is_err());

        let config = VoiceConfig::builder()
            .playback(PlaybackConfig::builder().chunk_bytes(3).build())
            .build();
        assert!(config.validate().is_err());

        let config = VoiceConfig::builder().record_queue_capacity(0).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_the_token() {
        let config = VoiceConfig::builder().bearer_token("secret".to_string()).build();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
    }
}
