//! Command-line surface for the `bidi-voice` binary.

use clap::Parser;

use crate::config::{Endpoint, VoiceConfig};
use crate::error::Result;
use crate::session::SessionRecord;

const GRAY: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";

/// Talk to a voice agent over a bidirectional WebSocket.
#[derive(Parser, Debug)]
#[command(name = "bidi-voice", version, about = "Bidirectional voice chat client")]
pub struct Cli {
    /// Log every inbound event type and enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// WebSocket endpoint of a directly reachable relay
    #[arg(long, conflicts_with = "runtime_arn")]
    pub endpoint: Option<String>,

    /// Managed agent runtime ARN (routed connection)
    #[arg(long)]
    pub runtime_arn: Option<String>,

    /// Region of the managed runtime
    #[arg(long)]
    pub region: Option<String>,

    /// Microphone sample rate in Hz
    #[arg(long)]
    pub input_sample_rate: Option<u32>,

    /// Speaker sample rate in Hz
    #[arg(long)]
    pub output_sample_rate: Option<u32>,

    #[arg(long)]
    pub channels: Option<u16>,

    /// Samples per captured frame
    #[arg(long)]
    pub frame_size: Option<usize>,

    /// Input device name (see --list-devices)
    #[arg(long)]
    pub input_device: Option<String>,

    /// Output device name (see --list-devices)
    #[arg(long)]
    pub output_device: Option<String>,

    /// Print available audio devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

impl Cli {
    /// Layer command-line flags over `base`.
    pub fn apply(&self, mut config: VoiceConfig) -> Result<VoiceConfig> {
        if self.endpoint.is_some() || self.runtime_arn.is_some() {
            let region = self.region.clone().or_else(|| match &config.endpoint {
                Endpoint::Runtime { region, .. } => Some(region.clone()),
                Endpoint::Direct { .. } => None,
            });
            config.endpoint =
                Endpoint::from_parts(self.endpoint.clone(), self.runtime_arn.clone(), region)?;
        } else if let (Some(new_region), Endpoint::Runtime { region, .. }) =
            (&self.region, &mut config.endpoint)
        {
            *region = new_region.clone();
        }

        let frame_size_changed = self.frame_size.is_some() || self.channels.is_some();
        if let Some(rate) = self.input_sample_rate {
            config.audio.input_sample_rate = rate;
        }
        if let Some(rate) = self.output_sample_rate {
            config.audio.output_sample_rate = rate;
        }
        if let Some(channels) = self.channels {
            config.audio.channels = channels;
        }
        if let Some(frame_size) = self.frame_size {
            config.audio.frame_size = frame_size;
        }
        if frame_size_changed {
            config.playback.chunk_bytes = config.audio.frame_bytes();
        }

        if self.input_device.is_some() {
            config.input_device = self.input_device.clone();
        }
        if self.output_device.is_some() {
            config.output_device = self.output_device.clone();
        }
        config.debug |= self.debug;

        config.validate()?;
        Ok(config)
    }
}

/// Console line for a record, or `None` if it should not be printed.
pub fn render_record(record: &SessionRecord) -> Option<String> {
    match record {
        SessionRecord::Transcript { is_final: true, .. } | SessionRecord::ToolUse { .. } => {
            Some(record.to_string())
        }
        SessionRecord::Transcript {
            is_final: false, ..
        }
        | SessionRecord::Interrupted { .. }
        | SessionRecord::Reconnecting => Some(format!("{GRAY}{record}{RESET}")),
        SessionRecord::Failed { message, .. } => Some(format!("Error: {message}")),
        SessionRecord::Closed { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOutcome;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["bidi-voice"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn endpoint_and_runtime_arn_conflict() {
        let result = Cli::try_parse_from([
            "bidi-voice",
            "--endpoint",
            "ws://a/ws",
            "--runtime-arn",
            "arn:x",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn runtime_flags_override_a_direct_base() {
        let cli = parse(&["--runtime-arn", "arn:x", "--region", "eu-west-1"]);
        let config = cli.apply(VoiceConfig::default()).unwrap();
        assert_eq!(
            config.endpoint,
            Endpoint::Runtime {
                runtime_arn: "arn:x".into(),
                region: "eu-west-1".into(),
            }
        );
    }

    #[test]
    fn frame_size_flag_resizes_playback_chunks() {
        let cli = parse(&["--frame-size", "256", "--channels", "2", "--debug"]);
        let config = cli.apply(VoiceConfig::default()).unwrap();
        assert_eq!(config.audio.frame_size, 256);
        assert_eq!(config.playback.chunk_bytes, 1024);
        assert!(config.debug);
    }

    #[test]
    fn previews_are_gray_and_finals_are_plain() {
        let final_line = SessionRecord::Transcript {
            role: "assistant".into(),
            text: "Hi".into(),
            is_final: true,
        };
        let preview = SessionRecord::Transcript {
            role: "assistant".into(),
            text: "H".into(),
            is_final: false,
        };
        assert_eq!(render_record(&final_line).as_deref(), Some("assistant: Hi"));
        assert_eq!(
            render_record(&preview).as_deref(),
            Some("\x1b[90massistant (preview): H\x1b[0m")
        );
        assert!(render_record(&SessionRecord::Closed {
            outcome: SessionOutcome::Stopped
        })
        .is_none());
    }

    #[test]
    fn tool_use_names_the_tool() {
        let record = SessionRecord::ToolUse {
            name: "weather".into(),
            input: serde_json::json!({"city": "Tokyo"}),
        };
        assert_eq!(
            render_record(&record).as_deref(),
            Some(r#"Using tool: weather. Input: {"city":"Tokyo"}"#)
        );
    }
}
