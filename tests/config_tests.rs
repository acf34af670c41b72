//! Configuration loading from env files.

use std::io::Write;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use bidi_voice::config::{Endpoint, VoiceConfig};
use bidi_voice::error::VoiceError;

fn env_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write env file");
    file
}

#[test]
fn env_file_configures_a_routed_session() {
    let file = env_file(
        "BIDI_VOICE_RUNTIME_ARN=arn:aws:bedrock-agentcore:eu-west-1:1:runtime/voice\n\
         BIDI_VOICE_REGION=eu-west-1\n\
         BIDI_VOICE_OUTPUT_SAMPLE_RATE=24000\n\
         BIDI_VOICE_FRAME_SIZE=320\n\
         BIDI_VOICE_DEBUG=true\n\
         BIDI_VOICE_INPUT_DEVICE=\"USB Mic\"\n",
    );

    let config = VoiceConfig::from_env_file(file.path()).unwrap();

    assert_eq!(
        config.endpoint,
        Endpoint::Runtime {
            runtime_arn: "arn:aws:bedrock-agentcore:eu-west-1:1:runtime/voice".into(),
            region: "eu-west-1".into(),
        }
    );
    assert!(config.endpoint.is_routed());
    assert_eq!(config.audio.output_sample_rate, 24_000);
    assert_eq!(config.audio.frame_size, 320);
    assert_eq!(config.playback.chunk_bytes, 640);
    assert!(config.debug);
    assert_eq!(config.input_device.as_deref(), Some("USB Mic"));
}

#[test]
fn env_file_with_both_endpoints_is_rejected() {
    let file = env_file(
        "BIDI_VOICE_ENDPOINT=ws://localhost:9000/ws\n\
         BIDI_VOICE_RUNTIME_ARN=arn:x\n",
    );

    let error = VoiceConfig::from_env_file(file.path()).unwrap_err();
    assert!(matches!(error, VoiceError::Configuration(_)));
}

#[test]
fn missing_env_file_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let error = VoiceConfig::from_env_file(dir.path().join("absent.env")).unwrap_err();
    assert!(matches!(error, VoiceError::Configuration(_)));
}
