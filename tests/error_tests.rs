//! Tests for the error taxonomy.

use bidi_voice::bus::BusError;
use bidi_voice::error::*;

#[test]
fn display_messages_are_stable() {
    assert_eq!(
        VoiceError::hardware("mic", "unplugged").to_string(),
        "Hardware error (mic): unplugged"
    );
    assert_eq!(VoiceError::stream_ended(None).to_string(), "Stream ended");
    assert_eq!(
        VoiceError::stream_ended(Some("1000 bye".into())).to_string(),
        "Stream ended: 1000 bye"
    );
    assert_eq!(
        VoiceError::Agent("quota exceeded".into()).to_string(),
        "Agent error: quota exceeded"
    );
}

#[test]
fn classification_is_stable_for_every_variant() {
    struct Case {
        error: VoiceError,
        category: ErrorCategory,
        terminal: bool,
        recovery: RecoveryAction,
    }

    let serde_error = serde_json::from_str::<serde_json::Value>("{not-json}").unwrap_err();
    let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk");

    let cases = vec![
        Case {
            error: VoiceError::Configuration("both endpoints".into()),
            category: ErrorCategory::Configuration,
            terminal: true,
            recovery: RecoveryAction::FixConfiguration,
        },
        Case {
            error: VoiceError::Connection("refused".into()),
            category: ErrorCategory::Connection,
            terminal: true,
            recovery: RecoveryAction::RetryConnect,
        },
        Case {
            error: VoiceError::Send("closed".into()),
            category: ErrorCategory::PerEvent,
            terminal: false,
            recovery: RecoveryAction::SkipEvent,
        },
        Case {
            error: VoiceError::Decode("bad base64".into()),
            category: ErrorCategory::PerEvent,
            terminal: false,
            recovery: RecoveryAction::SkipEvent,
        },
        Case {
            error: VoiceError::Serialization(serde_error),
            category: ErrorCategory::PerEvent,
            terminal: false,
            recovery: RecoveryAction::SkipEvent,
        },
        Case {
            error: VoiceError::stream_ended(None),
            category: ErrorCategory::StreamEnded,
            terminal: true,
            recovery: RecoveryAction::EndSession,
        },
        Case {
            error: VoiceError::Agent("boom".into()),
            category: ErrorCategory::Agent,
            terminal: true,
            recovery: RecoveryAction::EndSession,
        },
        Case {
            error: VoiceError::hardware("speaker", "write failed"),
            category: ErrorCategory::Hardware,
            terminal: true,
            recovery: RecoveryAction::CheckDevice,
        },
        Case {
            error: VoiceError::Bus(BusError::Terminated),
            category: ErrorCategory::Internal,
            terminal: true,
            recovery: RecoveryAction::EndSession,
        },
        Case {
            error: VoiceError::Io(io_error),
            category: ErrorCategory::Internal,
            terminal: true,
            recovery: RecoveryAction::EndSession,
        },
    ];

    for case in cases {
        assert_eq!(case.error.category(), case.category, "{}", case.error);
        assert_eq!(case.error.is_terminal(), case.terminal, "{}", case.error);
        assert_eq!(case.error.recovery_action(), case.recovery, "{}", case.error);
    }
}

#[test]
fn bus_errors_convert() {
    let error: VoiceError = BusError::Full.into();
    assert!(matches!(error, VoiceError::Bus(BusError::Full)));
}
