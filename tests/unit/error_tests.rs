//! Unit tests for `AppError` display format and classification.

use plasmaplace::AppError;

#[test]
fn display_prefixes_name_the_variant() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Io("x".into()), "io: x"),
        (AppError::Codec("x".into()), "codec: x"),
        (AppError::Transport("x".into()), "transport: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::SessionClose("x".into()), "session close: x"),
        (AppError::Bridge("x".into()), "bridge: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn error_message_no_trailing_period() {
    let err = AppError::Transport("nREPL connection closed".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

/// Only connection-level failures are fatal; session and protocol failures
/// leave the connection usable.
#[test]
fn only_transport_and_codec_are_fatal() {
    assert!(AppError::Transport("gone".into()).is_fatal());
    assert!(AppError::Codec("bad frame".into()).is_fatal());
    assert!(!AppError::SessionClose("no ack".into()).is_fatal());
    assert!(!AppError::Protocol("no new-session".into()).is_fatal());
    assert!(!AppError::Bridge("bad json".into()).is_fatal());
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
    let err: AppError = io.into();
    assert_eq!(err, AppError::Io("no such file".into()));
}

#[test]
fn json_error_converts_to_bridge() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("truncated json");
    let err: AppError = json_err.into();
    assert!(matches!(err, AppError::Bridge(msg) if msg.starts_with("malformed json")));
}
