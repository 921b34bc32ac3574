//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure outside the nREPL socket.
    Io(String),
    /// Malformed bencode frame.
    Codec(String),
    /// The nREPL connection is gone; every pending request fails with this.
    Transport(String),
    /// The peer answered with an unexpected message shape.
    Protocol(String),
    /// The peer did not confirm a session close.
    SessionClose(String),
    /// Malformed instruction received from the editor bridge.
    Bridge(String),
}

impl AppError {
    /// Whether this error means the connection can no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Codec(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::SessionClose(msg) => write!(f, "session close: {msg}"),
            Self::Bridge(msg) => write!(f, "bridge: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Bridge(format!("malformed json: {err}"))
    }
}
