//! Global configuration parsing and validation.
//!
//! Every field has a default, so running without `--config` is the common
//! case. A TOML file only needs the keys it wants to override:
//!
//! ```toml
//! keepalive_interval_ms = 500
//! async_threshold_ms = 3000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Default upper bound for a single bencode string: 64 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

fn default_host() -> String {
    "localhost".into()
}

fn default_keepalive_interval_ms() -> u64 {
    1000
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_stacktrace_expr() -> String {
    "*e".into()
}

/// Global configuration parsed from an optional TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GlobalConfig {
    /// Host the nREPL server listens on; the port comes from the port file.
    #[serde(default = "default_host")]
    pub host: String,
    /// Period between keepalive `ls-sessions` probes.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Replies slower than this are delivered asynchronously; 0 disables.
    #[serde(default)]
    pub async_threshold_ms: u64,
    /// Largest encoded frame accepted from the peer.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Expression evaluated to fetch the stack trace after an exception.
    #[serde(default = "default_stacktrace_expr")]
    pub stacktrace_expr: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            async_threshold_ms: 0,
            max_frame_bytes: default_max_frame_bytes(),
            stacktrace_expr: default_stacktrace_expr(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(AppError::Config("host must not be empty".into()));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(AppError::Config(
                "keepalive_interval_ms must be greater than zero".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(AppError::Config(
                "max_frame_bytes must be greater than zero".into(),
            ));
        }
        if self.stacktrace_expr.trim().is_empty() {
            return Err(AppError::Config("stacktrace_expr must not be empty".into()));
        }
        Ok(())
    }

    /// Keepalive period as a [`Duration`].
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Async promotion threshold, or `None` when promotion is disabled.
    #[must_use]
    pub fn async_threshold(&self) -> Option<Duration> {
        (self.async_threshold_ms > 0).then(|| Duration::from_millis(self.async_threshold_ms))
    }
}
