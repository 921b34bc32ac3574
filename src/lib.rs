#![forbid(unsafe_code)]

//! Plasmaplace: an nREPL client that bridges a text editor to a running
//! Clojure REPL.
//!
//! The editor talks line-delimited JSON on stdin/stdout ([`bridge`]); the
//! REPL is reached over one bencode TCP connection ([`nrepl`]) on which many
//! evaluations are multiplexed by request id.

pub mod bencode;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod nrepl;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
