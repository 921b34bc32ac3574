//! Editor-facing side of the client.
//!
//! The editor speaks line-delimited JSON over stdin/stdout; each instruction
//! is turned into one or more evaluations against the nREPL connection.

pub mod commands;
pub mod protocol;
pub mod script;
pub mod server;

pub use server::{run_bridge, BridgeExit};
