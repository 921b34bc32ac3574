//! TCP transport to the nREPL server.
//!
//! The port is published by the server in a rendezvous file (typically
//! `.nrepl-port`). It is read exactly once, before any background task
//! starts, and the single connection it names lives for the whole process.
//! There is no reconnection.

use std::path::Path;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Read the decimal port number from `path`.
///
/// Surrounding whitespace (including the trailing newline most servers
/// write) is ignored.
///
/// # Errors
///
/// - `AppError::Io` if the file cannot be read.
/// - `AppError::Config` if the contents are not a port number.
pub fn read_port_file(path: &Path) -> Result<u16> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        AppError::Io(format!("cannot read port file {}: {err}", path.display()))
    })?;
    let trimmed = raw.trim();
    let port = trimmed.parse::<u16>().map_err(|err| {
        AppError::Config(format!(
            "port file {} does not hold a port number ({trimmed:?}): {err}",
            path.display()
        ))
    })?;
    if port == 0 {
        return Err(AppError::Config(format!(
            "port file {} names port 0",
            path.display()
        )));
    }
    Ok(port)
}

/// Open the one connection to `host:port` and split it.
///
/// The read half belongs to the reader loop and the write half to the writer
/// loop, so neither side ever shares the socket.
///
/// # Errors
///
/// Returns `AppError::Transport` if the connection cannot be established.
pub async fn connect(host: &str, port: u16) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|err| AppError::Transport(format!("cannot connect to {host}:{port}: {err}")))?;
    if let Err(err) = stream.set_nodelay(true) {
        warn!(%err, "failed to set TCP_NODELAY on nrepl socket");
    }
    info!(host, port, "connected to nREPL");
    Ok(stream.into_split())
}
