//! Shutdown coordination for the whole client.
//!
//! There is a single decision point for how the process ends:
//!
//! - **Graceful**: the editor asked to exit (or closed stdin). Once the
//!   editor bridge has torn down, the driver confirms; the connection closes
//!   the root session, enqueues the stop sentinel, and waits until the writer
//!   loop has confirmed too. Exit code `0`.
//! - **Fatal**: the reader or writer lost the connection. The loop that saw
//!   the failure calls [`Shutdown::fatal`]; nothing is sent to the peer.
//!   Exit code `1`.
//!
//! The first decision wins; later ones are logged and ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{AppError, Result};

/// Exit code of a clean shutdown.
pub const EXIT_OK: i32 = 0;

/// Exit code after a fatal transport failure.
pub const EXIT_FATAL: i32 = 1;

/// Independent parties that must acknowledge a graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The writer loop saw the stop sentinel and stopped sending.
    Writer,
    /// The top-level driver finished its own teardown and will issue no
    /// further requests.
    Driver,
}

/// Cloneable handle shared by every task that can end the process.
#[derive(Debug, Clone)]
pub struct Shutdown {
    token: CancellationToken,
    exit_code: Arc<OnceLock<i32>>,
    graceful: Arc<AtomicBool>,
    confirm_tx: mpsc::UnboundedSender<Confirmation>,
    confirm_rx: Arc<Mutex<mpsc::UnboundedReceiver<Confirmation>>>,
}

impl Shutdown {
    /// Create a coordinator with no decision made yet.
    #[must_use]
    pub fn new() -> Self {
        let (confirm_tx, confirm_rx) = mpsc::unbounded_channel();
        Self {
            token: CancellationToken::new(),
            exit_code: Arc::new(OnceLock::new()),
            graceful: Arc::new(AtomicBool::new(false)),
            confirm_tx,
            confirm_rx: Arc::new(Mutex::new(confirm_rx)),
        }
    }

    /// Token cancelled once the process is going down, by either path.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolve once the process is going down.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Whether the graceful handshake has started.
    #[must_use]
    pub fn is_graceful(&self) -> bool {
        self.graceful.load(Ordering::SeqCst)
    }

    /// Exit code decided so far, if any.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get().copied()
    }

    /// Record an unrecoverable failure and bring everything down.
    pub fn fatal(&self, reason: &str) {
        if self.exit_code.set(EXIT_FATAL).is_ok() {
            error!(reason, "fatal connection failure, shutting down");
        } else {
            debug!(reason, "fatal failure after shutdown was already decided");
        }
        self.token.cancel();
    }

    /// Mark the graceful handshake as started.
    ///
    /// From here on the reader treats the peer hanging up as expected.
    pub fn begin_graceful(&self) {
        self.graceful.store(true, Ordering::SeqCst);
        info!("graceful shutdown started");
    }

    /// Acknowledge one half of the graceful handshake.
    pub fn confirm(&self, who: Confirmation) {
        debug!(?who, "shutdown confirmation");
        if self.confirm_tx.send(who).is_err() {
            debug!(?who, "shutdown confirmation channel closed");
        }
    }

    /// Block until both the writer and the driver have confirmed.
    ///
    /// On success the exit code is settled to [`EXIT_OK`] and the token is
    /// cancelled so remaining background tasks stop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if a fatal failure cut the handshake short.
    pub async fn wait_for_confirmations(&self) -> Result<()> {
        let mut rx = self.confirm_rx.lock().await;
        let mut writer = false;
        let mut driver = false;

        while !(writer && driver) {
            tokio::select! {
                biased;

                confirmation = rx.recv() => match confirmation {
                    Some(Confirmation::Writer) => writer = true,
                    Some(Confirmation::Driver) => driver = true,
                    None => {
                        return Err(AppError::Transport(
                            "shutdown confirmation channel closed".into(),
                        ));
                    }
                },

                () = self.token.cancelled() => {
                    return Err(AppError::Transport(
                        "connection failed during graceful shutdown".into(),
                    ));
                }
            }
        }

        if self.exit_code.set(EXIT_OK).is_err() {
            debug!("exit code already decided before graceful completion");
        }
        self.token.cancel();
        info!("graceful shutdown confirmed by writer and driver");
        Ok(())
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
