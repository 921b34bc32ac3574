//! The connection context shared by every component.
//!
//! [`Connection`] owns everything that would otherwise be process-wide
//! state: the outbound queue, the demultiplex table, the default queue, the
//! root session, and the startup session snapshot. It is created once at
//! startup, handed around as `Arc<Connection>`, and torn down exactly once by
//! [`Connection::shutdown_gracefully`] or by a fatal failure.
//!
//! # Lifecycle
//!
//! 1. [`Connection::open`] reads the port file, connects, and spawns the
//!    reader and writer loops ([`Connection::start`] for any byte stream).
//! 2. [`Connection::bootstrap`] lists existing sessions and acquires the root
//!    session through the default queue, then hands the default queue to a
//!    drain task.
//! 3. [`Connection::start_keepalive`] begins periodic liveness probes.
//! 4. Callers evaluate through correlators until shutdown.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, MutexGuard, OnceLock, PoisonError};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bencode::Value;
use crate::config::GlobalConfig;
use crate::nrepl::codec::BencodeCodec;
use crate::nrepl::keepalive;
use crate::nrepl::message::{Request, Response};
use crate::nrepl::reader::run_reader;
use crate::nrepl::router::{Inbound, Inbox, Router};
use crate::nrepl::shutdown::Shutdown;
use crate::nrepl::transport;
use crate::nrepl::writer::{run_writer, Outbound, OutboundTx};
use crate::{AppError, Result};

/// One registered conversation with the peer.
///
/// Holds the inbox fed by the router. Dropping it removes the id from the
/// demultiplex table, including when the owning task is aborted.
#[derive(Debug)]
pub struct Correlator {
    id: String,
    inbox: Inbox,
    router: Router,
}

impl Correlator {
    /// Request id this correlator answers to.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next message addressed to this id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` when the fatal sentinel arrives or the
    /// inbox is closed.
    pub async fn recv(&mut self) -> Result<Response> {
        match self.inbox.recv().await {
            Some(Inbound::Message(response)) => Ok(response),
            Some(Inbound::Fatal(reason)) => Err(AppError::Transport(reason)),
            None => Err(AppError::Transport(format!(
                "inbox for request '{}' closed",
                self.id
            ))),
        }
    }

}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.router.unregister(&self.id);
    }
}

/// Shared connection context. See the module docs for the lifecycle.
#[derive(Debug)]
pub struct Connection {
    config: GlobalConfig,
    outbound: OutboundTx,
    router: Router,
    /// Default queue; `None` once handed to the drain task.
    default_rx: Mutex<Option<Inbox>>,
    shutdown: Shutdown,
    pub(crate) root_session: OnceLock<String>,
    pub(crate) existing_sessions: OnceLock<Vec<String>>,
    /// Ephemeral sessions cloned but not yet closed.
    ephemeral: std::sync::Mutex<BTreeSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Read the port file, connect to the server, and start the loops.
    ///
    /// # Errors
    ///
    /// - `AppError::Io` / `AppError::Config` if the port file is unusable.
    /// - `AppError::Transport` if the connection cannot be established.
    pub async fn open(
        port_file: &Path,
        config: GlobalConfig,
        shutdown: Shutdown,
    ) -> Result<Arc<Self>> {
        let port = transport::read_port_file(port_file)?;
        let (read_half, write_half) = transport::connect(&config.host, port).await?;
        Ok(Self::start(read_half, write_half, config, shutdown))
    }

    /// Spawn the reader and writer loops over an arbitrary byte stream.
    #[must_use]
    pub fn start<R, W>(source: R, sink: W, config: GlobalConfig, shutdown: Shutdown) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (router, default_rx) = Router::new();
        let codec = BencodeCodec::with_max_frame_bytes(config.max_frame_bytes);

        let writer = tokio::spawn(run_writer(
            sink,
            outbound_rx,
            router.clone(),
            shutdown.clone(),
        ));
        let reader = tokio::spawn(run_reader(source, codec, router.clone(), shutdown.clone()));

        Arc::new(Self {
            config,
            outbound,
            router,
            default_rx: Mutex::new(Some(default_rx)),
            shutdown,
            root_session: OnceLock::new(),
            existing_sessions: OnceLock::new(),
            ephemeral: std::sync::Mutex::new(BTreeSet::new()),
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    /// Configuration this connection was started with.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Shutdown coordinator shared with the loops.
    #[must_use]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// The demultiplex table.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    pub(crate) fn ephemeral_sessions(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.ephemeral.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a message onto the outbound queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the writer loop has stopped.
    pub fn send(&self, message: Value) -> Result<()> {
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| AppError::Transport("outbound queue closed".into()))
    }

    /// Register a fresh request id and return its correlator.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the connection has already failed.
    pub fn correlate(&self) -> Result<Correlator> {
        let id = uuid::Uuid::new_v4().to_string();
        let inbox = self.router.register(&id)?;
        Ok(Correlator {
            id,
            inbox,
            router: self.router.clone(),
        })
    }

    /// Send `request` with a fresh id and collect every reply up to and
    /// including the one that completes it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the connection fails first.
    pub async fn call(&self, request: &Request) -> Result<Vec<Response>> {
        let mut correlator = self.correlate()?;
        let replies = self.converse(&mut correlator, request).await;
        replies
    }

    async fn converse(
        &self,
        correlator: &mut Correlator,
        request: &Request,
    ) -> Result<Vec<Response>> {
        self.send(request.to_value(Some(correlator.id())))?;
        let mut replies = Vec::new();
        loop {
            let response = correlator.recv().await?;
            let done = request.completed_by(&response);
            replies.push(response);
            if done {
                return Ok(replies);
            }
        }
    }

    /// Send `request` without an id and read its replies from the default
    /// queue until a terminal status. Only valid before
    /// [`Connection::bootstrap`] finishes.
    ///
    /// Unkeyed replies cannot be told apart, so the exchange ends only on
    /// `done`; ending early would leave a late `done` to be taken for the
    /// next request's reply.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if the default queue was already handed off.
    /// - `AppError::Transport` if the connection fails first.
    pub(crate) async fn call_unsolicited(&self, request: &Request) -> Result<Vec<Response>> {
        let mut guard = self.default_rx.lock().await;
        let Some(default_rx) = guard.as_mut() else {
            return Err(AppError::Protocol(
                "default queue is no longer available for requests".into(),
            ));
        };

        self.send(request.to_value(None))?;
        let mut replies = Vec::new();
        loop {
            match default_rx.recv().await {
                Some(Inbound::Message(response)) => {
                    let done = response.is_done();
                    replies.push(response);
                    if done {
                        return Ok(replies);
                    }
                }
                Some(Inbound::Fatal(reason)) => return Err(AppError::Transport(reason)),
                None => return Err(AppError::Transport("default queue closed".into())),
            }
        }
    }

    /// Hand the default queue to a task that logs anything still arriving.
    pub(crate) async fn drain_unsolicited(&self) {
        let Some(mut default_rx) = self.default_rx.lock().await.take() else {
            return;
        };
        let handle = tokio::spawn(async move {
            while let Some(item) = default_rx.recv().await {
                match item {
                    Inbound::Message(response) => {
                        debug!(message = %response.raw, "unsolicited nREPL message dropped");
                    }
                    Inbound::Fatal(_) => break,
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    /// Start the keepalive monitor.
    pub async fn start_keepalive(&self) {
        let handle = keepalive::spawn_keepalive(
            self.outbound.clone(),
            self.config.keepalive_interval(),
            self.shutdown.clone(),
        );
        self.tasks.lock().await.push(handle);
    }

    /// Run the graceful shutdown handshake.
    ///
    /// Closes ephemeral sessions left behind by abandoned commands, closes
    /// the root session with the exiting override, enqueues the stop
    /// sentinel, and waits for both confirmations. The driver confirmation
    /// comes from whoever owns the editor side, once it has torn down.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the connection fails before both
    /// confirmations arrive.
    pub async fn shutdown_gracefully(&self) -> Result<()> {
        let leftovers = std::mem::take(&mut *self.ephemeral_sessions());
        for session in leftovers {
            match self.close_session(&session, false).await {
                Ok(_) => debug!(session = %session, "abandoned ephemeral session closed"),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(session = %session, error = %err, "abandoned session close failed"),
            }
        }

        if let Some(root) = self.root_session.get() {
            match self.close_session(root, true).await {
                Ok(_) => info!(session = %root, "root session closed"),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => warn!(session = %root, error = %err, "root session close failed"),
            }
        }

        self.shutdown.begin_graceful();
        self.outbound
            .send(Outbound::Stop)
            .map_err(|_| AppError::Transport("outbound queue closed before stop".into()))?;
        self.shutdown.wait_for_confirmations().await?;

        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        Ok(())
    }
}
