//! Demultiplex table routing inbound messages to waiting correlators.
//!
//! Maintains one shared map behind a synchronous mutex that is never held
//! across an await, so entries can also be removed from `Drop`:
//!
//! - `pending`: request `id` → inbox sender, registered before the request
//!   is enqueued and removed when its correlator is dropped or the
//!   connection fails, whichever comes first.
//!
//! Messages for ids nobody waits on go to the default queue, except keepalive
//! replies, which are dropped here so they never reach anyone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::nrepl::message::Response;
use crate::{AppError, Result};

/// Item delivered to a correlator inbox or the default queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A decoded response.
    Message(Response),
    /// The connection is gone; no further messages will arrive.
    Fatal(String),
}

/// Receiving end of a correlator inbox.
pub type Inbox = mpsc::UnboundedReceiver<Inbound>;

/// Where [`Router::dispatch`] sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Delivered to the registered correlator.
    Correlator,
    /// Keepalive reply, dropped.
    Keepalive,
    /// No correlator registered; pushed to the default queue.
    Unsolicited,
}

#[derive(Debug, Default)]
struct Table {
    pending: HashMap<String, mpsc::UnboundedSender<Inbound>>,
    /// Set once the connection has failed; registration is refused after.
    failed: Option<String>,
}

/// Shared demultiplex table plus the default queue.
#[derive(Debug, Clone)]
pub struct Router {
    table: Arc<Mutex<Table>>,
    unsolicited: mpsc::UnboundedSender<Inbound>,
}

impl Router {
    /// Create a router and the receiving end of its default queue.
    #[must_use]
    pub fn new() -> (Self, Inbox) {
        let (unsolicited, default_rx) = mpsc::unbounded_channel();
        let router = Self {
            table: Arc::new(Mutex::new(Table::default())),
            unsolicited,
        };
        (router, default_rx)
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `id` and return its inbox.
    ///
    /// # Errors
    ///
    /// - `AppError::Transport` if the connection has already failed, so the
    ///   caller never waits on an inbox that cannot be fed.
    /// - `AppError::Protocol` if `id` is already outstanding.
    pub fn register(&self, id: &str) -> Result<Inbox> {
        let mut table = self.lock();
        if let Some(reason) = &table.failed {
            return Err(AppError::Transport(reason.clone()));
        }
        if table.pending.contains_key(id) {
            return Err(AppError::Protocol(format!(
                "request id '{id}' is already outstanding"
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        table.pending.insert(id.to_owned(), tx);
        debug!(request_id = id, "router: correlator registered");
        Ok(rx)
    }

    /// Remove `id` from the table. Idempotent.
    pub fn unregister(&self, id: &str) {
        if self.lock().pending.remove(id).is_some() {
            debug!(request_id = id, "router: correlator removed");
        }
    }

    /// Number of correlators currently waiting.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.lock().pending.len()
    }

    /// Route one inbound message.
    pub fn dispatch(&self, response: Response) -> Route {
        if response.is_keepalive() {
            return Route::Keepalive;
        }

        if let Some(id) = response.id.as_deref() {
            let table = self.lock();
            if let Some(tx) = table.pending.get(id) {
                if tx.send(Inbound::Message(response.clone())).is_ok() {
                    return Route::Correlator;
                }
                // Receiver dropped without unregistering; treat as unsolicited.
                warn!(request_id = id, "router: correlator inbox closed");
            }
        }

        if self.unsolicited.send(Inbound::Message(response)).is_err() {
            debug!("router: default queue closed, dropping unsolicited message");
        }
        Route::Unsolicited
    }

    /// Fail every outstanding correlator and the default queue.
    ///
    /// Every registered inbox receives [`Inbound::Fatal`] and is removed from
    /// the table; later calls to [`Router::register`] fail immediately.
    pub fn fail_all(&self, reason: &str) {
        let mut table = self.lock();
        if table.failed.is_none() {
            table.failed = Some(reason.to_owned());
        }
        let drained: Vec<_> = table.pending.drain().collect();
        drop(table);

        for (id, tx) in drained {
            debug!(request_id = %id, "router: delivering fatal sentinel");
            let _ = tx.send(Inbound::Fatal(reason.to_owned()));
        }
        let _ = self.unsolicited.send(Inbound::Fatal(reason.to_owned()));
    }
}
