//! Session lifecycle: acquire, close, list.
//!
//! Sessions are ids assigned by the peer; none is ever invented locally.
//!
//! - The **root** session is cloned once during [`Connection::bootstrap`] and
//!   lives for the whole process. Closing it is a no-op unless the caller
//!   passes `exiting = true`, which only the graceful shutdown path does.
//! - **Ephemeral** sessions are cloned from the root per command and closed
//!   when the command completes.
//! - The sessions that already existed at startup are captured once so they
//!   can be bulk-closed later.

use tracing::{debug, info, warn};

use crate::nrepl::connection::Connection;
use crate::nrepl::message::{Request, Response, STATUS_SESSION_CLOSED};
use crate::{AppError, Result};

/// Which queue a session request's replies are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Via {
    /// No id; replies land on the default queue (startup only).
    Default,
    /// Fresh id with a registered correlator.
    Correlated,
}

impl Connection {
    async fn exchange(&self, request: &Request, via: Via) -> Result<Vec<Response>> {
        match via {
            Via::Default => self.call_unsolicited(request).await,
            Via::Correlated => self.call(request).await,
        }
    }

    /// List sessions, capture the startup snapshot, and acquire the root
    /// session, all through the default queue. Afterwards the default queue
    /// is drained in the background and every exchange is correlated.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if the peer omits `sessions` or `new-session`,
    ///   or bootstrap already ran.
    /// - `AppError::Transport` if the connection fails.
    pub async fn bootstrap(&self) -> Result<()> {
        if self.root_session.get().is_some() {
            return Err(AppError::Protocol("connection already bootstrapped".into()));
        }

        let existing = sessions_from(&self.exchange(&Request::LsSessions, Via::Default).await?)?;
        info!(count = existing.len(), "existing nREPL sessions captured");
        let _ = self.existing_sessions.set(existing);

        let replies = self
            .exchange(&Request::Clone { parent: None }, Via::Default)
            .await?;
        let root = new_session_from(&replies)?;
        info!(session = %root, "root session acquired");
        let _ = self.root_session.set(root);

        self.drain_unsolicited().await;
        Ok(())
    }

    /// The root session, once bootstrap has run.
    #[must_use]
    pub fn root_session(&self) -> Option<&str> {
        self.root_session.get().map(String::as_str)
    }

    /// Sessions that existed before this client connected.
    #[must_use]
    pub fn existing_sessions(&self) -> &[String] {
        self.existing_sessions.get().map_or(&[], Vec::as_slice)
    }

    /// Clone a new session, from `parent` when given.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if the reply carries no `new-session`.
    /// - `AppError::Transport` if the connection fails.
    pub async fn acquire_session(&self, parent: Option<&str>) -> Result<String> {
        let request = Request::Clone {
            parent: parent.map(str::to_owned),
        };
        let session = new_session_from(&self.exchange(&request, Via::Correlated).await?)?;
        debug!(session = %session, parent = ?parent, "session acquired");
        Ok(session)
    }

    /// Clone a throwaway session from the root and track it until
    /// [`Connection::release_ephemeral`] closes it.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if bootstrap has not run or the reply carries no
    ///   `new-session`.
    /// - `AppError::Transport` if the connection fails.
    pub async fn acquire_ephemeral(&self) -> Result<String> {
        let root = self
            .root_session()
            .ok_or_else(|| AppError::Protocol("no root session; connection not bootstrapped".into()))?;
        let session = self.acquire_session(Some(root)).await?;
        self.ephemeral_sessions().insert(session.clone());
        Ok(session)
    }

    /// Close an ephemeral session and stop tracking it.
    ///
    /// # Errors
    ///
    /// As [`Connection::close_session`].
    pub async fn release_ephemeral(&self, session: &str) -> Result<bool> {
        let closed = self.close_session(session, false).await;
        self.ephemeral_sessions().remove(session);
        closed
    }

    /// Ephemeral sessions currently open.
    #[must_use]
    pub fn open_ephemeral_sessions(&self) -> Vec<String> {
        self.ephemeral_sessions().iter().cloned().collect()
    }

    /// Close `session`.
    ///
    /// Returns `Ok(false)` without contacting the peer when `session` is the
    /// root session and `exiting` is false.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionClose` if the peer does not confirm with
    ///   `session-closed`. The connection stays usable.
    /// - `AppError::Transport` if the connection fails.
    pub async fn close_session(&self, session: &str, exiting: bool) -> Result<bool> {
        if !exiting && self.root_session() == Some(session) {
            debug!(session, "refusing to close root session outside shutdown");
            return Ok(false);
        }

        let request = Request::Close {
            session: session.to_owned(),
        };
        let replies = self.exchange(&request, Via::Correlated).await?;
        if replies.iter().any(|r| r.has_status(STATUS_SESSION_CLOSED)) {
            debug!(session, "session closed");
            Ok(true)
        } else {
            let status = replies.last().and_then(|r| r.status.clone()).unwrap_or_default();
            Err(AppError::SessionClose(format!(
                "session '{session}' not confirmed closed, status {status:?}"
            )))
        }
    }

    /// List the sessions the server currently knows about.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if the reply carries no `sessions`.
    /// - `AppError::Transport` if the connection fails.
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        sessions_from(&self.exchange(&Request::LsSessions, Via::Correlated).await?)
    }

    /// Close every session from the startup snapshot except the root.
    ///
    /// Returns the closed ids and a description of each failure; only a
    /// transport failure aborts the sweep.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the connection fails mid-sweep.
    pub async fn close_other_sessions(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mut closed = Vec::new();
        let mut failures = Vec::new();
        for session in self.existing_sessions() {
            if self.root_session() == Some(session.as_str()) {
                continue;
            }
            match self.close_session(session, false).await {
                Ok(_) => closed.push(session.clone()),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(session = %session, error = %err, "failed to close session");
                    failures.push(err.to_string());
                }
            }
        }
        Ok((closed, failures))
    }
}

fn new_session_from(replies: &[Response]) -> Result<String> {
    replies
        .iter()
        .find_map(|r| r.new_session.clone())
        .ok_or_else(|| AppError::Protocol("clone reply carried no new-session".into()))
}

fn sessions_from(replies: &[Response]) -> Result<Vec<String>> {
    replies
        .iter()
        .find_map(|r| r.sessions.clone())
        .ok_or_else(|| AppError::Protocol("ls-sessions reply carried no sessions".into()))
}
