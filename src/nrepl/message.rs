//! Typed nREPL requests and responses.
//!
//! Outbound messages are built from [`Request`] so that only the fixed
//! vocabulary (`clone`, `close`, `ls-sessions`, `eval`) can reach the socket.
//! Inbound dictionaries are lifted into [`Response`], whose optional fields
//! mirror the keys the peer may send, and classified with
//! [`Response::fragment`].

use std::collections::BTreeMap;

use crate::bencode::Value;
use crate::{AppError, Result};

/// Prefix of request ids issued by the keepalive monitor.
pub const KEEPALIVE_PREFIX: &str = "keepalive-";

/// Status marker that ends a conversation.
pub const STATUS_DONE: &str = "done";

/// Status marker confirming a `close`.
pub const STATUS_SESSION_CLOSED: &str = "session-closed";

/// Outbound nREPL operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Create a new session, optionally copying state from `parent`.
    Clone {
        /// Session to clone from.
        parent: Option<String>,
    },
    /// Close `session`.
    Close {
        /// Session to close.
        session: String,
    },
    /// List the sessions the server knows about.
    LsSessions,
    /// Evaluate `code` in `session`.
    Eval {
        /// Target session.
        session: String,
        /// Source text to evaluate.
        code: String,
    },
}

impl Request {
    /// Wire name of the operation.
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::Clone { .. } => "clone",
            Self::Close { .. } => "close",
            Self::LsSessions => "ls-sessions",
            Self::Eval { .. } => "eval",
        }
    }

    /// Render the request as a wire dictionary, tagged with `id` when given.
    #[must_use]
    pub fn to_value(&self, id: Option<&str>) -> Value {
        let mut map = BTreeMap::new();
        map.insert("op".to_owned(), Value::from(self.op()));
        if let Some(id) = id {
            map.insert("id".to_owned(), Value::from(id));
        }
        match self {
            Self::Clone { parent } => {
                if let Some(parent) = parent {
                    map.insert("session".to_owned(), Value::from(parent.as_str()));
                }
            }
            Self::Close { session } => {
                map.insert("session".to_owned(), Value::from(session.as_str()));
            }
            Self::LsSessions => {}
            Self::Eval { session, code } => {
                map.insert("session".to_owned(), Value::from(session.as_str()));
                map.insert("code".to_owned(), Value::from(code.as_str()));
            }
        }
        Value::Dict(map)
    }

    /// Whether `response` ends the conversation started by this request.
    ///
    /// A terminal status always does. On a correlated exchange `clone` and
    /// `ls-sessions` also end as soon as the field they exist for has
    /// arrived, since some servers send it without a status.
    #[must_use]
    pub fn completed_by(&self, response: &Response) -> bool {
        response.is_done()
            || match self {
                Self::Clone { .. } => response.new_session.is_some(),
                Self::LsSessions => response.sessions.is_some(),
                Self::Close { .. } | Self::Eval { .. } => false,
            }
    }
}

/// One classified piece of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Terminal status; the conversation is over.
    Done(Vec<String>),
    /// Text written to `*out*`.
    Out(String),
    /// Text written to `*err*`.
    Err(String),
    /// Exception class reported by the peer.
    Ex(String),
    /// Printed result of an evaluated form.
    Value(String),
    /// Anything else, rendered for diagnostics.
    Unknown(String),
}

/// Inbound nREPL message with the fields this client understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Request id this message answers, if any.
    pub id: Option<String>,
    /// Session the message belongs to.
    pub session: Option<String>,
    /// Text written to `*out*`.
    pub out: Option<String>,
    /// Text written to `*err*`.
    pub err: Option<String>,
    /// Exception class.
    pub ex: Option<String>,
    /// Printed value.
    pub value: Option<String>,
    /// Status flags, when `status` is a list of strings.
    pub status: Option<Vec<String>>,
    /// Session id created by a `clone`.
    pub new_session: Option<String>,
    /// Session ids returned by `ls-sessions`.
    pub sessions: Option<Vec<String>>,
    /// The dictionary as received.
    pub raw: Value,
}

impl Response {
    /// Lift a decoded frame into a `Response`.
    ///
    /// Fields with an unexpected shape stay `None`; they are still visible
    /// through [`Response::raw`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when the frame is not a dictionary.
    pub fn from_value(raw: Value) -> Result<Self> {
        let Some(map) = raw.as_dict() else {
            return Err(AppError::Protocol(format!(
                "expected a dictionary, received {raw}"
            )));
        };
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_owned);
        let strings = |key: &str| map.get(key).and_then(string_list);

        let id = text("id");
        let session = text("session");
        let out = text("out");
        let err = text("err");
        let ex = text("ex");
        let value = text("value");
        let status = strings("status");
        let new_session = text("new-session");
        let sessions = strings("sessions");

        Ok(Self {
            id,
            session,
            out,
            err,
            ex,
            value,
            status,
            new_session,
            sessions,
            raw,
        })
    }

    /// Whether this message ends its conversation.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.first())
            .is_some_and(|first| first == STATUS_DONE)
    }

    /// Whether `flag` appears anywhere in `status`.
    #[must_use]
    pub fn has_status(&self, flag: &str) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.iter().any(|f| f == flag))
    }

    /// Whether this message answers a keepalive probe.
    #[must_use]
    pub fn is_keepalive(&self) -> bool {
        self.id
            .as_deref()
            .is_some_and(|id| id.starts_with(KEEPALIVE_PREFIX))
    }

    /// Classify the message for the correlator.
    ///
    /// Precedence follows the order the fields are checked: a terminal status
    /// wins, then `out`, `value`, `err`, `ex`. A message with none of these, or
    /// whose `status` is not a list of strings, is `Unknown`.
    #[must_use]
    pub fn fragment(&self) -> Fragment {
        if self.is_done() {
            return Fragment::Done(self.status.clone().unwrap_or_default());
        }
        if let Some(out) = &self.out {
            return Fragment::Out(out.clone());
        }
        if let Some(value) = &self.value {
            return Fragment::Value(value.clone());
        }
        if let Some(err) = &self.err {
            return Fragment::Err(err.clone());
        }
        if let Some(ex) = &self.ex {
            return Fragment::Ex(ex.clone());
        }
        Fragment::Unknown(self.raw.to_string())
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_list()?
        .iter()
        .map(|item| item.as_str().map(str::to_owned))
        .collect()
}
