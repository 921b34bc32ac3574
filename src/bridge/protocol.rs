//! Editor channel wire format.
//!
//! One JSON document per line in each direction.
//!
//! Instruction (editor → bridge):
//! ```json
//! [7, ["eval", "user", "(+ 1 2)"]]
//! ```
//!
//! Reply (bridge → editor):
//! ```json
//! [7, {"lines": [";; ...", "3"], "ex_happened": false}]
//! [0, {"lines": [...], "ex_happened": false, "async": true}]
//! ```
//!
//! A reply whose command outlived the async threshold is sent with id `0` and
//! `async: true` so the editor treats it as unsolicited.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::{AppError, Result};

/// Reply body: a JSON object.
pub type Payload = Map<String, JsonValue>;

/// Request id used for replies delivered asynchronously.
pub const ASYNC_REPLY_ID: i64 = 0;

/// One parsed editor instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Editor-assigned request id.
    pub id: i64,
    /// Command name.
    pub verb: String,
    /// Positional arguments.
    pub args: Vec<JsonValue>,
}

impl Instruction {
    /// Parse one instruction line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bridge` if the line is not `[id, [verb, ...args]]`.
    pub fn parse(line: &str) -> Result<Self> {
        let (id, mut message): (i64, Vec<JsonValue>) = serde_json::from_str(line)?;
        if message.is_empty() {
            return Err(AppError::Bridge("instruction has no verb".into()));
        }
        let verb = match message.remove(0) {
            JsonValue::String(verb) => verb,
            other => return Err(AppError::Bridge(format!("verb must be a string, got {other}"))),
        };
        Ok(Self {
            id,
            verb,
            args: message,
        })
    }

    /// Required string argument at `index`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bridge` if the argument is missing or not a string.
    pub fn arg(&self, index: usize) -> Result<&str> {
        self.args
            .get(index)
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                AppError::Bridge(format!(
                    "'{}' expects a string argument at position {index}",
                    self.verb
                ))
            })
    }

    /// Optional string argument at `index`; missing, `null`, and `""` are
    /// all absent.
    #[must_use]
    pub fn opt_arg(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// One reply line.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Id the reply answers, or [`ASYNC_REPLY_ID`].
    pub id: i64,
    /// Reply body.
    pub payload: Payload,
}

impl Reply {
    /// Reply to `id` with `payload`.
    #[must_use]
    pub fn new(id: i64, payload: Payload) -> Self {
        Self { id, payload }
    }

    /// Reply carrying only `lines`.
    #[must_use]
    pub fn lines(id: i64, lines: Vec<String>) -> Self {
        Self::new(id, lines_payload(lines))
    }

    /// Reclassify as an asynchronous delivery.
    #[must_use]
    pub fn into_async(mut self) -> Self {
        self.id = ASYNC_REPLY_ID;
        self.payload.insert("async".to_owned(), JsonValue::Bool(true));
        self
    }

    /// Whether this reply was reclassified by [`Reply::into_async`].
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.id == ASYNC_REPLY_ID && self.payload.get("async") == Some(&JsonValue::Bool(true))
    }

    /// Serialise as one line, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bridge` if serialisation fails.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&(self.id, &self.payload))?)
    }
}

/// Payload `{"lines": [...]}`.
#[must_use]
pub fn lines_payload(lines: Vec<String>) -> Payload {
    let mut payload = Payload::new();
    payload.insert(
        "lines".to_owned(),
        JsonValue::Array(lines.into_iter().map(JsonValue::String).collect()),
    );
    payload
}

/// Convert any serialisable rendering into a payload object.
///
/// # Errors
///
/// Returns `AppError::Bridge` if `rendering` does not serialise to an object.
pub fn to_payload<T: Serialize>(rendering: &T) -> Result<Payload> {
    match serde_json::to_value(rendering)? {
        JsonValue::Object(map) => Ok(map),
        other => Err(AppError::Bridge(format!(
            "rendering is not an object: {other}"
        ))),
    }
}
