//! The `eval` conversation.
//!
//! One evaluation moves through `Sent → Accumulating → Completed | Failed`:
//!
//! 1. **Sent**: a fresh id is registered, then `{op: eval, session, id, code}`
//!    is enqueued.
//! 2. **Accumulating**: each inbox message is classified by
//!    [`Response::fragment`] into the matching [`StreamBuffer`].
//! 3. **Completed** on a `done` status. If an exception was reported, the
//!    stack-trace expression is evaluated once more in the same session and
//!    its value collected before returning.
//! 4. **Failed** when the fatal sentinel arrives; surfaced as
//!    `AppError::Transport`.
//!
//! Application failures (`err`, `ex`) are data in [`EvalOutcome`], never
//! errors.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info_span, Instrument};

use crate::nrepl::connection::{Connection, Correlator};
use crate::nrepl::literal::parse_literal;
use crate::nrepl::message::{Fragment, Request, Response};
use crate::nrepl::stream::StreamBuffer;
use crate::Result;

/// Banner line opening a scratch-buffer rendering.
pub const BANNER: &str =
    ";;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;";

/// How an evaluation's results are collected and rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct EvalOptions {
    /// Read the printed value back as literal data.
    pub eval_value: bool,
    /// Start the rendering with the evaluated code.
    pub echo_code: bool,
    /// Leave out the banner, `*out*`, and the value.
    pub silent: bool,
}

/// Lines for a scratch buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScratchRendering {
    /// Lines to append.
    pub lines: Vec<String>,
    /// Whether the evaluation threw.
    pub ex_happened: bool,
}

/// Lines for a transient overlay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupRendering {
    /// Lines to show.
    pub popup: Vec<String>,
    /// Whether the evaluation threw.
    pub ex_happened: bool,
}

/// A single extracted value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueRendering {
    /// Interpreted value, `null` when absent.
    pub value: JsonValue,
    /// Whether the evaluation threw.
    pub ex_happened: bool,
}

/// Everything accumulated for one evaluation.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    code: String,
    options: EvalOptions,
    /// False once `err` or `ex` was seen.
    pub success: bool,
    /// True once `ex` was seen.
    pub ex_happened: bool,
    out: StreamBuffer,
    value: StreamBuffer,
    err: StreamBuffer,
    ex: StreamBuffer,
    stacktrace: StreamBuffer,
    unknown: StreamBuffer,
    literal: Option<JsonValue>,
}

impl EvalOutcome {
    /// Empty outcome for `code`.
    #[must_use]
    pub fn new(code: impl Into<String>, options: EvalOptions) -> Self {
        Self {
            code: code.into(),
            options,
            success: true,
            ex_happened: false,
            out: StreamBuffer::new(";; OUT:"),
            value: StreamBuffer::new(";; VALUE:"),
            err: StreamBuffer::new(";; ERR:"),
            ex: StreamBuffer::new(";; EX:"),
            stacktrace: StreamBuffer::new(";; STACK TRACE:"),
            unknown: StreamBuffer::new(";; UNKNOWN REPL RESPONSE:"),
            literal: None,
        }
    }

    /// Code that was evaluated.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Options the evaluation ran with.
    #[must_use]
    pub fn options(&self) -> EvalOptions {
        self.options
    }

    /// Fold one response of the main evaluation in. Returns `true` once the
    /// response is terminal.
    pub fn absorb(&mut self, response: &Response) -> bool {
        match response.fragment() {
            Fragment::Done(_) => return true,
            Fragment::Out(text) => self.out.append(text),
            Fragment::Value(text) => self.value.append(text),
            Fragment::Err(text) => {
                self.success = false;
                self.err.append(text);
            }
            Fragment::Ex(text) => {
                self.success = false;
                self.ex_happened = true;
                self.ex.append(text);
            }
            Fragment::Unknown(text) => self.unknown.append(text),
        }
        false
    }

    /// Fold one response of the stack-trace follow-up in. Returns `true` once
    /// the response is terminal.
    pub fn absorb_stacktrace(&mut self, response: &Response) -> bool {
        match response.fragment() {
            Fragment::Done(_) => return true,
            Fragment::Value(text) => self.stacktrace.append(text),
            Fragment::Unknown(text) => self.unknown.append(text),
            other => self.unknown.append(format!("{other:?}")),
        }
        false
    }

    /// Interpret the value buffer as literal data when `eval_value` is set.
    ///
    /// Text that is not a literal is kept verbatim as a string.
    pub fn interpret_value(&mut self) {
        if !self.options.eval_value || self.literal.is_some() {
            return;
        }
        let text = self.value.value().to_owned();
        self.literal = Some(parse_literal(&text).unwrap_or(JsonValue::String(text)));
    }

    /// Interpreted value, `None` when absent (`nil`, empty) or not requested.
    #[must_use]
    pub fn raw_value(&self) -> Option<&JsonValue> {
        self.literal.as_ref().filter(|v| !v.is_null())
    }

    /// Captured `*out*` text as lines, without the header.
    #[must_use]
    pub fn output_lines(&self) -> Vec<String> {
        self.out.lines().into_iter().skip(1).collect()
    }

    /// Whether a stack trace was collected.
    #[must_use]
    pub fn has_stacktrace(&self) -> bool {
        !self.stacktrace.is_empty()
    }

    /// Whether any unrecognised response was captured.
    #[must_use]
    pub fn has_unknown(&self) -> bool {
        !self.unknown.is_empty()
    }

    fn extract_output(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.options.echo_code {
            lines.extend(self.code.split('\n').map(str::to_owned));
        }
        lines.extend(self.unknown.lines());
        if !self.options.silent {
            lines.extend(self.out.lines());
            match self.raw_value() {
                Some(JsonValue::String(text)) => {
                    lines.extend(text.split('\n').map(str::to_owned));
                }
                Some(other) => lines.push(other.to_string()),
                None => lines.extend(self.value.lines()),
            }
        }
        lines.extend(self.err.lines());
        lines.extend(self.ex.lines());
        lines.extend(self.stacktrace.lines());
        lines
    }

    /// Rendering for a scratch buffer: banner (unless silent) plus output.
    #[must_use]
    pub fn to_scratch_buf(&self) -> ScratchRendering {
        let mut lines = self.extract_output();
        if !self.options.silent {
            lines.insert(0, BANNER.to_owned());
        }
        ScratchRendering {
            lines,
            ex_happened: self.ex_happened,
        }
    }

    /// Rendering for a transient overlay: same lines, no banner.
    #[must_use]
    pub fn to_popup(&self) -> PopupRendering {
        PopupRendering {
            popup: self.extract_output(),
            ex_happened: self.ex_happened,
        }
    }

    /// The interpreted value alone.
    #[must_use]
    pub fn to_value(&self) -> ValueRendering {
        ValueRendering {
            value: self.raw_value().cloned().unwrap_or(JsonValue::Null),
            ex_happened: self.ex_happened,
        }
    }
}

impl Connection {
    /// Evaluate `code` in `session` and collect the results.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the connection fails before the
    /// evaluation (and any stack-trace follow-up) completes.
    pub async fn eval(
        &self,
        session: &str,
        code: &str,
        options: EvalOptions,
    ) -> Result<EvalOutcome> {
        let mut correlator = self.correlate()?;
        let span = info_span!("eval", request_id = %correlator.id(), session);
        let result = self
            .run_eval(&mut correlator, session, code, options)
            .instrument(span)
            .await;
        result
    }

    async fn run_eval(
        &self,
        correlator: &mut Correlator,
        session: &str,
        code: &str,
        options: EvalOptions,
    ) -> Result<EvalOutcome> {
        let mut outcome = EvalOutcome::new(code, options);

        self.send_eval(correlator, session, code)?;
        while !outcome.absorb(&correlator.recv().await?) {}

        if outcome.ex_happened {
            debug!("exception reported, fetching stack trace");
            let expr = self.config().stacktrace_expr.clone();
            self.send_eval(correlator, session, &expr)?;
            while !outcome.absorb_stacktrace(&correlator.recv().await?) {}
        }

        outcome.interpret_value();
        debug!(success = outcome.success, ex = outcome.ex_happened, "eval completed");
        Ok(outcome)
    }

    fn send_eval(&self, correlator: &Correlator, session: &str, code: &str) -> Result<()> {
        let request = Request::Eval {
            session: session.to_owned(),
            code: code.to_owned(),
        };
        self.send(request.to_value(Some(correlator.id())))
    }
}
