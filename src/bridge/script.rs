//! Scripted evaluations.
//!
//! Every editor command that talks to the REPL is a [`Script`]: a few
//! evaluation steps run in order inside a throwaway session cloned from the
//! root, with the last step rendered for the editor. Gate steps (namespace
//! switches, library loads) stop the script early when they fail.

use tracing::{debug, warn};

use crate::bridge::protocol::{lines_payload, to_payload, Payload};
use crate::nrepl::{Connection, EvalOptions, EvalOutcome};
use crate::Result;

/// How the final step is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    /// Lines appended to the scratch buffer.
    Scratch,
    /// Lines shown in a transient overlay.
    Popup,
    /// The interpreted value alone.
    Value,
}

/// One evaluation in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Code to evaluate.
    pub code: String,
    /// Collection and rendering flags.
    pub options: EvalOptions,
    /// Abort the script when this step does not succeed.
    pub gate: bool,
}

/// Ordered evaluation steps plus the rendering of the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    steps: Vec<Step>,
    render: Render,
}

impl Script {
    /// Empty script rendered as `render`.
    #[must_use]
    pub fn new(render: Render) -> Self {
        Self {
            steps: Vec::new(),
            render,
        }
    }

    /// Append a gate step.
    #[must_use]
    pub fn gate(mut self, code: impl Into<String>, options: EvalOptions) -> Self {
        self.steps.push(Step {
            code: code.into(),
            options,
            gate: true,
        });
        self
    }

    /// Append an ordinary step.
    #[must_use]
    pub fn step(mut self, code: impl Into<String>, options: EvalOptions) -> Self {
        self.steps.push(Step {
            code: code.into(),
            options,
            gate: false,
        });
        self
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Rendering applied to the last step.
    #[must_use]
    pub fn render(&self) -> Render {
        self.render
    }
}

/// Render `outcome` as a reply payload.
///
/// # Errors
///
/// Returns `AppError::Bridge` if the rendering cannot be serialised.
pub fn render_outcome(outcome: &EvalOutcome, render: Render) -> Result<Payload> {
    match render {
        Render::Scratch => to_payload(&outcome.to_scratch_buf()),
        Render::Popup => to_payload(&outcome.to_popup()),
        Render::Value => to_payload(&outcome.to_value()),
    }
}

/// Run `script` in a fresh session cloned from the root.
///
/// The session is closed on every path once the session exists.
///
/// # Errors
///
/// - `AppError::Protocol` if the connection has no root session yet.
/// - `AppError::Transport` if the connection fails.
pub async fn run_script(connection: &Connection, script: &Script) -> Result<Payload> {
    let session = connection.acquire_ephemeral().await?;

    let result = run_steps(connection, &session, script).await;

    match connection.release_ephemeral(&session).await {
        Ok(_) => debug!(session = %session, "ephemeral session closed"),
        Err(err) => warn!(session = %session, error = %err, "ephemeral session close failed"),
    }
    result
}

async fn run_steps(connection: &Connection, session: &str, script: &Script) -> Result<Payload> {
    let mut last = None;
    for step in script.steps() {
        let outcome = connection.eval(session, &step.code, step.options).await?;
        if step.gate && !outcome.success {
            debug!(code = %step.code, "gate step failed, aborting script");
            return render_outcome(&outcome, Render::Scratch);
        }
        last = Some(outcome);
    }
    match last {
        Some(outcome) => render_outcome(&outcome, script.render()),
        None => Ok(lines_payload(Vec::new())),
    }
}
