//! Editor command table.
//!
//! Maps each verb to either a [`Script`] or a connection-level action.
//! `exit` never reaches this table; the bridge loop handles it inline.

use tracing::{info, warn};

use crate::bridge::protocol::{lines_payload, Instruction, Payload};
use crate::bridge::script::{run_script, Render, Script};
use crate::nrepl::{Connection, EvalOptions};
use crate::Result;

/// Verb that ends the session.
pub const EXIT_VERB: &str = "exit";

const PLAIN: EvalOptions = EvalOptions {
    eval_value: false,
    echo_code: false,
    silent: false,
};
const ECHO: EvalOptions = EvalOptions {
    echo_code: true,
    ..PLAIN
};
const VALUE: EvalOptions = EvalOptions {
    eval_value: true,
    ..PLAIN
};
const ECHO_SILENT: EvalOptions = EvalOptions {
    echo_code: true,
    silent: true,
    ..PLAIN
};

fn in_ns(ns: &str) -> String {
    format!("(in-ns {ns})")
}

fn with_ns(script: Script, ns: Option<&str>) -> Script {
    match ns {
        Some(ns) => script.gate(in_ns(ns), PLAIN),
        None => script,
    }
}

/// Build the script for a REPL-backed verb, or `None` when `instruction`
/// names something else.
///
/// # Errors
///
/// Returns `AppError::Bridge` when a required argument is missing.
pub fn script_for(instruction: &Instruction) -> Result<Option<Script>> {
    let script = match instruction.verb.as_str() {
        "eval" => with_ns(Script::new(Render::Scratch), instruction.opt_arg(0))
            .step(instruction.arg(1)?, ECHO),
        "eval_popup" => with_ns(Script::new(Render::Popup), instruction.opt_arg(0))
            .step(instruction.arg(1)?, ECHO),
        "doc" => Script::new(Render::Scratch)
            .gate(in_ns(instruction.arg(0)?), PLAIN)
            .step(
                format!("(with-out-str (clojure.repl/doc {}))", instruction.arg(1)?),
                VALUE,
            ),
        "macroexpand" => with_ns(Script::new(Render::Scratch), instruction.opt_arg(0)).step(
            format!("(macroexpand (quote\n{}))", instruction.arg(1)?),
            ECHO,
        ),
        "macroexpand1" => Script::new(Render::Scratch)
            .gate(in_ns(instruction.arg(0)?), PLAIN)
            .step(
                format!("(macroexpand-1 (quote\n{}))", instruction.arg(1)?),
                ECHO,
            ),
        "require" => Script::new(Render::Scratch).step(
            format!(
                "(clojure.core/require {} {})",
                instruction.arg(0)?,
                instruction.arg(1)?
            ),
            ECHO_SILENT,
        ),
        "cljfmt" => Script::new(Render::Value)
            .gate("(require 'cljfmt.core)", ECHO_SILENT)
            .step(
                format!(
                    "(with-out-str (print (cljfmt.core/reformat-string {} nil)))",
                    instruction.arg(0)?
                ),
                EvalOptions {
                    eval_value: true,
                    silent: true,
                    ..PLAIN
                },
            ),
        "run_tests" => Script::new(Render::Scratch).step(
            format!("(with-out-str {})", instruction.arg(0)?),
            EvalOptions {
                eval_value: true,
                echo_code: true,
                ..PLAIN
            },
        ),
        _ => return Ok(None),
    };
    Ok(Some(script))
}

/// Lines reported by `init`.
#[must_use]
pub fn init_lines(connection: &Connection) -> Vec<String> {
    let existing = connection
        .existing_sessions()
        .iter()
        .map(|s| format!("{s:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut lines = vec![
        ";; connected to nREPL".to_owned(),
        format!(";; existing sessions: [{existing}]"),
    ];
    if let Some(root) = connection.root_session() {
        lines.push(format!(";; current session: {root}"));
    }
    lines
}

/// Run `instruction` against `connection`.
///
/// Command failures become reply lines.
pub async fn execute(connection: &Connection, instruction: &Instruction) -> Payload {
    match run(connection, instruction).await {
        Ok(payload) => payload,
        Err(err) => {
            warn!(verb = %instruction.verb, error = %err, "command failed");
            lines_payload(vec![format!(";; error: {err}")])
        }
    }
}

async fn run(connection: &Connection, instruction: &Instruction) -> Result<Payload> {
    match instruction.verb.as_str() {
        "init" => Ok(lines_payload(init_lines(connection))),
        "delete_other_nrepl_sessions" => {
            let (closed, failures) = connection.close_other_sessions().await?;
            info!(closed = closed.len(), failed = failures.len(), "other sessions closed");
            let lines = failures.into_iter().map(|f| format!(";; {f}")).collect();
            Ok(lines_payload(lines))
        }
        verb => match script_for(instruction)? {
            Some(script) => run_script(connection, &script).await,
            None => Ok(lines_payload(vec![format!(";; unknown command: {verb}")])),
        },
    }
}
