//! Unit tests for the editor line protocol and the command table.

use serde_json::json;

use plasmaplace::bridge::commands::script_for;
use plasmaplace::bridge::protocol::{lines_payload, Instruction, Reply, ASYNC_REPLY_ID};
use plasmaplace::bridge::script::Render;
use plasmaplace::AppError;

// ── Instructions ────────────────────────────────────────────────────────────

#[test]
fn instruction_line_parses() {
    let instruction = Instruction::parse(r#"[12, ["eval", "user", "(+ 1 2)"]]"#).expect("parse");
    assert_eq!(instruction.id, 12);
    assert_eq!(instruction.verb, "eval");
    assert_eq!(instruction.arg(0).expect("ns"), "user");
    assert_eq!(instruction.arg(1).expect("code"), "(+ 1 2)");
}

#[test]
fn malformed_line_is_a_bridge_error() {
    for line in ["not json", "{\"id\": 1}", "[1]", "[\"x\", [\"eval\"]]"] {
        let err = Instruction::parse(line).expect_err(line);
        assert!(matches!(err, AppError::Bridge(_)), "{line}: {err:?}");
    }
}

#[test]
fn missing_required_argument_names_the_verb() {
    let instruction = Instruction::parse(r#"[1, ["doc", "user"]]"#).expect("parse");
    let err = instruction.arg(1).expect_err("symbol is missing");
    assert!(err.to_string().contains("'doc'"), "{err}");
}

#[test]
fn null_optional_argument_is_absent() {
    let instruction = Instruction::parse(r#"[1, ["eval", null, "(+ 1 2)"]]"#).expect("parse");
    assert_eq!(instruction.opt_arg(0), None);
}

// ── Replies ─────────────────────────────────────────────────────────────────

#[test]
fn reply_serialises_as_id_payload_pair() {
    let reply = Reply::lines(4, vec![";; connected to nREPL".into()]);
    let line = reply.to_line().expect("serialise");
    let parsed: serde_json::Value = serde_json::from_str(&line).expect("valid json");
    assert_eq!(parsed, json!([4, {"lines": [";; connected to nREPL"]}]));
    assert!(!line.contains('\n'));
}

/// Promotion rewrites the id and flags the payload; the body is untouched.
#[test]
fn async_promotion_rewrites_id_and_flags_payload() {
    let reply = Reply::new(9, lines_payload(vec!["x".into()])).into_async();
    assert_eq!(reply.id, ASYNC_REPLY_ID);
    assert!(reply.is_async());
    let parsed: serde_json::Value =
        serde_json::from_str(&reply.to_line().expect("serialise")).expect("json");
    assert_eq!(parsed, json!([0, {"lines": ["x"], "async": true}]));
}

// ── Command table ───────────────────────────────────────────────────────────

fn script(line: &str) -> plasmaplace::bridge::script::Script {
    let instruction = Instruction::parse(line).expect("parse");
    script_for(&instruction).expect("arguments").expect("known verb")
}

#[test]
fn eval_with_namespace_gates_on_in_ns() {
    let script = script(r#"[1, ["eval", "my.ns", "(foo)"]]"#);
    let steps = script.steps();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].code, "(in-ns my.ns)");
    assert!(steps[0].gate);
    assert_eq!(steps[1].code, "(foo)");
    assert!(steps[1].options.echo_code);
    assert_eq!(script.render(), Render::Scratch);
}

#[test]
fn eval_without_namespace_is_one_step() {
    let script = script(r#"[1, ["eval", null, "(foo)"]]"#);
    assert_eq!(script.steps().len(), 1);
}

#[test]
fn eval_popup_renders_as_popup() {
    assert_eq!(script(r#"[1, ["eval_popup", "", "1"]]"#).render(), Render::Popup);
}

#[test]
fn doc_reads_back_printed_string() {
    let script = script(r#"[1, ["doc", "user", "map"]]"#);
    let last = script.steps().last().expect("doc step");
    assert_eq!(last.code, "(with-out-str (clojure.repl/doc map))");
    assert!(last.options.eval_value);
}

#[test]
fn macroexpand_wraps_in_quote() {
    let expanded = script(r#"[1, ["macroexpand", null, "(when x y)"]]"#);
    assert_eq!(expanded.steps()[0].code, "(macroexpand (quote\n(when x y)))");

    let once = script(r#"[1, ["macroexpand1", "user", "(when x y)"]]"#);
    assert_eq!(once.steps()[1].code, "(macroexpand-1 (quote\n(when x y)))");
}

#[test]
fn require_is_silent_and_echoed() {
    let script = script(r#"[1, ["require", "'my.ns", ":reload"]]"#);
    let step = &script.steps()[0];
    assert_eq!(step.code, "(clojure.core/require 'my.ns :reload)");
    assert!(step.options.silent);
    assert!(step.options.echo_code);
}

#[test]
fn cljfmt_loads_library_then_returns_value() {
    let script = script(r#"[1, ["cljfmt", "\"(ns  a)\""]]"#);
    assert_eq!(script.render(), Render::Value);
    assert_eq!(script.steps()[0].code, "(require 'cljfmt.core)");
    assert!(script.steps()[0].gate);
    assert_eq!(
        script.steps()[1].code,
        "(with-out-str (print (cljfmt.core/reformat-string \"(ns  a)\" nil)))"
    );
}

#[test]
fn run_tests_captures_output_as_value() {
    let script = script(r#"[1, ["run_tests", "(clojure.test/run-tests)"]]"#);
    let step = &script.steps()[0];
    assert_eq!(step.code, "(with-out-str (clojure.test/run-tests))");
    assert!(step.options.eval_value && step.options.echo_code);
}

#[test]
fn non_script_verbs_have_no_script() {
    for verb in ["init", "exit", "delete_other_nrepl_sessions", "frobnicate"] {
        let instruction = Instruction::parse(&format!(r#"[1, ["{verb}"]]"#)).expect("parse");
        assert!(script_for(&instruction).expect("no args needed").is_none(), "{verb}");
    }
}
