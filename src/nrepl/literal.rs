//! Interpretation of printed REPL values as literal data.
//!
//! Commands such as `doc` and `cljfmt` wrap their form in `with-out-str`, so
//! the peer answers with a printed string literal (`"...\n..."`). Reading it
//! back yields the text the editor actually wants.

use serde_json::{Number, Value as JsonValue};

/// Parse printed REPL output into a JSON value.
///
/// - empty text or `nil` → `Null`
/// - `true` / `false` → `Bool`
/// - integers and finite floats → `Number`
/// - a double-quoted string with `\"`, `\\`, `\n`, `\t`, `\r` and `\uXXXX`
///   escapes → `String`
///
/// Returns `None` when the text is not one of these literals.
#[must_use]
pub fn parse_literal(text: &str) -> Option<JsonValue> {
    let text = text.trim();
    match text {
        "" | "nil" => return Some(JsonValue::Null),
        "true" => return Some(JsonValue::Bool(true)),
        "false" => return Some(JsonValue::Bool(false)),
        _ => {}
    }
    if let Some(body) = text.strip_prefix('"') {
        return parse_string_body(body).map(JsonValue::String);
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(JsonValue::Number(n.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(JsonValue::Number)
}

/// Unescape everything after the opening quote; the closing quote must be the
/// final character.
fn parse_string_body(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return chars.next().is_none().then_some(out),
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                'u' => {
                    let hex: String = chars.by_ref().take(4).collect();
                    if hex.len() != 4 {
                        return None;
                    }
                    let code = u32::from_str_radix(&hex, 16).ok()?;
                    out.push(char::from_u32(code)?);
                }
                _ => return None,
            },
            other => out.push(other),
        }
    }
    None
}
