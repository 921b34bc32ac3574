//! Bencode value model and pure encode/decode functions.
//!
//! This module performs no I/O. The stream-facing adapter lives in
//! [`crate::nrepl::codec`], which feeds socket bytes into [`decode`] until a
//! whole value is available.
//!
//! # Wire format
//!
//! | Kind    | Encoding                                      |
//! |---------|-----------------------------------------------|
//! | integer | `i<decimal>e`                                 |
//! | string  | `<utf-8 byte length>:<bytes>`                 |
//! | list    | `l<items>e`                                   |
//! | dict    | `d<key><value>...e`, keys ascending by bytes  |

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::{AppError, Result};

/// Deepest list/dict nesting accepted by [`decode`].
pub const MAX_DEPTH: usize = 512;

/// A single bencode value.
///
/// Dictionaries use a [`BTreeMap`] keyed by `String`; `str` ordering is
/// byte-wise, so iterating the map already yields canonical key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// UTF-8 text.
    Str(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Mapping from string keys to values.
    Dict(BTreeMap<String, Value>),
}

impl Value {
    /// Borrow the text of a `Str` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the items of a `List` value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the entries of a `Dict` value.
    #[must_use]
    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Look up `key` when this value is a dictionary.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|map| map.get(key))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Dict(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Human-readable rendering used in diagnostics (not the wire format).
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Dict(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Append the canonical encoding of `value` to `out`.
pub fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(n) => {
            out.push(b'i');
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Str(s) => encode_str(s, out),
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(map) => {
            out.push(b'd');
            for (key, item) in map {
                encode_str(key, out);
                encode_into(item, out);
            }
            out.push(b'e');
        }
    }
}

/// Encode `value` into a fresh byte vector.
#[must_use]
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(s.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(s.as_bytes());
}

// ── Decoding ─────────────────────────────────────────────────────────────────

/// Outcome of attempting to decode one value from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole value plus the number of bytes it occupied.
    Complete(Value, usize),
    /// The buffer ends before the value does; nothing was consumed.
    Incomplete,
}

/// Decode one value from the front of `buf`.
///
/// Trailing bytes after the first value are left alone; the returned length
/// tells the caller exactly how many bytes belonged to it.
///
/// # Errors
///
/// Returns `AppError::Codec` for an unexpected leading byte, a malformed
/// length or integer, a non-string dictionary key, a string longer than
/// `max_str_len`, or nesting deeper than [`MAX_DEPTH`].
pub fn decode(buf: &[u8], max_str_len: usize) -> Result<Decoded> {
    let mut parser = Parser {
        buf,
        pos: 0,
        max_str_len,
    };
    match parser.value(0)? {
        Some(value) => Ok(Decoded::Complete(value, parser.pos)),
        None => Ok(Decoded::Incomplete),
    }
}

/// Decode a buffer that must hold exactly one complete value.
///
/// # Errors
///
/// Returns `AppError::Codec` if the value is malformed, truncated, or
/// followed by trailing bytes.
pub fn decode_exact(buf: &[u8]) -> Result<Value> {
    match decode(buf, usize::MAX)? {
        Decoded::Complete(value, used) if used == buf.len() => Ok(value),
        Decoded::Complete(_, used) => Err(AppError::Codec(format!(
            "{} trailing bytes after value",
            buf.len() - used
        ))),
        Decoded::Incomplete => Err(AppError::Codec("unexpected end of data".into())),
    }
}

/// Recursive-descent cursor. `Ok(None)` means "need more bytes".
struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
    max_str_len: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn value(&mut self, depth: usize) -> Result<Option<Value>> {
        let Some(lead) = self.peek() else {
            return Ok(None);
        };
        match lead {
            b'i' => {
                self.pos += 1;
                Ok(self.int()?.map(Value::Int))
            }
            b'l' => {
                self.enter(depth)?;
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    match self.peek() {
                        None => return Ok(None),
                        Some(b'e') => {
                            self.pos += 1;
                            return Ok(Some(Value::List(items)));
                        }
                        Some(_) => match self.value(depth + 1)? {
                            Some(item) => items.push(item),
                            None => return Ok(None),
                        },
                    }
                }
            }
            b'd' => {
                self.enter(depth)?;
                self.pos += 1;
                let mut map = BTreeMap::new();
                loop {
                    match self.peek() {
                        None => return Ok(None),
                        Some(b'e') => {
                            self.pos += 1;
                            return Ok(Some(Value::Dict(map)));
                        }
                        Some(c) if c.is_ascii_digit() => {
                            let Some(key) = self.string()? else {
                                return Ok(None);
                            };
                            let Some(item) = self.value(depth + 1)? else {
                                return Ok(None);
                            };
                            map.insert(key, item);
                        }
                        Some(c) => {
                            return Err(AppError::Codec(format!(
                                "dictionary key must be a string, found byte {c:#04x} at offset {}",
                                self.pos
                            )));
                        }
                    }
                }
            }
            c if c.is_ascii_digit() => Ok(self.string()?.map(Value::Str)),
            c => Err(AppError::Codec(format!(
                "unexpected byte {c:#04x} at offset {}",
                self.pos
            ))),
        }
    }

    fn enter(&self, depth: usize) -> Result<()> {
        if depth >= MAX_DEPTH {
            return Err(AppError::Codec(format!(
                "nesting deeper than {MAX_DEPTH} levels"
            )));
        }
        Ok(())
    }

    /// Read the digits of an integer up to and including the closing `e`.
    fn int(&mut self) -> Result<Option<i64>> {
        let start = self.pos;
        let Some(len) = self.buf[start..].iter().position(|&b| b == b'e') else {
            return Ok(None);
        };
        let digits = &self.buf[start..start + len];
        let text = std::str::from_utf8(digits)
            .map_err(|_| AppError::Codec(format!("non-ascii integer at offset {start}")))?;
        let valid = match text.strip_prefix('-') {
            Some(rest) => !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()),
            None => !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()),
        };
        if !valid {
            return Err(AppError::Codec(format!(
                "malformed integer {text:?} at offset {start}"
            )));
        }
        let n = text
            .parse::<i64>()
            .map_err(|err| AppError::Codec(format!("integer {text:?} out of range: {err}")))?;
        self.pos = start + len + 1;
        Ok(Some(n))
    }

    /// Read `<len>:<bytes>`; the length is bounded before anything is copied.
    fn string(&mut self) -> Result<Option<String>> {
        let start = self.pos;
        let mut len: usize = 0;
        let mut cursor = start;
        loop {
            let Some(&b) = self.buf.get(cursor) else {
                return Ok(None);
            };
            match b {
                b'0'..=b'9' => {
                    len = len
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(usize::from(b - b'0')))
                        .ok_or_else(|| {
                            AppError::Codec(format!("string length overflow at offset {start}"))
                        })?;
                    if len > self.max_str_len {
                        return Err(AppError::Codec(format!(
                            "string of {len}+ bytes exceeds limit of {} bytes",
                            self.max_str_len
                        )));
                    }
                    cursor += 1;
                }
                b':' => break,
                other => {
                    return Err(AppError::Codec(format!(
                        "unexpected byte {other:#04x} in string length at offset {cursor}"
                    )));
                }
            }
        }
        let body_start = cursor + 1;
        let Some(body_end) = body_start.checked_add(len) else {
            return Err(AppError::Codec(format!("string length overflow at offset {start}")));
        };
        let Some(body) = self.buf.get(body_start..body_end) else {
            return Ok(None);
        };
        self.pos = body_end;
        Ok(Some(String::from_utf8_lossy(body).into_owned()))
    }
}
