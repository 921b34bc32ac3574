//! Unit tests for `BencodeCodec` framing.
//!
//! Covers:
//! - a frame split across reads is buffered until complete
//! - two frames in one read are yielded one at a time
//! - a truncated frame at end of stream is an error
//! - the configured limit applies to strings and to whole frames
//! - a frame fed a byte at a time decodes once it is complete
//! - encoding writes the canonical bytes

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use plasmaplace::bencode::{encode, Value};
use plasmaplace::nrepl::codec::BencodeCodec;
use plasmaplace::AppError;

fn frame(id: &str, out: &str) -> Value {
    [("id", id), ("out", out)].into_iter().collect()
}

// ── Decoding ────────────────────────────────────────────────────────────────

/// Bytes that stop mid-frame produce nothing until the rest arrives.
#[test]
fn partial_frame_is_buffered_until_complete() {
    let mut codec = BencodeCodec::new();
    let bytes = encode(&frame("1", "hello"));
    let (head, tail) = bytes.split_at(bytes.len() / 2);

    let mut buf = BytesMut::from(head);
    assert_eq!(codec.decode(&mut buf).expect("partial decode"), None);
    assert_eq!(buf.len(), head.len(), "nothing is consumed from a partial frame");

    buf.extend_from_slice(tail);
    let value = codec
        .decode(&mut buf)
        .expect("complete decode")
        .expect("frame must be yielded once complete");
    assert_eq!(value, frame("1", "hello"));
    assert!(buf.is_empty());
}

/// Two frames delivered together are yielded by successive calls.
#[test]
fn batched_frames_are_each_decoded() {
    let mut codec = BencodeCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&encode(&frame("1", "a")));
    buf.extend_from_slice(&encode(&frame("2", "b")));

    let first = codec.decode(&mut buf).expect("first").expect("first frame");
    let second = codec.decode(&mut buf).expect("second").expect("second frame");
    assert_eq!(first, frame("1", "a"));
    assert_eq!(second, frame("2", "b"));
    assert_eq!(codec.decode(&mut buf).expect("drained"), None);
}

#[test]
fn truncated_frame_at_eof_is_an_error() {
    let mut codec = BencodeCodec::new();
    let mut buf = BytesMut::from(&b"d2:id1:"[..]);
    let err = codec.decode_eof(&mut buf).expect_err("truncated stream must fail");
    assert!(matches!(err, AppError::Codec(_)), "got {err:?}");
}

#[test]
fn clean_eof_yields_nothing() {
    let mut codec = BencodeCodec::new();
    let mut buf = BytesMut::new();
    assert_eq!(codec.decode_eof(&mut buf).expect("clean eof"), None);
}

#[test]
fn custom_limit_rejects_long_strings() {
    let mut codec = BencodeCodec::with_max_frame_bytes(4);
    assert_eq!(codec.max_frame_bytes(), 4);
    let mut buf = BytesMut::from(&encode(&frame("1", "too long"))[..]);
    let err = codec.decode(&mut buf).expect_err("limit must apply");
    assert!(matches!(err, AppError::Codec(_)));
}

/// Many small strings add up: the limit is on the whole frame.
#[test]
fn limit_applies_to_whole_frame() {
    let mut codec = BencodeCodec::with_max_frame_bytes(64);
    let items: Vec<Value> = (0..30).map(|_| Value::from("a")).collect();
    let bytes = encode(&Value::List(items));
    assert!(bytes.len() > 64);

    let mut buf = BytesMut::from(&bytes[..]);
    let err = codec.decode(&mut buf).expect_err("oversized frame must fail");
    assert!(matches!(err, AppError::Codec(msg) if msg.contains("64 byte limit")));
}

/// The boundary scan resumes across reads and resets between frames.
#[test]
fn frame_fed_byte_by_byte_decodes_once() {
    let mut codec = BencodeCodec::new();
    let nested: Value = [
        ("id", Value::from("7")),
        ("sessions", Value::from(vec!["a", "bb", "ccc"])),
        ("n", Value::Int(-12)),
    ]
    .into_iter()
    .collect();
    let mut bytes = encode(&nested);
    bytes.extend_from_slice(&encode(&frame("8", "next")));

    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    for byte in bytes {
        buf.extend_from_slice(&[byte]);
        if let Some(value) = codec.decode(&mut buf).expect("decode") {
            decoded.push(value);
        }
    }
    assert_eq!(decoded, vec![nested, frame("8", "next")]);
    assert!(buf.is_empty());
}

#[test]
fn stray_end_marker_is_an_error() {
    let mut codec = BencodeCodec::new();
    let mut buf = BytesMut::from(&b"e"[..]);
    assert!(matches!(codec.decode(&mut buf), Err(AppError::Codec(_))));
}

// ── Encoding ────────────────────────────────────────────────────────────────

#[test]
fn encoder_writes_canonical_bytes() {
    let mut codec = BencodeCodec::default();
    let mut dst = BytesMut::new();
    let value: Value = [("op", "ls-sessions"), ("id", "keepalive-1")]
        .into_iter()
        .collect();
    codec.encode(value, &mut dst).expect("encode");
    assert_eq!(&dst[..], b"d2:id11:keepalive-12:op11:ls-sessionse");
}
