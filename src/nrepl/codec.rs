//! Bencode frame codec for the nREPL socket.
//!
//! Wraps the pure decoder in [`crate::bencode`] so it can drive
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound). Socket bytes accumulate in
//! the framed buffer; a frame is only yielded once a whole value is present,
//! and exactly that value's bytes are consumed.
//!
//! Frame boundaries are found by a resumable scan that walks tokens without
//! building values, so each buffered byte is scanned once however many reads
//! a frame takes. The full decoder runs once per complete frame.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use plasmaplace::nrepl::codec::BencodeCodec;
//!
//! let frames = FramedRead::new(read_half, BencodeCodec::new());
//! ```

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::bencode::{self, Decoded, Value};
use crate::config::DEFAULT_MAX_FRAME_BYTES;
use crate::{AppError, Result};

/// Bencode codec for both directions of the nREPL stream.
///
/// # Decoder
///
/// Returns `Ok(None)` while the buffered bytes hold only a prefix of the next
/// value. A frame whose encoding would exceed the configured limit returns
/// [`AppError::Codec`] as soon as that is known, before it is buffered.
///
/// # Encoder
///
/// Writes the canonical encoding (dictionary keys sorted by bytes).
#[derive(Debug, Clone)]
pub struct BencodeCodec {
    max_frame_bytes: usize,
    scan: FrameScan,
}

impl BencodeCodec {
    /// Create a codec with the default 64 MiB frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec with a custom frame limit.
    #[must_use]
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            scan: FrameScan::default(),
        }
    }

    /// Largest encoded frame this codec accepts.
    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl Default for BencodeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for BencodeCodec {
    type Item = Value;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(len) = self.scan.frame_len(src, self.max_frame_bytes)? else {
            return Ok(None);
        };
        self.scan = FrameScan::default();
        match bencode::decode(&src[..len], self.max_frame_bytes)? {
            Decoded::Complete(value, used) => {
                src.advance(used);
                Ok(Some(value))
            }
            Decoded::Incomplete => Err(AppError::Codec(format!(
                "frame of {len} bytes did not decode as a whole value"
            ))),
        }
    }

    /// At EOF a partially buffered frame is a truncated stream.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(value) => Ok(Some(value)),
            None if src.is_empty() => Ok(None),
            None => Err(AppError::Codec(format!(
                "unexpected end of stream with {} bytes of a partial frame",
                src.len()
            ))),
        }
    }
}

/// Longest integer body or string length prefix accepted, in bytes.
const MAX_NUMBER_BYTES: usize = 20;

/// Progress of the boundary scan over the frame at the front of the buffer.
///
/// `pos` only ever moves past whole tokens, so a scan interrupted by a short
/// read resumes at the token it stopped in.
#[derive(Debug, Clone, Copy, Default)]
struct FrameScan {
    pos: usize,
    depth: usize,
}

impl FrameScan {
    /// Length of the first complete value in `buf`, if it is all there.
    fn frame_len(&mut self, buf: &[u8], max: usize) -> Result<Option<usize>> {
        while let Some(&byte) = buf.get(self.pos) {
            match byte {
                b'l' | b'd' => {
                    self.depth += 1;
                    self.pos += 1;
                }
                b'e' if self.depth > 0 => {
                    self.depth -= 1;
                    self.pos += 1;
                }
                b'i' => match terminator(buf, self.pos + 1, b'e')? {
                    Some(end) => self.pos = end + 1,
                    None => return Ok(None),
                },
                b'0'..=b'9' => {
                    let Some(colon) = terminator(buf, self.pos, b':')? else {
                        return Ok(None);
                    };
                    let len = std::str::from_utf8(&buf[self.pos..colon])
                        .ok()
                        .and_then(|digits| digits.parse::<usize>().ok())
                        .ok_or_else(|| AppError::Codec("malformed string length".into()))?;
                    let end = (colon + 1).saturating_add(len);
                    if end > max {
                        return Err(too_large(max));
                    }
                    if end > buf.len() {
                        return Ok(None);
                    }
                    self.pos = end;
                }
                other => {
                    return Err(AppError::Codec(format!(
                        "unexpected byte 0x{other:02x} at offset {}",
                        self.pos
                    )));
                }
            }
            if self.pos > max {
                return Err(too_large(max));
            }
            if self.depth == 0 {
                return Ok(Some(self.pos));
            }
        }
        Ok(None)
    }
}

/// Index of `end` in `buf` within [`MAX_NUMBER_BYTES`] of `start`.
fn terminator(buf: &[u8], start: usize, end: u8) -> Result<Option<usize>> {
    let window = buf.get(start..).unwrap_or_default();
    let window = &window[..window.len().min(MAX_NUMBER_BYTES + 1)];
    match window.iter().position(|&b| b == end) {
        Some(offset) => Ok(Some(start + offset)),
        None if window.len() > MAX_NUMBER_BYTES => Err(AppError::Codec(format!(
            "number at offset {start} is longer than {MAX_NUMBER_BYTES} bytes"
        ))),
        None => Ok(None),
    }
}

fn too_large(max: usize) -> AppError {
    AppError::Codec(format!("frame exceeds the {max} byte limit"))
}

impl Encoder<Value> for BencodeCodec {
    type Error = AppError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&bencode::encode(&item));
        Ok(())
    }
}
