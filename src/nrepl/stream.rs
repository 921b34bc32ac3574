//! Accumulator for one kind of streamed response text.

/// Append-only buffer for one response field (`out`, `value`, `err`, ...).
///
/// Chunks arrive in arbitrary pieces; a line may be split across several
/// messages, so rendering always joins first and splits second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBuffer {
    header: &'static str,
    chunks: Vec<String>,
    value: Option<String>,
}

impl StreamBuffer {
    /// Create an empty buffer whose rendering starts with `header`.
    #[must_use]
    pub fn new(header: &'static str) -> Self {
        Self {
            header,
            chunks: Vec::new(),
            value: None,
        }
    }

    /// Append one chunk. Ignored once [`StreamBuffer::value`] has been taken.
    pub fn append(&mut self, chunk: impl Into<String>) {
        if self.value.is_none() {
            self.chunks.push(chunk.into());
        }
    }

    /// Whether nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Header line followed by the joined text split on `\n`.
    ///
    /// An empty buffer renders to no lines at all, not even the header.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        if self.chunks.is_empty() {
            return Vec::new();
        }
        let mut lines = vec![self.header.to_owned()];
        lines.extend(self.chunks.concat().split('\n').map(str::to_owned));
        lines
    }

    /// Joined, trimmed text. The first call freezes the buffer.
    pub fn value(&mut self) -> &str {
        let chunks = &self.chunks;
        self.value
            .get_or_insert_with(|| chunks.concat().trim().to_owned())
    }
}
