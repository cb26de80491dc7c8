//! Newline-delimited JSON (NDJSON) record processing.
//!
//! This module splits incoming text into complete records and decodes each
//! record into a [`StreamEvent`]. Both halves are synchronous and own no I/O,
//! so the stream session can drive them from any transport.
//!
//! NDJSON format:
//! ```text
//! {"type": "progress", "data": {"step": 1}}
//! {"type": "progress", "data": {"step": 2}}
//! {"type": "done", "data": null}
//! ```

use tracing::debug;

use crate::model::{FailureKind, StreamEvent};

/// Default number of characters of an undecodable line quoted in a failure message.
pub const DEFAULT_EXCERPT_LIMIT: usize = 100;

/// Accumulates raw text and yields complete, newline-terminated lines.
///
/// The buffer never holds a complete line: every line found by [`absorb`]
/// is removed before the call returns, and only the trailing partial line is
/// kept for the next input.
///
/// # Example
/// ```
/// use learnlink::ndjson::LineBuffer;
///
/// let mut buffer = LineBuffer::new();
/// assert_eq!(buffer.absorb("a\nb\nc"), vec!["a", "b"]);
/// assert_eq!(buffer.absorb("\nd\n"), vec!["c", "d"]);
/// assert_eq!(buffer.finish(), None);
/// ```
///
/// [`absorb`]: LineBuffer::absorb
#[derive(Debug, Default)]
pub struct LineBuffer {
    tail: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `new_text` and return every line it completed, in order.
    ///
    /// Lines are trimmed, so `\r\n` endings are tolerated. Blank lines are
    /// returned as empty strings; skipping them is the decoder's job.
    pub fn absorb(&mut self, new_text: &str) -> Vec<String> {
        self.tail.push_str(new_text);

        let mut lines = Vec::new();
        while let Some(pos) = self.tail.find('\n') {
            lines.push(self.tail[..pos].trim().to_string());
            self.tail.drain(..=pos);
        }
        lines
    }

    /// Take the trailing partial line at end of stream.
    ///
    /// Streams are not guaranteed to end with a newline, so a non-blank tail
    /// is treated as one final complete line.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.tail);
        let line = line.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }

    /// Discard the trailing partial line without yielding it.
    pub fn clear(&mut self) -> usize {
        let discarded = self.tail.len();
        self.tail.clear();
        discarded
    }

    /// Number of bytes waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.tail.len()
    }
}

/// Decodes single NDJSON lines into [`StreamEvent`]s.
///
/// The decoder performs no semantic validation: any JSON document becomes a
/// [`StreamEvent::Unit`] carrying the parsed value unchanged.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    excerpt_limit: usize,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_EXCERPT_LIMIT)
    }
}

impl RecordDecoder {
    /// Create a decoder quoting at most `excerpt_limit` characters of a bad line.
    pub fn new(excerpt_limit: usize) -> Self {
        Self { excerpt_limit }
    }

    /// Decode one line.
    ///
    /// Returns `None` for blank lines. A line that is not valid JSON yields a
    /// non-terminal [`FailureKind::Decode`] failure; it never aborts the stream.
    ///
    /// # Example
    /// ```
    /// use learnlink::ndjson::RecordDecoder;
    /// use learnlink::model::StreamEvent;
    ///
    /// let decoder = RecordDecoder::default();
    /// assert!(decoder.decode("   ").is_none());
    /// assert!(matches!(decoder.decode(r#"{"type":"unit","data":1}"#), Some(StreamEvent::Unit(_))));
    /// assert!(matches!(decoder.decode("{not json"), Some(StreamEvent::Failure { .. })));
    /// ```
    pub fn decode(&self, line: &str) -> Option<StreamEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str(line) {
            Ok(payload) => Some(StreamEvent::Unit(payload)),
            Err(e) => {
                let excerpt = excerpt(line, self.excerpt_limit);
                debug!(error = %e, excerpt = %excerpt, "failed to decode stream record");
                Some(StreamEvent::Failure {
                    kind: FailureKind::Decode,
                    message: format!("Failed to decode stream record ({}): {}", e, excerpt),
                    raw_line: Some(line.to_string()),
                })
            }
        }
    }
}

/// Cut `line` to at most `limit` characters, marking the cut with an ellipsis.
fn excerpt(line: &str, limit: usize) -> String {
    match line.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &line[..end]),
        None => line.to_string(),
    }
}
