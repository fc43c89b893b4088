//! Line reassembly and line classification for streamed chat bodies.
//!
//! Web-chat vendors speak loose SSE: standard `event:`/`data:` lines, bare
//! JSON per line, and a single-line `id: N event: NAME data: {...}` form.
//! Everything is handled line by line; blank-line frame boundaries carry no
//! meaning here.
use bytes::BytesMut;
use memchr::{memchr, memmem};
use std::sync::LazyLock;

// ---------------------------------------------------------------------------
// LineReassembler: bytes to complete lines
// ---------------------------------------------------------------------------

/// Incremental line splitter over raw response bytes.
///
/// Bytes after the last newline are retained until the next chunk, so a
/// multi-byte UTF-8 sequence split across chunks is decoded whole. Invalid
/// sequences degrade to U+FFFD.
pub struct LineReassembler {
    buffer: BytesMut,
    scan_from: usize,
}

impl LineReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scan_from: 0,
        }
    }

    /// Feed a chunk and return the lines it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed a chunk and append completed lines into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        self.buffer.extend_from_slice(chunk);
        while let Some(rel) = memchr(b'\n', &self.buffer[self.scan_from..]) {
            let line_end = self.scan_from + rel;
            let line = self.buffer.split_to(line_end + 1);
            out.push(decode_line(&line[..line_end]));
            self.scan_from = 0;
        }
        self.scan_from = self.buffer.len();
    }

    /// Return the final partial line, if any, and reset.
    pub fn flush(&mut self) -> Option<String> {
        self.scan_from = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        let line = decode_line(&rest);
        (!line.is_empty()).then_some(line)
    }

    /// Bytes held back waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

/// Non-payload SSE field carried by a control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlField {
    Event,
    Id,
}

/// What a single line means to the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLine {
    /// `event:` or `id:` line without a payload.
    Control { field: ControlField, value: String },
    /// JSON candidate, from a `data:` line, a combined single-line frame, or
    /// a bare line.
    Payload(String),
    /// Blank line, comment, `retry:`, or `data: [DONE]`.
    Ignorable,
}

static INLINE_DATA_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(b" data:"));

/// Classify one reassembled line.
#[must_use]
pub fn classify_line(line: &str) -> FrameLine {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return FrameLine::Ignorable;
    }

    if let Some(value) = trimmed.strip_prefix("data:") {
        return data_value(value);
    }

    let field = if trimmed.starts_with("event:") {
        Some((ControlField::Event, "event:".len()))
    } else if trimmed.starts_with("id:") {
        Some((ControlField::Id, "id:".len()))
    } else {
        None
    };

    if let Some((field, prefix_len)) = field {
        // Single-line form: `id: 7 event: CHUNK_DELTA data: {...}`.
        if let Some(pos) = INLINE_DATA_FINDER.find(trimmed.as_bytes()) {
            return data_value(&trimmed[pos + " data:".len()..]);
        }
        let rest = trimmed[prefix_len..].trim();
        let value = match field {
            // `id: 7 event: NAME` carries the event name after the id.
            ControlField::Id => rest.split_whitespace().next().unwrap_or_default(),
            ControlField::Event => rest,
        };
        return FrameLine::Control {
            field,
            value: value.to_string(),
        };
    }

    if trimmed.starts_with("retry:") {
        return FrameLine::Ignorable;
    }

    FrameLine::Payload(trimmed.to_string())
}

#[inline]
fn data_value(value: &str) -> FrameLine {
    let value = value.trim();
    if value.is_empty() || value == "[DONE]" {
        FrameLine::Ignorable
    } else {
        FrameLine::Payload(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(s: &str) -> FrameLine {
        FrameLine::Payload(s.to_string())
    }

    // -- LineReassembler tests --

    #[test]
    fn test_lines_split_on_newline() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.feed(b"data: a\ndata: b\n"), vec!["data: a", "data: b"]);
        assert_eq!(lines.pending_len(), 0);
    }

    #[test]
    fn test_partial_line_is_retained() {
        let mut lines = LineReassembler::new();
        assert!(lines.feed(b"data: hel").is_empty());
        assert_eq!(lines.feed(b"lo\n"), vec!["data: hello"]);
    }

    #[test]
    fn test_crlf_is_stripped() {
        let mut lines = LineReassembler::new();
        assert_eq!(lines.feed(b"data: x\r\n\r\n"), vec!["data: x", ""]);
    }

    #[test]
    fn test_cr_split_from_lf() {
        let mut lines = LineReassembler::new();
        assert!(lines.feed(b"data: x\r").is_empty());
        assert_eq!(lines.feed(b"\n"), vec!["data: x"]);
    }

    #[test]
    fn test_split_multibyte_character() {
        let text = "data: 你好\n".as_bytes();
        // Cut inside the first CJK character.
        let (a, b) = text.split_at(7);
        let mut lines = LineReassembler::new();
        assert!(lines.feed(a).is_empty());
        assert_eq!(lines.feed(b), vec!["data: 你好"]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let text = "event: x\ndata: {\"v\":\"é\"}\n".as_bytes();
        let mut lines = LineReassembler::new();
        let mut got = Vec::new();
        for byte in text {
            got.extend(lines.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(got, vec!["event: x", "data: {\"v\":\"é\"}"]);
    }

    #[test]
    fn test_invalid_utf8_becomes_replacement() {
        let mut lines = LineReassembler::new();
        let got = lines.feed(b"ab\xffcd\n");
        assert_eq!(got, vec!["ab\u{fffd}cd"]);
    }

    #[test]
    fn test_flush_returns_tail() {
        let mut lines = LineReassembler::new();
        lines.feed(b"data: a\n{\"v\":1}");
        assert_eq!(lines.flush().as_deref(), Some("{\"v\":1}"));
        assert_eq!(lines.flush(), None);
    }

    #[test]
    fn test_flush_truncated_multibyte() {
        let mut lines = LineReassembler::new();
        lines.feed(&"好".as_bytes()[..2]);
        assert_eq!(lines.flush().as_deref(), Some("\u{fffd}"));
    }

    // -- classify_line tests --

    #[test]
    fn test_classify_data_line() {
        assert_eq!(classify_line(r#"data: {"v":"x"}"#), payload(r#"{"v":"x"}"#));
        assert_eq!(classify_line(r#"data:{"v":"x"}"#), payload(r#"{"v":"x"}"#));
    }

    #[test]
    fn test_classify_done_and_blank() {
        assert_eq!(classify_line("data: [DONE]"), FrameLine::Ignorable);
        assert_eq!(classify_line("data:"), FrameLine::Ignorable);
        assert_eq!(classify_line(""), FrameLine::Ignorable);
        assert_eq!(classify_line("   "), FrameLine::Ignorable);
        assert_eq!(classify_line(": keep-alive"), FrameLine::Ignorable);
        assert_eq!(classify_line("retry: 3000"), FrameLine::Ignorable);
    }

    #[test]
    fn test_classify_event_line() {
        assert_eq!(
            classify_line("event: ready"),
            FrameLine::Control {
                field: ControlField::Event,
                value: "ready".to_string()
            }
        );
    }

    #[test]
    fn test_classify_id_line() {
        assert_eq!(
            classify_line("id: 42"),
            FrameLine::Control {
                field: ControlField::Id,
                value: "42".to_string()
            }
        );
    }

    #[test]
    fn test_classify_bare_json() {
        assert_eq!(classify_line(r#"{"v":"hi"}"#), payload(r#"{"v":"hi"}"#));
    }

    #[test]
    fn test_classify_single_line_frame() {
        let line = r#"id: 12 event: CHUNK_DELTA data: {"text":"hi there"}"#;
        assert_eq!(classify_line(line), payload(r#"{"text":"hi there"}"#));

        let line = r#"event: STREAM_MSG_NOTIFY data: {"a":1}"#;
        assert_eq!(classify_line(line), payload(r#"{"a":1}"#));
    }

    #[test]
    fn test_classify_single_line_without_data() {
        assert_eq!(
            classify_line("id: 3 event: SSE_HEARTBEAT"),
            FrameLine::Control {
                field: ControlField::Id,
                value: "3".to_string()
            }
        );
    }
}
