//! Streaming tag segmenter.
//!
//! Splits the text channel of a web-chat provider into typed segments by
//! scanning for inline markup (`<think>`, `<final>`, `<tool_call>`, the reply
//! marker). Tags may arrive split across any number of deltas.
//!
//! Invariants:
//! - After every push the buffer holds no complete recognized tag or junk token.
//! - Content before a tag is emitted under the mode in effect before the tag.
//! - Only a possible tag prefix (from the last `<`, or a partial reply marker)
//!   is ever withheld, and `finish` releases it under the current mode.

use memchr::memchr3;
use tracing::debug;

use super::patterns::{find_earliest_tag, safe_prefix_len, TagMatch, Transition};
use crate::protocol::canonical::{DeltaKind, RawDelta};
use crate::util::next_call_id;

/// Interpretation context of the text channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Text,
    Thinking,
    ToolCall,
}

/// Typed output of the segmenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Thinking(String),
    /// A `<tool_call>` opened; starts the tool-call block for `ordinal`.
    ToolCallStart {
        ordinal: usize,
        id: String,
        name: String,
    },
    ToolCallArgs {
        ordinal: usize,
        text: String,
    },
    ToolCallEnd {
        ordinal: usize,
    },
}

/// Streaming tag segmenter. One instance per streamed turn.
pub struct TagSegmenter {
    buffer: String,
    mode: Mode,
    tool_ordinal: usize,
    junk_tokens: Vec<String>,
    scan_tags: bool,
}

impl TagSegmenter {
    /// Create a segmenter that drops `junk_tokens` and scans for markup.
    #[must_use]
    pub fn new(junk_tokens: Vec<String>) -> Self {
        Self {
            buffer: String::new(),
            mode: Mode::Text,
            tool_ordinal: 0,
            junk_tokens,
            scan_tags: true,
        }
    }

    /// Create a segmenter that forwards text verbatim, for providers that
    /// report reasoning through structured fields.
    #[must_use]
    pub fn passthrough(junk_tokens: Vec<String>) -> Self {
        Self {
            scan_tags: false,
            ..Self::new(junk_tokens)
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Bytes currently withheld as a possible tag prefix.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Feed one routed fragment.
    pub fn push(&mut self, delta: &RawDelta, out: &mut Vec<Segment>) {
        match delta.kind {
            DeltaKind::Text => self.push_text(&delta.text, out),
            DeltaKind::Thinking => self.push_thinking(&delta.text, out),
        }
    }

    /// Thinking fragments come from structured fields and bypass tag scanning.
    pub fn push_thinking(&mut self, text: &str, out: &mut Vec<Segment>) {
        if let Some(clean) = self.strip_junk(text) {
            out.push(Segment::Thinking(clean));
        }
    }

    /// Inject a provider notice under the current channel: thinking while
    /// reasoning, text otherwise.
    pub fn push_notice(&mut self, notice: &str, out: &mut Vec<Segment>) {
        if notice.is_empty() {
            return;
        }
        let segment = if self.mode == Mode::Thinking {
            Segment::Thinking(notice.to_string())
        } else {
            Segment::Text(notice.to_string())
        };
        out.push(segment);
    }

    /// Feed a text-channel fragment that may contain inline markup.
    pub fn push_text(&mut self, text: &str, out: &mut Vec<Segment>) {
        let Some(clean) = self.strip_junk(text) else {
            return;
        };

        if !self.scan_tags {
            out.push(Segment::Text(clean));
            return;
        }

        // Fast path: nothing withheld and nothing in this chunk can start or
        // complete a tag.
        if self.buffer.is_empty() && memchr3(b'<', b'>', b'[', clean.as_bytes()).is_none() {
            self.emit_in_mode(clean, out);
            return;
        }

        self.buffer.push_str(&clean);
        self.strip_buffered_junk();
        self.drain(out);
    }

    /// End of stream: release the withheld tail under the current mode and
    /// close a tool call left open.
    pub fn finish(&mut self, out: &mut Vec<Segment>) {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.emit_in_mode(rest, out);
        }
        if self.mode == Mode::ToolCall {
            debug!(ordinal = self.tool_ordinal, "closing unterminated tool call");
            self.end_tool_call(out);
        }
    }

    fn strip_junk(&self, text: &str) -> Option<String> {
        if text.is_empty() {
            return None;
        }
        if self.junk_tokens.iter().any(|junk| junk == text) {
            debug!(token = text, "dropping junk token");
            return None;
        }
        let mut clean = None::<String>;
        for junk in &self.junk_tokens {
            let current = clean.as_deref().unwrap_or(text);
            if current.contains(junk.as_str()) {
                debug!(token = junk.as_str(), "stripping embedded junk token");
                clean = Some(current.replace(junk.as_str(), ""));
            }
        }
        let clean = clean.unwrap_or_else(|| text.to_string());
        (!clean.is_empty()).then_some(clean)
    }

    /// A junk token split across deltas only becomes whole in the buffer.
    fn strip_buffered_junk(&mut self) {
        for junk in &self.junk_tokens {
            if !junk.is_empty() && self.buffer.contains(junk.as_str()) {
                debug!(token = junk.as_str(), "stripping reassembled junk token");
                self.buffer = self.buffer.replace(junk.as_str(), "");
            }
        }
    }

    fn drain(&mut self, out: &mut Vec<Segment>) {
        while let Some(tag) = find_earliest_tag(&self.buffer) {
            debug!(kind = ?tag.kind, at = tag.start, "tag detected");
            if tag.start > 0 {
                let before = self.buffer[..tag.start].to_string();
                self.emit_in_mode(before, out);
            }
            let consumed = tag.end;
            self.apply(tag, out);
            self.buffer.drain(..consumed);
        }

        let safe = safe_prefix_len(&self.buffer);
        if safe == 0 {
            return;
        }
        if safe == self.buffer.len() {
            let all = std::mem::take(&mut self.buffer);
            self.emit_in_mode(all, out);
        } else {
            let tail = self.buffer.split_off(safe);
            let head = std::mem::replace(&mut self.buffer, tail);
            self.emit_in_mode(head, out);
        }
    }

    fn apply(&mut self, tag: TagMatch, out: &mut Vec<Segment>) {
        match tag.kind.transition() {
            Transition::EnterThinking => self.mode = Mode::Thinking,
            Transition::EnterText => self.mode = Mode::Text,
            Transition::EnterToolCall => {
                if self.mode == Mode::ToolCall {
                    // A new call opened before the previous one closed.
                    self.end_tool_call(out);
                }
                let ordinal = self.tool_ordinal;
                let id = tag
                    .tool_id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| next_call_id(ordinal));
                let name = tag.tool_name.unwrap_or_default();
                self.mode = Mode::ToolCall;
                out.push(Segment::ToolCallStart { ordinal, id, name });
            }
            Transition::EndToolCall => self.end_tool_call(out),
        }
    }

    fn end_tool_call(&mut self, out: &mut Vec<Segment>) {
        out.push(Segment::ToolCallEnd {
            ordinal: self.tool_ordinal,
        });
        self.tool_ordinal += 1;
        self.mode = Mode::Text;
    }

    fn emit_in_mode(&self, text: String, out: &mut Vec<Segment>) {
        if text.is_empty() {
            return;
        }
        let segment = match self.mode {
            Mode::Text => Segment::Text(text),
            Mode::Thinking => Segment::Thinking(text),
            Mode::ToolCall => Segment::ToolCallArgs {
                ordinal: self.tool_ordinal,
                text,
            },
        };
        out.push(segment);
    }
}

#[cfg(test)]
#[path = "segmenter_tests.rs"]
mod tests;
