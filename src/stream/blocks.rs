use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::protocol::canonical::{
    AssistantMessage, ContentBlock, ModelRef, StopReason, StreamEvent, ToolCall, Usage,
};
use crate::tags::Segment;
use crate::util::next_call_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BlockKey {
    Text,
    Thinking,
    Tool(usize),
}

/// Running tallies for the completion log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub content_chars: usize,
    pub reasoning_chars: usize,
    pub tool_calls: usize,
}

/// Assigns content indices and turns segments into start/delta/end events.
///
/// A stream gets at most one text block and one thinking block; each tool
/// ordinal gets its own block. Indices follow first appearance and are never
/// reused.
pub struct BlockTracker {
    model: ModelRef,
    blocks: Vec<ContentBlock>,
    index_of: FxHashMap<BlockKey, usize>,
    tool_args: FxHashMap<usize, String>,
    stats: StreamStats,
}

impl BlockTracker {
    #[must_use]
    pub fn new(model: ModelRef) -> Self {
        Self {
            model,
            blocks: Vec::new(),
            index_of: FxHashMap::default(),
            tool_args: FxHashMap::default(),
            stats: StreamStats::default(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Translate one segment into zero or more events.
    pub fn apply(&mut self, segment: Segment, out: &mut Vec<StreamEvent>) {
        match segment {
            Segment::Text(delta) => self.push_text(delta, out),
            Segment::Thinking(delta) => self.push_thinking(delta, out),
            Segment::ToolCallStart { ordinal, id, name } => {
                self.ensure_tool(ordinal, Some(id), name, out);
            }
            Segment::ToolCallArgs { ordinal, text } => self.push_tool_args(ordinal, text, out),
            Segment::ToolCallEnd { ordinal } => self.end_tool(ordinal, out),
        }
    }

    fn push_text(&mut self, delta: String, out: &mut Vec<StreamEvent>) {
        if delta.is_empty() {
            return;
        }
        let index = match self.index_of.get(&BlockKey::Text) {
            Some(&index) => index,
            None => {
                let index = self.allocate(BlockKey::Text, ContentBlock::Text {
                    text: String::new(),
                });
                out.push(StreamEvent::TextStart {
                    content_index: index,
                    partial: self.partial(),
                });
                index
            }
        };
        if let Some(ContentBlock::Text { text }) = self.blocks.get_mut(index) {
            text.push_str(&delta);
        }
        self.stats.content_chars += delta.chars().count();
        out.push(StreamEvent::TextDelta {
            content_index: index,
            delta,
            partial: self.partial(),
        });
    }

    fn push_thinking(&mut self, delta: String, out: &mut Vec<StreamEvent>) {
        if delta.is_empty() {
            return;
        }
        let index = match self.index_of.get(&BlockKey::Thinking) {
            Some(&index) => index,
            None => {
                let index = self.allocate(BlockKey::Thinking, ContentBlock::Thinking {
                    thinking: String::new(),
                });
                out.push(StreamEvent::ThinkingStart {
                    content_index: index,
                    partial: self.partial(),
                });
                index
            }
        };
        if let Some(ContentBlock::Thinking { thinking }) = self.blocks.get_mut(index) {
            thinking.push_str(&delta);
        }
        self.stats.reasoning_chars += delta.chars().count();
        out.push(StreamEvent::ThinkingDelta {
            content_index: index,
            delta,
            partial: self.partial(),
        });
    }

    fn ensure_tool(
        &mut self,
        ordinal: usize,
        id: Option<String>,
        name: String,
        out: &mut Vec<StreamEvent>,
    ) -> usize {
        if let Some(&index) = self.index_of.get(&BlockKey::Tool(ordinal)) {
            return index;
        }
        let id = id.unwrap_or_else(|| next_call_id(ordinal));
        debug!(ordinal, id = id.as_str(), name = name.as_str(), "tool call started");
        let index = self.allocate(
            BlockKey::Tool(ordinal),
            ContentBlock::ToolCall(ToolCall {
                id,
                name,
                arguments: Value::Object(serde_json::Map::new()),
            }),
        );
        self.tool_args.insert(ordinal, String::new());
        self.stats.tool_calls += 1;
        out.push(StreamEvent::ToolCallStart {
            content_index: index,
            partial: self.partial(),
        });
        index
    }

    fn push_tool_args(&mut self, ordinal: usize, delta: String, out: &mut Vec<StreamEvent>) {
        let index = self.ensure_tool(ordinal, None, String::new(), out);
        if delta.is_empty() {
            return;
        }
        self.tool_args.entry(ordinal).or_default().push_str(&delta);
        out.push(StreamEvent::ToolCallDelta {
            content_index: index,
            delta,
            partial: self.partial(),
        });
    }

    fn end_tool(&mut self, ordinal: usize, out: &mut Vec<StreamEvent>) {
        // A close without a matching open has no block to finish.
        let Some(&index) = self.index_of.get(&BlockKey::Tool(ordinal)) else {
            debug!(ordinal, "ignoring close for unknown tool call");
            return;
        };
        let raw = self.tool_args.remove(&ordinal).unwrap_or_default();
        let arguments = parse_tool_arguments(&raw);
        let Some(ContentBlock::ToolCall(call)) = self.blocks.get_mut(index) else {
            return;
        };
        call.arguments = arguments;
        let tool_call = call.clone();
        out.push(StreamEvent::ToolCallEnd {
            content_index: index,
            tool_call,
            partial: self.partial(),
        });
    }

    fn allocate(&mut self, key: BlockKey, block: ContentBlock) -> usize {
        let index = self.blocks.len();
        self.blocks.push(block);
        self.index_of.insert(key, index);
        index
    }

    /// Snapshot of every block so far, unfiltered.
    #[must_use]
    pub fn partial(&self) -> AssistantMessage {
        AssistantMessage {
            content: self.blocks.clone(),
            stop_reason: if self.stats.tool_calls > 0 {
                StopReason::ToolUse
            } else {
                StopReason::Stop
            },
            provider: self.model.provider.clone(),
            model: self.model.id.clone(),
            usage: Usage::default(),
            thinking_enabled: self.stats.reasoning_chars > 0,
            error_message: None,
        }
    }

    /// Final message: internal tools and empty runs removed.
    #[must_use]
    pub fn finish(&self, internal_tools: &[String]) -> AssistantMessage {
        let content: Vec<ContentBlock> = self
            .blocks
            .iter()
            .filter(|block| match block {
                ContentBlock::ToolCall(call) => {
                    !internal_tools.iter().any(|name| *name == call.name)
                }
                other => !other.is_empty_run(),
            })
            .cloned()
            .collect();
        let stop_reason = if content.iter().any(|b| b.as_tool_call().is_some()) {
            StopReason::ToolUse
        } else {
            StopReason::Stop
        };
        AssistantMessage {
            content,
            stop_reason,
            provider: self.model.provider.clone(),
            model: self.model.id.clone(),
            usage: Usage::default(),
            thinking_enabled: self.stats.reasoning_chars > 0,
            error_message: None,
        }
    }
}

/// Empty text counts as `{}`; anything unparseable, whitespace-only text
/// included, is wrapped as `{"raw": ..}`.
#[must_use]
pub fn parse_tool_arguments(raw: &str) -> Value {
    let source = if raw.is_empty() { "{}" } else { raw };
    serde_json::from_str(source).unwrap_or_else(|_| serde_json::json!({ "raw": source }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker() -> BlockTracker {
        BlockTracker::new(ModelRef::new("deepseek-web", "deepseek-chat"))
    }

    fn feed(tracker: &mut BlockTracker, segments: Vec<Segment>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for segment in segments {
            tracker.apply(segment, &mut out);
        }
        out
    }

    fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::kind).collect()
    }

    fn start(ordinal: usize, id: &str, name: &str) -> Segment {
        Segment::ToolCallStart {
            ordinal,
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn args(ordinal: usize, text: &str) -> Segment {
        Segment::ToolCallArgs {
            ordinal,
            text: text.to_string(),
        }
    }

    #[test]
    fn text_then_thinking_then_text_reuses_blocks() {
        let mut t = tracker();
        let events = feed(
            &mut t,
            vec![
                Segment::Text("A".into()),
                Segment::Thinking("B".into()),
                Segment::Text("C".into()),
            ],
        );
        assert_eq!(
            kinds(&events),
            vec![
                "text_start",
                "text_delta",
                "thinking_start",
                "thinking_delta",
                "text_delta"
            ]
        );
        assert_eq!(events[4].content_index(), Some(0));
        assert_eq!(events[3].content_index(), Some(1));

        let done = t.finish(&[]);
        assert_eq!(
            done.content,
            vec![
                ContentBlock::Text { text: "AC".into() },
                ContentBlock::Thinking {
                    thinking: "B".into()
                },
            ]
        );
        assert!(done.thinking_enabled);
        assert_eq!(done.stop_reason, StopReason::Stop);
    }

    #[test]
    fn empty_deltas_emit_nothing() {
        let mut t = tracker();
        let events = feed(
            &mut t,
            vec![Segment::Text(String::new()), Segment::Thinking(String::new())],
        );
        assert!(events.is_empty());
        assert!(t.partial().content.is_empty());
    }

    #[test]
    fn tool_call_start_delta_end() {
        let mut t = tracker();
        let events = feed(
            &mut t,
            vec![
                start(0, "call_a", "exec"),
                args(0, r#"{"cmd":"#),
                args(0, r#""ls"}"#),
                Segment::ToolCallEnd { ordinal: 0 },
            ],
        );
        assert_eq!(
            kinds(&events),
            vec!["toolcall_start", "toolcall_delta", "toolcall_delta", "toolcall_end"]
        );
        match &events[3] {
            StreamEvent::ToolCallEnd { tool_call, .. } => {
                assert_eq!(tool_call.id, "call_a");
                assert_eq!(tool_call.arguments, json!({"cmd": "ls"}));
            }
            other => panic!("expected toolcall_end, got {other:?}"),
        }
        let done = t.finish(&[]);
        assert_eq!(done.stop_reason, StopReason::ToolUse);
        assert_eq!(done.tool_calls().count(), 1);
    }

    #[test]
    fn partial_snapshot_tracks_progress() {
        let mut t = tracker();
        let events = feed(&mut t, vec![Segment::Text("he".into()), Segment::Text("y".into())]);
        match &events[2] {
            StreamEvent::TextDelta { partial, .. } => assert_eq!(partial.text(), "hey"),
            other => panic!("unexpected {other:?}"),
        }
        match &events[0] {
            StreamEvent::TextStart { partial, .. } => assert_eq!(partial.text(), ""),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_arguments_wrapped_raw() {
        let mut t = tracker();
        let events = feed(
            &mut t,
            vec![
                start(0, "c", "x"),
                args(0, "{bad"),
                Segment::ToolCallEnd { ordinal: 0 },
            ],
        );
        match events.last() {
            Some(StreamEvent::ToolCallEnd { tool_call, .. }) => {
                assert_eq!(tool_call.arguments, json!({"raw": "{bad"}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_arguments_parse_as_object() {
        assert_eq!(parse_tool_arguments(""), json!({}));
        assert_eq!(parse_tool_arguments("  \n"), json!({ "raw": "  \n" }));
        assert_eq!(parse_tool_arguments("[1,2]"), json!([1, 2]));
    }

    #[test]
    fn indices_strictly_increase_across_tools() {
        let mut t = tracker();
        let events = feed(
            &mut t,
            vec![
                Segment::Text("hi".into()),
                start(0, "a", "x"),
                Segment::ToolCallEnd { ordinal: 0 },
                start(1, "b", "y"),
                Segment::ToolCallEnd { ordinal: 1 },
                Segment::Thinking("t".into()),
            ],
        );
        let starts: Vec<usize> = events
            .iter()
            .filter(|e| e.kind().ends_with("_start"))
            .filter_map(StreamEvent::content_index)
            .collect();
        assert_eq!(starts, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unknown_tool_end_is_ignored() {
        let mut t = tracker();
        let events = feed(&mut t, vec![Segment::ToolCallEnd { ordinal: 3 }]);
        assert!(events.is_empty());
    }

    #[test]
    fn args_without_start_open_block() {
        let mut t = tracker();
        let events = feed(&mut t, vec![args(0, "{}")]);
        assert_eq!(kinds(&events), vec!["toolcall_start", "toolcall_delta"]);
    }

    #[test]
    fn internal_tools_dropped_from_final_only() {
        let mut t = tracker();
        let events = feed(
            &mut t,
            vec![
                start(0, "s", "web_search"),
                args(0, r#"{"query":"rust"}"#),
                Segment::ToolCallEnd { ordinal: 0 },
                Segment::Text("answer".into()),
            ],
        );
        assert!(events.iter().any(|e| e.kind() == "toolcall_end"));
        let done = t.finish(&["web_search".to_string()]);
        assert_eq!(done.tool_calls().count(), 0);
        assert_eq!(done.stop_reason, StopReason::Stop);
        assert_eq!(done.text(), "answer");
    }

    #[test]
    fn stats_count_chars() {
        let mut t = tracker();
        feed(
            &mut t,
            vec![
                Segment::Text("你好".into()),
                Segment::Thinking("abc".into()),
                start(0, "a", "x"),
            ],
        );
        assert_eq!(
            t.stats(),
            StreamStats {
                content_chars: 2,
                reasoning_chars: 3,
                tool_calls: 1
            }
        );
    }
}
