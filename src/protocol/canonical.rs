use serde::{Deserialize, Serialize};

/// Which channel a routed fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Text,
    Thinking,
}

/// An atomic fragment extracted from one vendor payload record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDelta {
    pub text: String,
    pub kind: DeltaKind,
}

impl RawDelta {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: DeltaKind::Text,
        }
    }

    #[must_use]
    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: DeltaKind::Thinking,
        }
    }
}

/// A tool invocation assembled from inline `<tool_call>` markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One logical unit of assistant output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(rename = "toolCall")]
    ToolCall(ToolCall),
}

impl ContentBlock {
    /// True for text/thinking blocks that never received content.
    #[must_use]
    pub fn is_empty_run(&self) -> bool {
        match self {
            ContentBlock::Text { text } => text.is_empty(),
            ContentBlock::Thinking { thinking } => thinking.is_empty(),
            ContentBlock::ToolCall(_) => false,
        }
    }

    #[must_use]
    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// Reason the assistant turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Stop,
    ToolUse,
    Error,
    Aborted,
}

/// Token bookkeeping. Web-chat vendors report none, so this stays zeroed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub total_tokens: u64,
}

/// Identity of the model a turn runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub id: String,
}

impl ModelRef {
    #[must_use]
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            id: id.into(),
        }
    }
}

/// The assistant message, partial while streaming and final on `done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
    pub thinking_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AssistantMessage {
    /// Empty-content record attached to an `error` event.
    #[must_use]
    pub fn error_record(model: &ModelRef, stop_reason: StopReason, message: String) -> Self {
        Self {
            content: Vec::new(),
            stop_reason,
            provider: model.provider.clone(),
            model: model.id.clone(),
            usage: Usage::default(),
            thinking_enabled: false,
            error_message: Some(message),
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(ContentBlock::as_tool_call)
    }

    /// Concatenated text of every text block.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }
}

/// A single event of the normalized stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    #[serde(rename = "text_start")]
    TextStart {
        content_index: usize,
        partial: AssistantMessage,
    },
    #[serde(rename = "text_delta")]
    TextDelta {
        content_index: usize,
        delta: String,
        partial: AssistantMessage,
    },
    #[serde(rename = "thinking_start")]
    ThinkingStart {
        content_index: usize,
        partial: AssistantMessage,
    },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta {
        content_index: usize,
        delta: String,
        partial: AssistantMessage,
    },
    #[serde(rename = "toolcall_start")]
    ToolCallStart {
        content_index: usize,
        partial: AssistantMessage,
    },
    #[serde(rename = "toolcall_delta")]
    ToolCallDelta {
        content_index: usize,
        delta: String,
        partial: AssistantMessage,
    },
    #[serde(rename = "toolcall_end")]
    ToolCallEnd {
        content_index: usize,
        tool_call: ToolCall,
        partial: AssistantMessage,
    },
    #[serde(rename = "done")]
    Done {
        reason: StopReason,
        message: AssistantMessage,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        error: AssistantMessage,
    },
}

impl StreamEvent {
    /// Wire name of the event, as serialized in the `type` field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::TextStart { .. } => "text_start",
            StreamEvent::TextDelta { .. } => "text_delta",
            StreamEvent::ThinkingStart { .. } => "thinking_start",
            StreamEvent::ThinkingDelta { .. } => "thinking_delta",
            StreamEvent::ToolCallStart { .. } => "toolcall_start",
            StreamEvent::ToolCallDelta { .. } => "toolcall_delta",
            StreamEvent::ToolCallEnd { .. } => "toolcall_end",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    #[must_use]
    pub fn content_index(&self) -> Option<usize> {
        match self {
            StreamEvent::TextStart { content_index, .. }
            | StreamEvent::TextDelta { content_index, .. }
            | StreamEvent::ThinkingStart { content_index, .. }
            | StreamEvent::ThinkingDelta { content_index, .. }
            | StreamEvent::ToolCallStart { content_index, .. }
            | StreamEvent::ToolCallDelta { content_index, .. }
            | StreamEvent::ToolCallEnd { content_index, .. } => Some(*content_index),
            StreamEvent::Done { .. } | StreamEvent::Error { .. } => None,
        }
    }

    #[must_use]
    pub fn delta(&self) -> Option<&str> {
        match self {
            StreamEvent::TextDelta { delta, .. }
            | StreamEvent::ThinkingDelta { delta, .. }
            | StreamEvent::ToolCallDelta { delta, .. } => Some(delta),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_serializes_with_type_tag() {
        let block = ContentBlock::ToolCall(ToolCall {
            id: "call_1".to_string(),
            name: "exec".to_string(),
            arguments: serde_json::json!({"cmd": "ls"}),
        });
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "toolCall");
        assert_eq!(json["name"], "exec");
        assert_eq!(json["arguments"]["cmd"], "ls");
    }

    #[test]
    fn stop_reason_uses_camel_case() {
        assert_eq!(
            serde_json::to_string(&StopReason::ToolUse).unwrap(),
            "\"toolUse\""
        );
        assert_eq!(serde_json::to_string(&StopReason::Stop).unwrap(), "\"stop\"");
    }

    #[test]
    fn event_kind_matches_serialized_type() {
        let model = ModelRef::new("deepseek-web", "deepseek-chat");
        let event = StreamEvent::Error {
            message: "boom".to_string(),
            error: AssistantMessage::error_record(&model, StopReason::Error, "boom".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["error"]["stopReason"], "error");
        assert_eq!(json["error"]["errorMessage"], "boom");
        assert!(json["error"]["content"].as_array().unwrap().is_empty());
    }

    #[test]
    fn empty_runs_detected() {
        assert!(ContentBlock::Text {
            text: String::new()
        }
        .is_empty_run());
        assert!(!ContentBlock::Thinking {
            thinking: "x".into()
        }
        .is_empty_run());
    }
}
