use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NormalizerError;
use crate::protocol::canonical::ContentBlock;

/// A tool the model may call, advertised in the first-turn prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

/// User content: a plain string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Concatenated text blocks; thinking and tool calls are ignored.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => text_of(blocks),
        }
    }
}

/// One conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum ChatMessage {
    System {
        content: MessageContent,
    },
    User {
        content: MessageContent,
    },
    Assistant {
        content: Vec<ContentBlock>,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<ContentBlock>,
    },
}

impl ChatMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage::User {
            content: MessageContent::Text(text.into()),
        }
    }

    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        ChatMessage::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }
}

/// Conversation history handed to a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

const TOOL_USE_PREAMBLE: &str = "\n## Tool Use Instructions\n\
You are equipped with specialized tools to perform actions or retrieve information. \
To use a tool, output a specific XML tag: \
<tool_call id=\"unique_id\" name=\"tool_name\">{\"arg\": \"value\"}</tool_call>. \
Rules for tool use:\n\
1. ALWAYS think before calling a tool. Explain your reasoning inside <think> tags.\n\
2. The 'id' attribute should be a unique 8-character string for each call.\n\
3. Output the tool call tag ONLY inside a <final> section if you are in reasoning mode.\n\
4. Wait for the tool result before proceeding with further analysis.\n\n\
### Available Tools\n";

const PROCEED_AFTER_TOOL: &str = "Please proceed based on this tool result.";

/// Build the text sent for this turn.
///
/// A turn without a parent message replays the whole history; a continuing
/// turn sends only what is new since the vendor last answered.
///
/// # Errors
///
/// Returns `NormalizerError::InvalidRequest` when nothing would be sent.
pub fn build_prompt(context: &ChatContext, continuing: bool) -> Result<String, NormalizerError> {
    let prompt = if continuing {
        build_continuation_prompt(context)
    } else {
        build_full_prompt(context)
    };
    if prompt.is_empty() {
        return Err(NormalizerError::InvalidRequest(
            "no message found to send".to_string(),
        ));
    }
    Ok(prompt)
}

/// Every message as `Role: content`, joined by blank lines, preceded by a
/// `System:` part carrying the system prompt and tool instructions.
#[must_use]
pub fn build_full_prompt(context: &ChatContext) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(context.messages.len() + 1);

    let mut system = context.system_prompt.clone().unwrap_or_default();
    if !context.tools.is_empty() {
        system.push_str(&tool_instructions(&context.tools));
    }
    let has_system_message = context
        .messages
        .iter()
        .any(|m| matches!(m, ChatMessage::System { .. }));
    if !system.is_empty() && !has_system_message {
        parts.push(format!("System: {system}"));
    }

    for message in &context.messages {
        let (role, content) = match message {
            ChatMessage::System { content } => ("System", content.text()),
            ChatMessage::User { content } => ("User", content.text()),
            ChatMessage::Assistant { content } => ("Assistant", render_assistant(content)),
            ChatMessage::ToolResult {
                tool_call_id,
                tool_name,
                content,
            } => (
                "User",
                render_tool_response(tool_call_id, tool_name, &text_of(content)),
            ),
        };
        parts.push(format!("{role}: {content}"));
    }

    parts.join("\n\n")
}

/// The latest tool result with a nudge to continue, otherwise the text of
/// the latest user message.
#[must_use]
pub fn build_continuation_prompt(context: &ChatContext) -> String {
    if let Some(ChatMessage::ToolResult {
        tool_call_id,
        tool_name,
        content,
    }) = context.messages.last()
    {
        let mut prompt = render_tool_response(tool_call_id, tool_name, &text_of(content));
        prompt.push('\n');
        prompt.push_str(PROCEED_AFTER_TOOL);
        return prompt;
    }

    context
        .messages
        .iter()
        .rev()
        .find_map(|m| match m {
            ChatMessage::User { content } => Some(content.text()),
            _ => None,
        })
        .unwrap_or_default()
}

fn tool_instructions(tools: &[ToolSpec]) -> String {
    let mut out = String::from(TOOL_USE_PREAMBLE);
    for tool in tools {
        out.push_str("#### ");
        out.push_str(&tool.name);
        out.push('\n');
        out.push_str(&tool.description);
        out.push('\n');
        out.push_str("Parameters: ");
        out.push_str(&serde_json::to_string(&tool.parameters).unwrap_or_default());
        out.push_str("\n\n");
    }
    out
}

fn render_assistant(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => out.push_str(text),
            ContentBlock::Thinking { thinking } => {
                out.push_str("<think>\n");
                out.push_str(thinking);
                out.push_str("\n</think>\n");
            }
            ContentBlock::ToolCall(call) => {
                let arguments = serde_json::to_string(&call.arguments).unwrap_or_default();
                out.push_str(&format!(
                    "<tool_call id=\"{}\" name=\"{}\">{arguments}</tool_call>",
                    call.id, call.name
                ));
            }
        }
    }
    out
}

/// `<tool_response>` wrapper, with the leading and trailing newline the
/// vendors expect.
#[must_use]
pub fn render_tool_response(id: &str, name: &str, text: &str) -> String {
    format!("\n<tool_response id=\"{id}\" name=\"{name}\">\n{text}\n</tool_response>\n")
}

fn text_of(blocks: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        if let ContentBlock::Text { text } = block {
            out.push_str(text);
        }
    }
    out
}
