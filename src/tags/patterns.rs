use std::sync::LazyLock;

use regex_lite::Regex;

/// Recognized inline markup tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    ThinkOpen,
    ThinkClose,
    FinalOpen,
    FinalClose,
    ToolCallOpen,
    ToolCallClose,
    ReplyMarker,
    /// A bare `think>` left behind when the model drops the `<`.
    MalformedThinkOpen,
}

/// Mode change requested by a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    EnterThinking,
    EnterText,
    EnterToolCall,
    EndToolCall,
}

impl TagKind {
    #[must_use]
    pub fn transition(self) -> Transition {
        match self {
            TagKind::ThinkOpen | TagKind::MalformedThinkOpen => Transition::EnterThinking,
            TagKind::ThinkClose
            | TagKind::FinalOpen
            | TagKind::FinalClose
            | TagKind::ReplyMarker => Transition::EnterText,
            TagKind::ToolCallOpen => Transition::EnterToolCall,
            TagKind::ToolCallClose => Transition::EndToolCall,
        }
    }
}

/// A complete tag located in the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
    pub kind: TagKind,
    /// Byte offset of the first tag byte.
    pub start: usize,
    /// Byte offset one past the last tag byte.
    pub end: usize,
    /// `id` attribute of `<tool_call>`, when present.
    pub tool_id: Option<String>,
    /// `name` attribute of `<tool_call>`.
    pub tool_name: Option<String>,
}

struct TagPattern {
    kind: TagKind,
    regex: Regex,
}

const TAG_SOURCES: &[(TagKind, &str)] = &[
    (TagKind::ThinkOpen, r"(?i)<(?:think(?:ing)?|thought)\b[^<>]*>"),
    (TagKind::ThinkClose, r"(?i)</(?:think(?:ing)?|thought)\b[^<>]*>"),
    (TagKind::FinalOpen, r"(?i)<final\b[^<>]*>"),
    (TagKind::FinalClose, r"(?i)</final\b[^<>]*>"),
    (
        TagKind::ToolCallOpen,
        r#"(?i)<tool_call\s+(?:id=['"]?([^'"]+)['"]?\s+)?name=['"]?([^'"]+)['"]?\s*>"#,
    ),
    (TagKind::ToolCallClose, r"(?i)</tool_call\b[^<>]*>"),
    (TagKind::ReplyMarker, r"(?i)\[\[reply_to_current\]\]"),
    (TagKind::MalformedThinkOpen, r"(?i)think\s*>"),
];

/// Declaration order breaks ties between matches at the same offset.
static TAG_TABLE: LazyLock<Vec<TagPattern>> = LazyLock::new(|| {
    TAG_SOURCES
        .iter()
        .filter_map(|&(kind, source)| {
            Regex::new(source)
                .ok()
                .map(|regex| TagPattern { kind, regex })
        })
        .collect()
});

/// The reply marker literal; a trailing prefix of it is held back like a partial tag.
pub const REPLY_MARKER: &str = "[[reply_to_current]]";

/// Find the recognized tag with the lowest start offset.
#[must_use]
pub fn find_earliest_tag(buffer: &str) -> Option<TagMatch> {
    let mut best: Option<(usize, &TagPattern, regex_lite::Captures<'_>)> = None;
    for entry in TAG_TABLE.iter() {
        let Some(caps) = entry.regex.captures(buffer) else {
            continue;
        };
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let is_earlier = best
            .as_ref()
            .map_or(true, |(start, _, _)| whole.start() < *start);
        if is_earlier {
            best = Some((whole.start(), entry, caps));
        }
    }

    let (_, entry, caps) = best?;
    let whole = caps.get(0)?;
    let (tool_id, tool_name) = if entry.kind == TagKind::ToolCallOpen {
        (
            caps.get(1).map(|m| m.as_str().to_string()),
            caps.get(2).map(|m| m.as_str().to_string()),
        )
    } else {
        (None, None)
    };
    Some(TagMatch {
        kind: entry.kind,
        start: whole.start(),
        end: whole.end(),
        tool_id,
        tool_name,
    })
}

/// Byte length of the buffer prefix that cannot belong to an incomplete tag.
///
/// Everything from the last `<` onward is withheld, as is a trailing partial
/// reply marker. A buffer without either is entirely safe.
#[must_use]
pub fn safe_prefix_len(buffer: &str) -> usize {
    let bytes = buffer.as_bytes();
    let mut hold = memchr::memrchr(b'<', bytes).unwrap_or(bytes.len());
    if let Some(start) = partial_reply_marker_start(bytes) {
        hold = hold.min(start);
    }
    hold
}

fn partial_reply_marker_start(bytes: &[u8]) -> Option<usize> {
    let marker = REPLY_MARKER.as_bytes();
    let longest = (marker.len() - 1).min(bytes.len());
    (1..=longest)
        .rev()
        .find(|&k| bytes[bytes.len() - k..].eq_ignore_ascii_case(&marker[..k]))
        .map(|k| bytes.len() - k)
}
