/// Vendor payload router.
///
/// Each payload line is parsed as JSON and handed to an ordered table of
/// shape matchers. The first matcher that recognizes the record extracts its
/// fragments; later matchers are not consulted. Order is significant: several
/// vendor schemas overlap (a `v` string may be reasoning or text depending on
/// the accompanying `p` path) and the table resolves that ambiguity.
use serde_json::Value;
use smallvec::SmallVec;

use super::canonical::RawDelta;

const SAMANTHA_CHUNK: i64 = 2001;
const SAMANTHA_END: i64 = 2003;

/// Everything one payload record contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutedPayload {
    /// Fragments in the order they appeared in the record.
    pub deltas: SmallVec<[RawDelta; 2]>,
    /// Search query echoed back by the provider, if any.
    pub search_query: Option<String>,
    /// Parent message pointer declared by this record.
    pub parent_message_id: Option<String>,
    /// The record is an explicit end-of-stream marker.
    pub end_of_stream: bool,
    /// Name of the matcher that claimed the record.
    pub matched_by: Option<&'static str>,
}

impl RoutedPayload {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
            && self.search_query.is_none()
            && self.parent_message_id.is_none()
            && !self.end_of_stream
    }
}

/// Inline notice injected when the provider reports a web search.
#[must_use]
pub fn search_notice(query: &str) -> String {
    format!("\n> [Researching: {query}...]\n")
}

type Matcher = fn(&Value, &mut RoutedPayload) -> bool;

/// Matchers in priority order.
const MATCHERS: &[(&str, Matcher)] = &[
    ("reasoning_marker", match_reasoning_marker),
    ("content_value", match_content_value),
    ("search_progress", match_search_progress),
    ("fragment_list", match_fragment_list),
    ("samantha_envelope", match_samantha_envelope),
    ("choice_delta", match_choice_delta),
];

/// Route one JSON payload.
///
/// Returns `None` when the text is not valid JSON.
#[must_use]
pub fn route_payload(json: &str) -> Option<RoutedPayload> {
    let value: Value = serde_json::from_str(json).ok()?;
    Some(route_value(&value))
}

/// Route an already-parsed payload record.
#[must_use]
pub fn route_value(value: &Value) -> RoutedPayload {
    let mut routed = RoutedPayload {
        parent_message_id: parent_message_id(value),
        ..RoutedPayload::default()
    };
    for (name, matcher) in MATCHERS {
        if matcher(value, &mut routed) {
            routed.matched_by = Some(name);
            break;
        }
    }
    routed
}

fn parent_message_id(value: &Value) -> Option<String> {
    match value.get("response_message_id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[inline]
fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

#[inline]
fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.is_empty())
}

fn match_reasoning_marker(value: &Value, out: &mut RoutedPayload) -> bool {
    let path = str_field(value, "p");
    let is_thinking_type = str_field(value, "type") == Some("thinking");
    if let Some(v) = str_field(value, "v") {
        if is_thinking_type || path.is_some_and(|p| p.contains("reasoning")) {
            out.deltas.push(RawDelta::thinking(v));
            return true;
        }
    }
    if is_thinking_type {
        if let Some(content) = str_field(value, "content") {
            out.deltas.push(RawDelta::thinking(content));
            return true;
        }
    }
    false
}

fn match_content_value(value: &Value, out: &mut RoutedPayload) -> bool {
    if let Some(v) = str_field(value, "v") {
        let on_content_path = match str_field(value, "p") {
            None | Some("") => true,
            Some(p) => p.contains("content") || p.contains("choices"),
        };
        if on_content_path {
            out.deltas.push(RawDelta::text(v));
            return true;
        }
    }
    if str_field(value, "type") == Some("text") {
        if let Some(content) = str_field(value, "content") {
            out.deltas.push(RawDelta::text(content));
            return true;
        }
    }
    false
}

fn match_search_progress(value: &Value, out: &mut RoutedPayload) -> bool {
    let is_search = str_field(value, "type") == Some("search_result")
        || str_field(value, "p").is_some_and(|p| p.contains("search_results"));
    if !is_search {
        return false;
    }
    let data = value
        .get("v")
        .filter(|v| is_truthy(v))
        .or_else(|| value.get("content"));
    let query = match data {
        Some(Value::String(query)) => Some(query.as_str()),
        Some(other) => str_field(other, "query"),
        None => None,
    };
    out.search_query = non_empty(query).map(ToOwned::to_owned);
    true
}

fn match_fragment_list(value: &Value, out: &mut RoutedPayload) -> bool {
    let Some(fragments) = value
        .get("v")
        .and_then(|v| v.get("response"))
        .and_then(|r| r.get("fragments"))
        .and_then(Value::as_array)
    else {
        return false;
    };
    for fragment in fragments {
        let content = non_empty(str_field(fragment, "content"));
        match str_field(fragment, "type") {
            Some("THINKING" | "reasoning") => {
                if let Some(content) = content {
                    out.deltas.push(RawDelta::thinking(content));
                }
            }
            _ => {
                if let Some(content) = content {
                    out.deltas.push(RawDelta::text(content));
                }
            }
        }
    }
    true
}

fn match_samantha_envelope(value: &Value, out: &mut RoutedPayload) -> bool {
    match value.get("event_type").and_then(Value::as_i64) {
        Some(SAMANTHA_CHUNK) => {
            if let Some(text) = str_field(value, "event_data").and_then(samantha_text) {
                out.deltas.push(RawDelta::text(text));
            }
            true
        }
        Some(SAMANTHA_END) => {
            out.end_of_stream = true;
            true
        }
        _ => false,
    }
}

/// `event_data` is a JSON string whose `message.content` is itself a JSON
/// string carrying `{ "text": ... }`.
fn samantha_text(event_data: &str) -> Option<String> {
    let event: Value = serde_json::from_str(event_data).ok()?;
    let content = event.get("message")?.get("content")?.as_str()?;
    let content: Value = serde_json::from_str(content).ok()?;
    non_empty(str_field(&content, "text")).map(ToOwned::to_owned)
}

fn match_choice_delta(value: &Value, out: &mut RoutedPayload) -> bool {
    let Some(choice) = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return false;
    };
    if let Some(delta) = choice.get("delta") {
        if let Some(reasoning) = non_empty(str_field(delta, "reasoning_content")) {
            out.deltas.push(RawDelta::thinking(reasoning));
        }
        if let Some(content) = non_empty(str_field(delta, "content")) {
            out.deltas.push(RawDelta::text(content));
        }
    }
    true
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
