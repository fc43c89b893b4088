pub mod canonical;
pub mod router;

pub use router::{route_payload, route_value, search_notice, RoutedPayload};

/// Returns true if the provider inlines reasoning and tool calls as markup
/// (`<think>`, `<final>`, `<tool_call>`) in the text stream instead of using
/// structured fields.
///
/// Ollama is deliberately absent: its OpenAI-compatible endpoint reports
/// reasoning through native fields, and forcing tag parsing there swallows
/// the whole answer.
#[must_use]
pub fn requires_reasoning_tags(provider: Option<&str>) -> bool {
    let Some(provider) = provider else {
        return false;
    };
    let normalized = provider.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }

    if normalized == "google-gemini-cli" || normalized == "google-generative-ai" {
        return true;
    }

    ["google-antigravity", "minimax", "deepseek-web"]
        .iter()
        .any(|needle| normalized.contains(needle))
}
