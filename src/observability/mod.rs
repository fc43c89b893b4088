use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::protocol::canonical::ModelRef;
use crate::stream::StreamOutcome;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, WARN, ERROR)
pub fn init_tracing(log_level: &str) {
    let Some(directive) = filter_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    // Events go to stderr; stdout carries the replayed event stream.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

fn filter_directive(log_level: &str) -> Option<String> {
    let level = log_level.trim().to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Log the tallies of a finished stream.
pub fn log_stream_complete(model: &ModelRef, outcome: &StreamOutcome, started: Instant) {
    info!(
        provider = model.provider.as_str(),
        model = model.id.as_str(),
        stop_reason = ?outcome.stop_reason,
        content_chars = outcome.stats.content_chars,
        reasoning_chars = outcome.stats.reasoning_chars,
        tool_calls = outcome.stats.tool_calls,
        malformed_lines = outcome.malformed_lines,
        duration_seconds = started.elapsed().as_secs_f64(),
        "stream completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_aliases_map_to_tracing_levels() {
        assert_eq!(filter_directive("warning").as_deref(), Some("WARN"));
        assert_eq!(filter_directive("CRITICAL").as_deref(), Some("ERROR"));
        assert_eq!(filter_directive(" debug ").as_deref(), Some("DEBUG"));
        assert_eq!(filter_directive("DISABLED"), None);
    }
}
