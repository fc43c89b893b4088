pub mod blocks;
pub mod sse;

pub use blocks::{parse_tool_arguments, BlockTracker, StreamStats};
pub use sse::{classify_line, ControlField, FrameLine, LineReassembler};

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::AppConfig;
use crate::error::NormalizerError;
use crate::observability::log_stream_complete;
use crate::protocol::canonical::{AssistantMessage, ModelRef, StopReason, StreamEvent};
use crate::protocol::{requires_reasoning_tags, route_payload, search_notice};
use crate::state::SessionStore;
use crate::tags::{Segment, TagSegmenter};
use crate::transport::ByteStream;

/// Push side of the normalized event channel.
pub type EventSink = mpsc::UnboundedSender<StreamEvent>;

/// Per-stream settings, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct NormalizerOptions {
    pub model: ModelRef,
    pub junk_tokens: Vec<String>,
    pub internal_tools: Vec<String>,
    pub max_consecutive_malformed_lines: Option<usize>,
    /// Scan the text channel for inline markup.
    pub scan_tags: bool,
}

impl NormalizerOptions {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: ModelRef::new(config.provider.as_str(), config.model.as_str()),
            junk_tokens: config.stream.junk_tokens.clone(),
            internal_tools: config.stream.internal_tools.clone(),
            max_consecutive_malformed_lines: config.stream.max_consecutive_malformed_lines,
            scan_tags: requires_reasoning_tags(Some(&config.provider)),
        }
    }
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

struct SessionBinding {
    store: Arc<SessionStore>,
    key: String,
}

/// How a normalized stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    pub stop_reason: StopReason,
    pub stats: StreamStats,
    pub malformed_lines: usize,
}

/// Synchronous core: bytes in, events out.
///
/// Owns every piece of per-stream state; one instance per response body.
pub struct StreamNormalizer {
    lines: LineReassembler,
    segmenter: TagSegmenter,
    blocks: BlockTracker,
    session: Option<SessionBinding>,
    internal_tools: Vec<String>,
    max_malformed: Option<usize>,
    consecutive_malformed: usize,
    malformed_total: usize,
    line_buf: Vec<String>,
    segment_buf: Vec<Segment>,
}

impl StreamNormalizer {
    #[must_use]
    pub fn new(options: NormalizerOptions) -> Self {
        let segmenter = if options.scan_tags {
            TagSegmenter::new(options.junk_tokens)
        } else {
            TagSegmenter::passthrough(options.junk_tokens)
        };
        Self {
            lines: LineReassembler::new(),
            segmenter,
            blocks: BlockTracker::new(options.model),
            session: None,
            internal_tools: options.internal_tools,
            max_malformed: options.max_consecutive_malformed_lines,
            consecutive_malformed: 0,
            malformed_total: 0,
            line_buf: Vec::new(),
            segment_buf: Vec::new(),
        }
    }

    /// Record parent ids declared by the response under `key`.
    #[must_use]
    pub fn with_session(mut self, store: Arc<SessionStore>, key: impl Into<String>) -> Self {
        self.session = Some(SessionBinding {
            store,
            key: key.into(),
        });
        self
    }

    #[must_use]
    pub fn model(&self) -> &ModelRef {
        self.blocks.model()
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.blocks.stats()
    }

    #[must_use]
    pub fn malformed_lines(&self) -> usize {
        self.malformed_total
    }

    /// Feed one network chunk.
    ///
    /// # Errors
    ///
    /// Returns `NormalizerError::ProtocolDrift` once more consecutive payload
    /// lines than the configured limit failed to parse.
    pub fn feed(
        &mut self,
        chunk: &[u8],
        out: &mut Vec<StreamEvent>,
    ) -> Result<(), NormalizerError> {
        let mut lines = std::mem::take(&mut self.line_buf);
        self.lines.feed_into(chunk, &mut lines);
        let mut result = Ok(());
        for line in lines.drain(..) {
            if let Err(err) = self.process_line(&line, out) {
                result = Err(err);
                break;
            }
        }
        lines.clear();
        self.line_buf = lines;
        result
    }

    /// Handle one complete line.
    ///
    /// # Errors
    ///
    /// See [`StreamNormalizer::feed`].
    pub fn process_line(
        &mut self,
        line: &str,
        out: &mut Vec<StreamEvent>,
    ) -> Result<(), NormalizerError> {
        let json = match classify_line(line) {
            FrameLine::Payload(json) => json,
            FrameLine::Control { field, value } => {
                trace!(?field, value = value.as_str(), "control line");
                return Ok(());
            }
            FrameLine::Ignorable => return Ok(()),
        };

        let Some(routed) = route_payload(&json) else {
            return self.note_malformed(&json);
        };
        self.consecutive_malformed = 0;

        if let Some(parent) = routed.parent_message_id.as_deref() {
            if let Some(binding) = &self.session {
                if binding.store.record_parent(&binding.key, parent) {
                    debug!(key = binding.key.as_str(), parent, "parent message id updated");
                }
            }
        }
        if routed.end_of_stream {
            debug!("provider signalled end of stream");
        }

        if let Some(query) = routed.search_query.as_deref() {
            self.segmenter
                .push_notice(&search_notice(query), &mut self.segment_buf);
        }
        for delta in &routed.deltas {
            self.segmenter.push(delta, &mut self.segment_buf);
        }
        self.drain_segments(out);
        Ok(())
    }

    fn note_malformed(&mut self, json: &str) -> Result<(), NormalizerError> {
        self.consecutive_malformed += 1;
        self.malformed_total += 1;
        trace!(
            line = crate::util::preview(json, 80).as_str(),
            "skipping unparseable payload line"
        );
        match self.max_malformed {
            Some(limit) if self.consecutive_malformed > limit => {
                warn!(
                    count = self.consecutive_malformed,
                    limit, "too many consecutive unparseable payload lines"
                );
                Err(NormalizerError::ProtocolDrift {
                    count: self.consecutive_malformed,
                })
            }
            _ => Ok(()),
        }
    }

    fn drain_segments(&mut self, out: &mut Vec<StreamEvent>) {
        for segment in self.segment_buf.drain(..) {
            self.blocks.apply(segment, out);
        }
    }

    /// Release everything still buffered: the unterminated last line, then
    /// the withheld tag tail under the current mode.
    ///
    /// The last line is processed even when it breaches the malformed-line
    /// limit; the stream is ending anyway.
    pub fn flush(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some(line) = self.lines.flush() {
            let _ = self.process_line(&line, out);
        }
        self.segmenter.finish(&mut self.segment_buf);
        self.drain_segments(out);
    }

    /// Flush and build the `done` event.
    pub fn finish(&mut self, out: &mut Vec<StreamEvent>) -> AssistantMessage {
        self.flush(out);
        let message = self.blocks.finish(&self.internal_tools);
        out.push(StreamEvent::Done {
            reason: message.stop_reason,
            message: message.clone(),
        });
        message
    }

    /// Flush and build the `error` event for `err`.
    pub fn fail(&mut self, err: &NormalizerError, out: &mut Vec<StreamEvent>) -> StopReason {
        self.flush(out);
        let event = error_event(self.blocks.model(), err);
        let stop_reason = match &event {
            StreamEvent::Error { error, .. } => error.stop_reason,
            _ => StopReason::Error,
        };
        out.push(event);
        stop_reason
    }
}

/// The single terminal event for a failed turn.
#[must_use]
pub fn error_event(model: &ModelRef, err: &NormalizerError) -> StreamEvent {
    let stop_reason = if err.is_aborted() {
        StopReason::Aborted
    } else {
        StopReason::Error
    };
    let message = err.to_string();
    StreamEvent::Error {
        error: AssistantMessage::error_record(model, stop_reason, message.clone()),
        message,
    }
}

/// Send buffered events. Returns false once the consumer has gone away.
fn forward(events: &mut Vec<StreamEvent>, sink: &EventSink) -> bool {
    for event in events.drain(..) {
        if sink.send(event).is_err() {
            return false;
        }
    }
    true
}

/// Drive `body` to completion, pushing events into `sink`.
///
/// Exactly one terminal event (`done` or `error`) is sent. A cancelled turn
/// or a body that fails midway still flushes what was buffered first.
pub async fn normalize_byte_stream(
    mut normalizer: StreamNormalizer,
    mut body: ByteStream,
    cancel: CancellationToken,
    sink: &EventSink,
) -> StreamOutcome {
    let started = Instant::now();
    let mut events = Vec::with_capacity(8);

    let failure = loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => break Some(NormalizerError::Aborted),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break None;
        };
        let step = chunk.and_then(|bytes| normalizer.feed(&bytes, &mut events));
        if !forward(&mut events, sink) {
            debug!("event consumer dropped, stopping read");
            break Some(NormalizerError::Aborted);
        }
        if let Err(err) = step {
            break Some(err);
        }
    };

    let stop_reason = match failure {
        None => normalizer.finish(&mut events).stop_reason,
        Some(err) => {
            if !err.is_aborted() {
                warn!(error = %err, "stream failed");
            }
            normalizer.fail(&err, &mut events)
        }
    };
    forward(&mut events, sink);

    let outcome = StreamOutcome {
        stop_reason,
        stats: normalizer.stats(),
        malformed_lines: normalizer.malformed_lines(),
    };
    log_stream_complete(normalizer.model(), &outcome, started);
    outcome
}

#[cfg(test)]
#[path = "normalizer_tests.rs"]
mod tests;
