pub mod prompt;

pub use prompt::{build_prompt, ChatContext, ChatMessage, MessageContent, ToolSpec};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::NormalizerError;
use crate::protocol::canonical::{StopReason, StreamEvent};
use crate::state::SessionStore;
use crate::stream::{
    error_event, normalize_byte_stream, EventSink, NormalizerOptions, StreamNormalizer,
    StreamOutcome, StreamStats,
};
use crate::transport::{ByteStream, ChatTransport, CompletionRequest};
use crate::util::preview;

const DEFAULT_SESSION_KEY: &str = "default";

/// Per-turn overrides of the configured feature flags.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Caller-side conversation key; `"default"` when empty.
    pub session_key: Option<String>,
    pub signal: Option<CancellationToken>,
    pub search_enabled: Option<bool>,
    pub preempt: Option<bool>,
    pub file_ids: Option<Vec<String>>,
}

/// Drives one assistant turn per call against a vendor transport.
///
/// Cloning is cheap; clones share the transport and the session store.
pub struct TurnRunner<T> {
    transport: Arc<T>,
    sessions: Arc<SessionStore>,
    config: Arc<AppConfig>,
}

impl<T> Clone for TurnRunner<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            sessions: Arc::clone(&self.sessions),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: ChatTransport + 'static> TurnRunner<T> {
    #[must_use]
    pub fn new(transport: T, config: AppConfig) -> Self {
        Self::with_sessions(Arc::new(transport), config, Arc::new(SessionStore::new()))
    }

    /// Build a runner over an existing session store.
    #[must_use]
    pub fn with_sessions(
        transport: Arc<T>,
        config: AppConfig,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            transport,
            sessions,
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Start a turn on its own task and return the event receiver.
    ///
    /// The channel yields exactly one terminal event and then closes.
    pub fn stream_turn(
        &self,
        context: ChatContext,
        options: TurnOptions,
    ) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = self.clone();
        tokio::spawn(async move {
            runner.run_turn(context, options, &tx).await;
        });
        rx
    }

    /// Run a turn on the current task, pushing events into `sink`.
    pub async fn run_turn(
        &self,
        context: ChatContext,
        options: TurnOptions,
        sink: &EventSink,
    ) -> StreamOutcome {
        let normalizer_options = NormalizerOptions::from_config(&self.config);
        let model = normalizer_options.model.clone();
        let session_key = options
            .session_key
            .clone()
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_KEY.to_string());
        let cancel = options.signal.clone().unwrap_or_default();

        info!(
            provider = model.provider.as_str(),
            model = model.id.as_str(),
            session_key = session_key.as_str(),
            messages = context.messages.len(),
            tools = context.tools.len(),
            "turn started"
        );

        let body = match self.open_body(&session_key, &context, &options, &cancel).await {
            Ok(body) => body,
            Err(err) => {
                if !err.is_aborted() {
                    warn!(error = %err, "turn setup failed");
                }
                let stop_reason = if err.is_aborted() {
                    StopReason::Aborted
                } else {
                    StopReason::Error
                };
                let _ = sink.send(error_event(&model, &err));
                return StreamOutcome {
                    stop_reason,
                    stats: StreamStats::default(),
                    malformed_lines: 0,
                };
            }
        };

        let normalizer = StreamNormalizer::new(normalizer_options)
            .with_session(Arc::clone(&self.sessions), session_key);
        normalize_byte_stream(normalizer, body, cancel, sink).await
    }

    async fn open_body(
        &self,
        session_key: &str,
        context: &ChatContext,
        options: &TurnOptions,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, NormalizerError> {
        let snapshot = self.sessions.get(session_key);
        let (session_id, parent_message_id) = match snapshot.vendor_session_id {
            Some(session_id) => (session_id, snapshot.parent_message_id),
            None => {
                let session_id = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(NormalizerError::Aborted),
                    created = self.transport.create_session() => created?,
                };
                self.sessions.record_new_session(session_key, &session_id);
                (session_id, None)
            }
        };

        let prompt = build_prompt(context, parent_message_id.is_some())?;
        debug!(
            session_id = session_id.as_str(),
            parent = parent_message_id.as_deref().unwrap_or(""),
            prompt_chars = prompt.chars().count(),
            preview = preview(&prompt, 120).as_str(),
            "sending prompt"
        );

        let features = &self.config.features;
        let request = CompletionRequest {
            session_id,
            parent_message_id,
            prompt,
            model: self.config.model.clone(),
            search_enabled: options.search_enabled.unwrap_or(features.search_enabled),
            preempt: options.preempt.unwrap_or(features.preempt),
            file_ids: options
                .file_ids
                .clone()
                .unwrap_or_else(|| features.file_ids.clone()),
        };

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(NormalizerError::Aborted),
            body = self.transport.chat_completions(request) => body?,
        };
        body.ok_or_else(|| NormalizerError::EmptyBody {
            provider: self.config.provider.clone(),
        })
    }
}
