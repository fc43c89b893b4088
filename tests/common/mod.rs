#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use webchat_stream::error::NormalizerError;
use webchat_stream::protocol::canonical::{AssistantMessage, StreamEvent};
use webchat_stream::transport::{ByteStream, ChatTransport, CompletionRequest};

/// What the scripted transport answers for one turn.
pub enum Reply {
    Chunks(Vec<&'static str>),
    NoBody,
    Fail(NormalizerError),
}

/// Transport double: replays scripted bodies and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
    sessions_created: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }
}

impl ChatTransport for ScriptedTransport {
    async fn create_session(&self) -> Result<String, NormalizerError> {
        let n = self.sessions_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("vendor-session-{n}"))
    }

    async fn chat_completions(
        &self,
        request: CompletionRequest,
    ) -> Result<Option<ByteStream>, NormalizerError> {
        self.requests.lock().push(request);
        let reply = self.replies.lock().pop_front().unwrap_or(Reply::NoBody);
        match reply {
            Reply::Chunks(chunks) => {
                let items: Vec<Result<Bytes, NormalizerError>> = chunks
                    .into_iter()
                    .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                    .collect();
                let stream: ByteStream = Box::pin(futures_util::stream::iter(items));
                Ok(Some(stream))
            }
            Reply::NoBody => Ok(None),
            Reply::Fail(err) => Err(err),
        }
    }
}

pub async fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn done_message(events: &[StreamEvent]) -> &AssistantMessage {
    match events.last() {
        Some(StreamEvent::Done { message, .. }) => message,
        other => panic!("expected done as last event, got {other:?}"),
    }
}
