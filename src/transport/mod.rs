use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::NormalizerError;
use crate::util::preview;

const ERROR_BODY_PREVIEW_CHARS: usize = 200;

/// Raw response body as delivered by the network, in arbitrary chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, NormalizerError>> + Send>>;

/// One outbound turn as the vendor client needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub session_id: String,
    pub parent_message_id: Option<String>,
    pub prompt: String,
    pub model: String,
    pub search_enabled: bool,
    pub preempt: bool,
    pub file_ids: Vec<String>,
}

/// The vendor web-chat client. Authentication, request bodies and headers
/// live behind this seam.
pub trait ChatTransport: Send + Sync {
    /// Open a new vendor-side conversation and return its id.
    fn create_session(&self) -> impl Future<Output = Result<String, NormalizerError>> + Send;

    /// Send one turn. `Ok(None)` means the vendor answered without a body.
    fn chat_completions(
        &self,
        request: CompletionRequest,
    ) -> impl Future<Output = Result<Option<ByteStream>, NormalizerError>> + Send;
}

/// Wrap any fallible chunk stream as a [`ByteStream`].
pub fn boxed_byte_stream<S, E>(stream: S) -> ByteStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<NormalizerError>,
{
    Box::pin(stream.map(|chunk| chunk.map_err(Into::into)))
}

/// Turn an HTTP response into the normalizer's input.
///
/// # Errors
///
/// Returns `NormalizerError::Upstream` for a non-success status, with a
/// preview of the body as the message.
pub async fn response_byte_stream(
    response: reqwest::Response,
) -> Result<ByteStream, NormalizerError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "upstream returned error status");
        return Err(NormalizerError::Upstream {
            status: status.as_u16(),
            message: preview(&body, ERROR_BODY_PREVIEW_CHARS),
        });
    }
    Ok(boxed_byte_stream(response.bytes_stream()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &'static str) -> reqwest::Response {
        let response = http::Response::builder()
            .status(status)
            .body(body)
            .unwrap();
        reqwest::Response::from(response)
    }

    #[tokio::test]
    async fn success_response_streams_body() {
        let mut stream = response_byte_stream(response(200, "data: {\"v\":\"hi\"}\n"))
            .await
            .unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"data: {\"v\":\"hi\"}\n");
    }

    #[tokio::test]
    async fn error_status_maps_to_upstream() {
        let err = match response_byte_stream(response(429, "rate limited\nslow down")).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        match err {
            NormalizerError::Upstream { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limited slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn boxed_stream_converts_errors() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(NormalizerError::Transport("reset".into())),
        ]);
        let items: Vec<_> = boxed_byte_stream(source).collect().await;
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(NormalizerError::Transport(_))));
    }
}
