//! Completion Provider Module
//!
//! The upstream completion API behind a trait seam: an HTTP implementation
//! speaking the OpenAI-style chat completions protocol, and a mock used in
//! tests and mock mode.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::relay::usage::{estimate_tokens, TokenUsage};

// == Request / Response ==
/// Parameters for one completion call, streaming or not.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub message: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Resolved credential (per-user stored key, else environment default)
    pub api_key: Option<String>,
}

/// Full result of a non-streaming call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    /// Provider-reported usage, normalized through the canonical adapter
    pub usage: TokenUsage,
}

/// Incremental text deltas from a streaming call.
pub type ChunkStream = BoxStream<'static, Result<String>>;

// == Provider Trait ==
/// The upstream completion API, consumed as an opaque contract.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Performs a synchronous completion call, returning the full text and
    /// provider-reported usage.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Opens a streaming completion call, yielding incremental text deltas.
    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream>;
}

// == HTTP Provider ==
/// OpenAI-style chat completions over HTTP, streaming via SSE.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    /// Environment-default credential, used when the request carries none
    default_api_key: Option<String>,
}

impl HttpProvider {
    /// Creates a provider against the given API base URL.
    pub fn new(base_url: impl Into<String>, default_api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            default_api_key,
        }
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.message },
            ],
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&self.request_body(request, stream));

        if let Some(key) = request.api_key.as_ref().or(self.default_api_key.as_ref()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| GatewayError::Upstream(err.to_string()))?;

        map_status(response)
    }
}

/// Maps upstream HTTP status codes onto the error taxonomy.
fn map_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        401 | 403 => Err(GatewayError::UpstreamAuth),
        429 => Err(GatewayError::UpstreamRateLimited),
        s if s >= 500 => Err(GatewayError::UpstreamServer(format!("status {}", s))),
        s => Err(GatewayError::Upstream(format!("status {}", s))),
    }
}

#[async_trait]
impl CompletionProvider for HttpProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let response = self.send(request, false).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|err| GatewayError::Upstream(err.to_string()))?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let usage = body
            .get("usage")
            .map(TokenUsage::from_provider_json)
            .unwrap_or_default();

        Ok(CompletionResponse { content, usage })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        let response = self.send(request, true).await?;
        debug!(model = %request.model, "Upstream stream opened");

        Ok(sse_delta_stream(response.bytes_stream().boxed()))
    }
}

// == SSE Parsing ==
struct SseState {
    inner: BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

/// Turns an SSE byte stream into a stream of content deltas.
///
/// Lines arrive as `data: {json}` events terminated by a `data: [DONE]`
/// sentinel; events may be split across or coalesced within transport
/// chunks, so a line buffer is maintained. The buffer holds raw bytes and
/// decoding happens per complete line, so a multi-byte code point split
/// across transport frames survives intact.
fn sse_delta_stream(inner: BoxStream<'static, reqwest::Result<bytes::Bytes>>) -> ChunkStream {
    let state = SseState {
        inner,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.done {
                return None;
            }

            match state.inner.next().await {
                None => {
                    state.done = true;
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(GatewayError::Upstream(err.to_string())), state));
                }
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    while let Some(pos) = state.buffer.iter().position(|&b| b == b'\n') {
                        let line_bytes: Vec<u8> = state.buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line_bytes);
                        let line = line.trim();
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();
                        if data == "[DONE]" {
                            state.done = true;
                            break;
                        }
                        if let Ok(event) = serde_json::from_str::<Value>(data) {
                            if let Some(delta) = event["choices"][0]["delta"]["content"].as_str() {
                                if !delta.is_empty() {
                                    state.pending.push_back(delta.to_string());
                                }
                            }
                        }
                    }
                }
            }
        }
    })
    .boxed()
}

// == Mock Provider ==
/// Scripted upstream behavior for tests and mock mode.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Yield these deltas, then finish
    Chunks(Vec<String>),
    /// Fail before any chunk is produced
    FailBeforeStream(String),
    /// Open the stream but never yield a chunk
    Stall,
}

/// In-process stand-in for the upstream provider.
pub struct MockProvider {
    behavior: MockBehavior,
}

impl MockProvider {
    /// Creates a mock yielding the given deltas.
    pub fn new(chunks: Vec<String>) -> Self {
        Self {
            behavior: MockBehavior::Chunks(chunks),
        }
    }

    /// Default canned completion for mock mode.
    pub fn canned() -> Self {
        Self::new(vec![
            "This is a mock completion ".to_string(),
            "served without an upstream credential. ".to_string(),
            "Set MOCK_COMPLETIONS=0 to call the real provider.".to_string(),
        ])
    }

    /// Creates a mock with explicit behavior.
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self { behavior }
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        match &self.behavior {
            MockBehavior::Chunks(chunks) => {
                let content: String = chunks.concat();
                let prompt = format!("{}{}", request.system_prompt, request.message);
                let usage = TokenUsage::new(estimate_tokens(&prompt), estimate_tokens(&content));
                Ok(CompletionResponse { content, usage })
            }
            MockBehavior::FailBeforeStream(message) => {
                Err(GatewayError::Upstream(message.clone()))
            }
            MockBehavior::Stall => Err(GatewayError::Upstream("mock stall".to_string())),
        }
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<ChunkStream> {
        match &self.behavior {
            MockBehavior::Chunks(chunks) => {
                let deltas: Vec<Result<String>> = chunks.iter().cloned().map(Ok).collect();
                Ok(futures_util::stream::iter(deltas).boxed())
            }
            MockBehavior::FailBeforeStream(message) => {
                Err(GatewayError::Upstream(message.clone()))
            }
            MockBehavior::Stall => Ok(futures_util::stream::pending().boxed()),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".to_string(),
            system_prompt: "You are helpful.".to_string(),
            message: "Hello".to_string(),
            temperature: None,
            max_tokens: None,
            api_key: None,
        }
    }

    #[tokio::test]
    async fn test_mock_complete_concatenates_chunks() {
        let provider = MockProvider::new(vec!["Hello".to_string(), " world".to_string()]);
        let response = provider.complete(&request()).await.unwrap();
        assert_eq!(response.content, "Hello world");
        assert!(response.usage.completion_tokens > 0);
    }

    #[tokio::test]
    async fn test_mock_stream_yields_in_order() {
        let provider = MockProvider::new(vec!["a".to_string(), "b".to_string()]);
        let mut stream = provider.stream(&request()).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert_eq!(stream.next().await.unwrap().unwrap(), "b");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_fail_before_stream() {
        let provider =
            MockProvider::with_behavior(MockBehavior::FailBeforeStream("down".to_string()));
        assert!(matches!(
            provider.stream(&request()).await,
            Err(GatewayError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_sse_delta_stream_parses_events() {
        let frames: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
            )),
            // one event split across two frames plus a coalesced pair
            Ok(bytes::Bytes::from("data: {\"choices\":[{\"delta\":")),
            Ok(bytes::Bytes::from(
                "{\"content\":\"lo\"}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"!\"}}]}\ndata: [DONE]\n",
            )),
        ];
        let mut stream = sse_delta_stream(futures_util::stream::iter(frames).boxed());

        let mut collected = Vec::new();
        while let Some(delta) = stream.next().await {
            collected.push(delta.unwrap());
        }
        assert_eq!(collected, vec!["Hel", "lo", "!"]);
    }

    #[tokio::test]
    async fn test_sse_delta_stream_reassembles_split_code_points() {
        // the two-byte encoding of 'é' straddles the frame boundary
        let frames: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"caf\xC3",
            )),
            Ok(bytes::Bytes::from_static(b"\xA9\"}}]}\ndata: [DONE]\n")),
        ];
        let mut stream = sse_delta_stream(futures_util::stream::iter(frames).boxed());

        assert_eq!(stream.next().await.unwrap().unwrap(), "caf\u{e9}");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_sse_delta_stream_ignores_non_data_lines() {
        let frames: Vec<reqwest::Result<bytes::Bytes>> = vec![Ok(bytes::Bytes::from(
            ": keepalive\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\ndata: [DONE]\n",
        ))];
        let mut stream = sse_delta_stream(futures_util::stream::iter(frames).boxed());

        assert_eq!(stream.next().await.unwrap().unwrap(), "x");
        assert!(stream.next().await.is_none());
    }
}
