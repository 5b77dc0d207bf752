//! # Completion API
//!
//! Talks to OpenAI-compatible `chat/completions` endpoints.
//!
//! The interesting part is [`CompletionBackend::stream_chat`]: one `POST` with
//! `"stream": true`, whose body is read incrementally and decoded from
//! newline-delimited `data: {json}` frames into plain text deltas:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Clock"}}]}
//! data: {"choices":[{"delta":{"content":" skew"}}]}
//! data: [DONE]
//! ```
//!
//! Decoding rules:
//! - bytes are buffered until a `\n`; the unterminated tail waits for the next read,
//! - the `[DONE]` sentinel is skipped, it is neither a delta nor an error,
//! - a frame that is not valid JSON is logged and skipped, never fatal,
//! - empty deltas are never yielded.
//!
//! Cancellation is checked before every yielded delta and raced against every
//! read. Once the token fires the stream simply ends; dropping it drops the
//! response body and with it the connection.
//!
//! Non-success responses are classified by [`classify_error_response`].

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{collections::VecDeque, fmt::Display};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    error::{HomieError, Result},
    message::{Message, Role},
    registry::ModelConfig,
};

/// Lazily produced text deltas of one streamed completion. Single pass.
pub type DeltaStream = BoxStream<'static, Result<String>>;

/// Anything that can stream a completion for a wire message list.
///
/// [`CompletionClient`] is the HTTP implementation; tests substitute scripted ones.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send `wire` to the backend described by `model` and return its deltas.
    ///
    /// Errors returned here happen before any delta: the request failed or the
    /// provider answered with a non-success status.
    async fn stream_chat(
        &self,
        wire: &[Message],
        model: &ModelConfig,
        cancel: CancellationToken,
    ) -> Result<DeltaStream>;
}

#[derive(Serialize, Debug)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(wire: &'a [Message], model: &'a ModelConfig, stream: bool) -> Self {
        Self {
            model: &model.model,
            messages: wire
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
            temperature: model.temperature,
            max_tokens: model.max_tokens,
            stream,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize, Debug)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize, Debug)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChatCompletion {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize, Debug)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize, Debug)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ModelList {
    data: Vec<ModelListEntry>,
}

#[derive(Deserialize, Debug)]
struct ModelListEntry {
    id: String,
}

/// One decoded line of the incremental response.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    /// A non-empty text fragment.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Blank line, comment, keep-alive, empty delta, or garbage.
    Ignored,
}

/// Decode a single line of the event stream.
pub fn parse_frame(line: &str) -> Frame {
    let Some(payload) = line.strip_prefix("data:") else {
        return Frame::Ignored;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload == "[DONE]" {
        return Frame::Done;
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => match chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
        {
            Some(content) if !content.is_empty() => Frame::Delta(content),
            _ => Frame::Ignored,
        },
        Err(err) => {
            warn!("Error parsing SSE data: {} ({:?})", err, payload);
            Frame::Ignored
        }
    }
}

/// Splits raw body bytes into complete lines, holding the partial tail.
///
/// Lines are decoded only once complete, so a multi-byte character split across
/// two reads is never mangled.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line[..pos]));
        }
        lines
    }

    /// Whatever is left once the body ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_suffix('\r').unwrap_or(&*text).to_string()
}

struct SseState<S> {
    body: S,
    lines: LineBuffer,
    pending: VecDeque<String>,
    cancel: CancellationToken,
    finished: bool,
}

impl<S> SseState<S> {
    fn enqueue(&mut self, line: &str) {
        if let Frame::Delta(delta) = parse_frame(line) {
            self.pending.push_back(delta);
        }
    }
}

/// Turn a byte stream of `data:` frames into a [`DeltaStream`].
///
/// A transport error ends the stream with [`HomieError::Stream`], unless the
/// token was already cancelled, in which case the stream just ends.
pub fn decode_sse<S, E>(body: S, cancel: CancellationToken) -> DeltaStream
where
    S: Stream<Item = std::result::Result<Vec<u8>, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let state = SseState {
        body,
        lines: LineBuffer::default(),
        pending: VecDeque::new(),
        cancel,
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.cancel.is_cancelled() {
                debug!("Stream cancelled");
                return None;
            }
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.finished {
                return None;
            }

            let next = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => {
                    debug!("Stream cancelled during read");
                    return None;
                }
                next = state.body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for line in state.lines.push(&chunk) {
                        state.enqueue(&line);
                    }
                }
                Some(Err(err)) => {
                    if state.cancel.is_cancelled() {
                        return None;
                    }
                    error!("Streaming error: {}", err);
                    state.finished = true;
                    return Some((Err(HomieError::Stream(err.to_string())), state));
                }
                None => {
                    if let Some(line) = state.lines.finish() {
                        state.enqueue(&line);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

const CONTEXT_OVERFLOW_HINTS: [&str; 5] =
    ["token", "context length", "too long", "maximum", "exceeds"];

/// Best-effort guess that a provider message complains about input length.
///
/// Phrasing differs between providers, so a `false` here proves nothing.
pub fn looks_like_context_overflow(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CONTEXT_OVERFLOW_HINTS
        .iter()
        .any(|hint| lowered.contains(hint))
}

/// Map a non-success response to [`HomieError::ContextTooLarge`] or [`HomieError::Provider`].
///
/// The provider message is read from `error.message`, `error` (when a string),
/// `message` or `detail`, in that order. Without one, the status code is reported.
pub fn classify_error_response(status: u16, body: &str) -> HomieError {
    let message = serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(JsonValue::as_str)
                .or_else(|| value.get("error").and_then(JsonValue::as_str))
                .or_else(|| value.get("message").and_then(JsonValue::as_str))
                .or_else(|| value.get("detail").and_then(JsonValue::as_str))
                .map(str::to_string)
        })
        .filter(|message| !message.trim().is_empty());

    match message {
        Some(message) if looks_like_context_overflow(&message) => {
            HomieError::ContextTooLarge { message }
        }
        Some(message) => HomieError::Provider { status, message },
        None => HomieError::Provider {
            status,
            message: format!("HTTP error! status: {status}"),
        },
    }
}

/// HTTP client for OpenAI-compatible endpoints.
///
/// No request timeout is configured: long generations are ended by cancelling,
/// not by a deadline.
#[derive(Debug, Clone, Default)]
pub struct CompletionClient {
    http: reqwest::Client,
}

impl CompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn chat_request(
        &self,
        wire: &[Message],
        model: &ModelConfig,
        stream: bool,
    ) -> reqwest::RequestBuilder {
        let body = ChatRequest::new(wire, model, stream);
        debug!(
            "Sending {} messages to {} (model {}, stream {})",
            body.messages.len(),
            model.endpoint,
            model.model,
            stream
        );
        self.http
            .post(format!("{}/chat/completions", model.endpoint))
            .bearer_auth(&model.api_key)
            .json(&body)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let err = classify_error_response(status, &body);
        error!("Completion request failed with status {}: {}", status, err);
        Err(err)
    }

    /// One non-streaming completion; returns the first choice's content.
    pub async fn complete(&self, wire: &[Message], model: &ModelConfig) -> Result<String> {
        let response = Self::check(self.chat_request(wire, model, false).send().await?).await?;
        let completion: ChatCompletion = response.json().await?;
        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    /// Ids of the models the endpoint offers (`GET {endpoint}/models`).
    pub async fn list_remote_models(&self, model: &ModelConfig) -> Result<Vec<String>> {
        let response = self
            .http
            .get(format!("{}/models", model.endpoint))
            .bearer_auth(&model.api_key)
            .send()
            .await?;
        let list: ModelList = Self::check(response).await?.json().await?;
        Ok(list.data.into_iter().map(|entry| entry.id).collect())
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn stream_chat(
        &self,
        wire: &[Message],
        model: &ModelConfig,
        cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        let request = self.chat_request(wire, model, true);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Request cancelled before a response arrived");
                return Ok(futures::stream::empty().boxed());
            }
            response = request.send() => response?,
        };

        let response = Self::check(response).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(decode_sse(body, cancel))
    }
}
