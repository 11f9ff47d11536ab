//! Streaming chat relay.
//!
//! Composes a system/user message pair (optionally carrying stored document
//! text), calls the upstream chat-completion API in streaming mode and
//! re-emits the assistant text deltas as a raw byte stream.
//!
//! # Re-framing
//!
//! The upstream answers with line-delimited `data: <json>` events terminated
//! by `data: [DONE]`. [`StreamReframer`] buffers partial lines across chunk
//! boundaries and yields only `choices[0].delta.content` strings, in arrival
//! order. A line that fails to parse is logged and skipped; it never ends
//! the stream.
//!
//! # Lifecycle
//!
//! [`ChatRelay::open`] returns once the upstream has answered with a success
//! status. The server then pulls the first delta before committing response
//! headers, so failures up to that point still produce a JSON error. After
//! that, failures can only truncate the body. Dropping a [`DeltaStream`]
//! (for example when the client disconnects) drops the upstream response and
//! closes its connection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::UpstreamConfig;
use crate::models::ChatTurn;
use crate::store::DocumentStore;

pub const DOCUMENT_START_MARKER: &str = "---DOCUMENT CONTENT---";
pub const DOCUMENT_END_MARKER: &str = "---END DOCUMENT CONTENT---";

const ASSISTANT_PREAMBLE: &str = "You are a helpful AI assistant.";

const DATA_PREFIX: &str = "data: ";
const DONE_PAYLOAD: &str = "[DONE]";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("upstream returned {status}: {body}")]
    UpstreamError { status: u16, body: String },
    #[error("upstream sent nothing for {0:?}")]
    UpstreamTimeout(Duration),
}

/// Builds the two messages sent upstream. With `document_text`, the system
/// message carries it between the fixed markers.
pub fn compose_messages(user_message: &str, document_text: Option<&str>) -> [ChatTurn; 2] {
    let system = match document_text {
        Some(text) => format!(
            "{ASSISTANT_PREAMBLE} The user has uploaded a document. Here is the content of the document:\n\n\
             {DOCUMENT_START_MARKER}\n{text}\n{DOCUMENT_END_MARKER}\n\n\
             Please answer questions based on this document content. If the user asks questions about the document, refer to the content above."
        ),
        None => ASSISTANT_PREAMBLE.to_string(),
    };
    [ChatTurn::system(system), ChatTurn::user(user_message)]
}

// ============ Re-framing ============

/// Partial view of one streamed completion chunk. Only the fields the relay
/// reads are modelled; everything else is ignored.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Output of feeding one chunk to the reframer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reframed {
    pub deltas: Vec<String>,
    /// `[DONE]` was seen; nothing further will be produced.
    pub done: bool,
}

/// Incremental `data:` line parser.
///
/// Buffers raw bytes so multi-byte UTF-8 sequences split across chunks are
/// decoded intact.
#[derive(Debug, Default)]
pub struct StreamReframer {
    pending: Vec<u8>,
    done: bool,
    malformed_lines: usize,
}

impl StreamReframer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Reframed {
        let mut out = Reframed::default();
        if self.done {
            out.done = true;
            return out;
        }
        self.pending.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(pos) = self.pending[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + pos;
            let line = String::from_utf8_lossy(&self.pending[consumed..end]).into_owned();
            consumed = end + 1;
            if self.process_line(&line, &mut out.deltas) {
                self.done = true;
                self.pending.clear();
                out.done = true;
                return out;
            }
        }
        self.pending.drain(..consumed);
        out
    }

    /// Called at upstream end. A trailing line without a newline is
    /// discarded; returns how many bytes were dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn malformed_lines(&self) -> usize {
        self.malformed_lines
    }

    /// Returns true when the line is the `[DONE]` sentinel.
    fn process_line(&mut self, line: &str, deltas: &mut Vec<String>) -> bool {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return false;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return false;
        };
        if payload == DONE_PAYLOAD {
            return true;
        }
        match serde_json::from_str::<CompletionChunk>(payload) {
            Ok(chunk) => {
                if let Some(err) = chunk.error {
                    tracing::warn!(error = %err, "upstream reported an error mid-stream");
                }
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta)
                    .and_then(|d| d.content);
                if let Some(content) = content.filter(|c| !c.is_empty()) {
                    deltas.push(content);
                }
            }
            Err(e) => {
                self.malformed_lines += 1;
                tracing::warn!(error = %e, data = %payload, "failed to parse upstream chunk");
            }
        }
        false
    }
}

// ============ Upstream call ============

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

pub struct ChatRelay {
    client: reqwest::Client,
    upstream: UpstreamConfig,
    api_key: String,
    store: Arc<dyn DocumentStore>,
}

impl ChatRelay {
    pub fn new(
        upstream: UpstreamConfig,
        api_key: String,
        store: Arc<dyn DocumentStore>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(upstream.connect_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            upstream,
            api_key,
            store,
        })
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.idle_timeout_secs)
    }

    /// Validates the prompt, resolves document context and starts the
    /// upstream stream.
    pub async fn open(
        &self,
        user_message: &str,
        document_id: Option<&str>,
    ) -> Result<DeltaStream, RelayError> {
        if user_message.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "Invalid or missing message".to_string(),
            ));
        }

        let document = document_id.and_then(|id| self.store.get(id));
        if let (Some(id), None) = (document_id, &document) {
            tracing::debug!(document_id = %id, "document not found; answering without context");
        }
        let messages = compose_messages(user_message, document.as_deref().map(|d| d.text.as_str()));

        let body = CompletionRequest {
            model: &self.upstream.model,
            messages: &messages,
            stream: true,
        };
        let mut req = self
            .client
            .post(&self.upstream.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(referer) = &self.upstream.referer {
            req = req.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.upstream.title {
            req = req.header("X-Title", title);
        }

        let started = Instant::now();
        let idle = self.idle_timeout();
        let response = match tokio::time::timeout(idle, req.send()).await {
            Err(_) => return Err(RelayError::UpstreamTimeout(idle)),
            Ok(Err(e)) => return Err(RelayError::UpstreamUnavailable(e.to_string())),
            Ok(Ok(resp)) => resp,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "upstream rejected chat request");
            return Err(RelayError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(DeltaStream::new(response.bytes_stream().boxed(), idle, started))
    }
}

/// Assistant text deltas pulled from an open upstream response.
pub struct DeltaStream {
    upstream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    reframer: StreamReframer,
    queued: VecDeque<String>,
    idle_timeout: Duration,
    started: Instant,
    bytes_emitted: usize,
}

impl DeltaStream {
    fn new(
        upstream: BoxStream<'static, reqwest::Result<Bytes>>,
        idle_timeout: Duration,
        started: Instant,
    ) -> Self {
        Self {
            upstream: Some(upstream),
            reframer: StreamReframer::new(),
            queued: VecDeque::new(),
            idle_timeout,
            started,
            bytes_emitted: 0,
        }
    }

    /// Next delta, `None` at normal completion. After an error the stream
    /// is finished.
    pub async fn next_delta(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            if let Some(delta) = self.queued.pop_front() {
                self.bytes_emitted += delta.len();
                return Some(Ok(delta));
            }
            let upstream = self.upstream.as_mut()?;
            match tokio::time::timeout(self.idle_timeout, upstream.next()).await {
                Err(_) => {
                    self.upstream = None;
                    tracing::error!(timeout = ?self.idle_timeout, "upstream stream went idle");
                    return Some(Err(RelayError::UpstreamTimeout(self.idle_timeout)));
                }
                Ok(None) => {
                    let dropped = self.reframer.finish();
                    if dropped > 0 {
                        tracing::debug!(bytes = dropped, "discarded unterminated trailing line");
                    }
                    self.complete();
                }
                Ok(Some(Err(e))) => {
                    self.upstream = None;
                    tracing::error!(error = %e, "upstream stream error");
                    return Some(Err(RelayError::UpstreamUnavailable(e.to_string())));
                }
                Ok(Some(Ok(chunk))) => {
                    let reframed = self.reframer.feed(&chunk);
                    self.queued.extend(reframed.deltas);
                    if reframed.done {
                        self.complete();
                    }
                }
            }
        }
    }

    fn complete(&mut self) {
        self.upstream = None;
        tracing::info!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            bytes = self.bytes_emitted + self.queued.iter().map(String::len).sum::<usize>(),
            malformed_lines = self.reframer.malformed_lines(),
            "upstream stream completed"
        );
    }

    /// Turns the remaining deltas into a response body stream, emitting
    /// `first` ahead of them.
    pub fn into_body(
        self,
        first: Option<String>,
    ) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static {
        let head = futures::stream::iter(first.map(|d| Ok(Bytes::from(d))));
        let rest = futures::stream::unfold(self, |mut stream| async move {
            let item = stream.next_delta().await?;
            Some((item.map(Bytes::from), stream))
        });
        head.chain(rest)
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        if self.upstream.is_some() {
            tracing::debug!(
                bytes = self.bytes_emitted,
                "client went away mid-stream; releasing upstream response"
            );
        }
    }
}
