use super::sse::{SseEvent, SseParser, DONE_MARKER};
use super::{ChatChunk, ChatRequest, ChunkStream, Provider};
use crate::error::AskError;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Client for `/v1/chat/completions` style endpoints (llama.cpp, vLLM,
/// Ollama, LM Studio, OpenAI itself).
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn headers(req: &ChatRequest) -> Result<HeaderMap, AskError> {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if req.stream {
            h.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        if let Some(key) = &req.api_key {
            let v = HeaderValue::from_str(&key.bearer())
                .map_err(|_| AskError::invalid("API key contains characters not allowed in a header"))?;
            h.insert(AUTHORIZATION, v);
        }
        Ok(h)
    }
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ChunkStream, AskError>> + Send>> {
        let http = self.http.clone();

        Box::pin(async move {
            let headers = Self::headers(&req)?;
            let body = ChatPayload::from_request(&req);
            let idle = req.idle_timeout;

            tracing::debug!(url = %req.url, model = %req.model, stream = req.stream, "sending chat completion");

            let pending = http.post(req.url.clone()).headers(headers).json(&body).send();
            let resp = tokio::time::timeout(idle, pending)
                .await
                .map_err(|_| timed_out(idle, "response headers"))??;

            let status = resp.status();
            if !status.is_success() {
                let text = tokio::time::timeout(idle, resp.text())
                    .await
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or_default();
                return Err(AskError::http_status(status, &text));
            }

            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_ascii_lowercase);
            let is_sse = content_type
                .as_deref()
                .is_some_and(|ct| ct.contains("text/event-stream"));

            // A server that ignores "stream": true answers with plain JSON.
            if is_sse || (req.stream && content_type.is_none()) {
                Ok(delta_stream(resp.bytes_stream().boxed(), idle))
            } else {
                let text = tokio::time::timeout(idle, resp.text())
                    .await
                    .map_err(|_| timed_out(idle, "response body"))??;
                let chunk = parse_completion(&text)?;
                Ok(stream::once(async move { Ok(chunk) }).boxed())
            }
        })
    }
}

fn timed_out(idle: Duration, waiting_for: &str) -> AskError {
    AskError::failed(format!("timed out after {}s waiting for {waiting_for}", idle.as_secs()))
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatPayload {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

impl ChatPayload {
    pub(crate) fn from_request(req: &ChatRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(content) = req.context_message() {
            messages.push(Message {
                role: "system",
                content,
            });
        }
        messages.push(Message {
            role: "user",
            content: req.prompt.clone(),
        });

        Self {
            model: req.model.clone(),
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: req.stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamFragment {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiError {
    Text(String),
    Object {
        #[serde(default)]
        message: Option<String>,
    },
}

impl ApiError {
    fn message(self) -> String {
        match self {
            Self::Text(msg) | Self::Object { message: Some(msg) } => msg,
            Self::Object { message: None } => "server reported an error".to_string(),
        }
    }
}

/// Outcome of one SSE `data:` payload.
#[derive(Debug, PartialEq, Eq)]
enum Fragment {
    Text(String),
    Empty,
    Done,
    Error(String),
    Malformed,
}

fn parse_fragment(data: &str) -> Fragment {
    let data = data.trim();
    if data == DONE_MARKER {
        return Fragment::Done;
    }
    if data.is_empty() {
        return Fragment::Empty;
    }

    match serde_json::from_str::<StreamFragment>(data) {
        Ok(StreamFragment { error: Some(err), .. }) => Fragment::Error(err.message()),
        Ok(frag) => match frag
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
        {
            Some(text) if !text.is_empty() => Fragment::Text(text),
            _ => Fragment::Empty,
        },
        Err(e) => {
            tracing::warn!(%e, payload_bytes = data.len(), "skipping malformed stream fragment");
            Fragment::Malformed
        }
    }
}

fn parse_completion(body: &str) -> Result<ChatChunk, AskError> {
    let parsed: CompletionResponse = serde_json::from_str(body).map_err(|e| {
        tracing::debug!(%e, "completion body is not JSON");
        AskError::UnexpectedResponse("Unexpected response format.".to_string())
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|text| ChatChunk { text })
        .ok_or_else(|| AskError::UnexpectedResponse("Unexpected response format.".to_string()))
}

struct DeltaState<B, E> {
    body: Option<BoxStream<'static, Result<B, E>>>,
    parser: SseParser,
    pending: VecDeque<Result<ChatChunk, AskError>>,
    idle: Duration,
}

impl<B, E> DeltaState<B, E> {
    /// Queue the text of each event; drop the body once the stream has ended.
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for ev in events {
            let SseEvent::Data(data) = ev else { continue };
            match parse_fragment(&data) {
                Fragment::Text(text) => self.pending.push_back(Ok(ChatChunk { text })),
                Fragment::Empty | Fragment::Malformed => {}
                Fragment::Done => {
                    self.body = None;
                    return;
                }
                Fragment::Error(msg) => {
                    self.pending.push_back(Err(AskError::failed(msg)));
                    self.body = None;
                    return;
                }
            }
        }
    }
}

/// Turn a raw SSE body into a lazy, finite stream of text deltas.
///
/// The body is dropped as soon as the terminal marker, an error, or the end
/// of input is seen, and with the returned stream otherwise.
pub(crate) fn delta_stream<B, E>(body: BoxStream<'static, Result<B, E>>, idle: Duration) -> ChunkStream
where
    B: AsRef<[u8]> + Send + 'static,
    E: Into<AskError> + Send + 'static,
{
    let state = DeltaState {
        body: Some(body),
        parser: SseParser::new(),
        pending: VecDeque::new(),
        idle,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            let body = st.body.as_mut()?;

            match tokio::time::timeout(st.idle, body.next()).await {
                Err(_) => {
                    st.body = None;
                    return Some((Err(timed_out(st.idle, "stream data")), st));
                }
                Ok(None) => {
                    st.body = None;
                    let events = st.parser.finish();
                    st.absorb(events);
                }
                Ok(Some(Err(e))) => {
                    st.body = None;
                    return Some((Err(e.into()), st));
                }
                Ok(Some(Ok(bytes))) => {
                    let events = st.parser.push(bytes.as_ref());
                    st.absorb(events);
                }
            }
        }
    })
    .boxed()
}
