//! Request controller: runs one ask against a provider and reports text to
//! the host through callbacks.

#[cfg(feature = "tui")]
use crate::config::Settings;
use crate::config::SettingsProvider;
use crate::error::AskError;
use crate::provider::{Ask, ChatRequest, Provider};
use futures_util::StreamExt;
use std::sync::Arc;
#[cfg(feature = "tui")]
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Host callback interface.
pub trait ResponseSink: Send {
    /// One piece of output, in arrival order.
    fn on_delta(&mut self, text: &str);

    /// Success; `full_text` is the concatenation of every delta.
    fn on_done(&mut self, full_text: &str);

    /// Failure. Fires at most once, and never together with `on_done`.
    fn on_error(&mut self, err: &AskError);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Done(String),
    /// Stopped by the host. Not an error, and no terminal callback fired.
    Cancelled,
}

#[derive(Clone)]
pub struct Controller {
    provider: Arc<dyn Provider + Send + Sync>,
}

impl Controller {
    pub fn new(provider: Arc<dyn Provider + Send + Sync>) -> Self {
        Self { provider }
    }

    /// Build a request from the current settings and send it.
    ///
    /// Validation failures are reported through `sink` before anything is
    /// sent.
    pub async fn ask(
        &self,
        settings: &dyn SettingsProvider,
        ask: Ask,
        sink: &mut dyn ResponseSink,
        cancel: &CancellationToken,
    ) -> Result<Completion, AskError> {
        let settings = settings.settings();
        tracing::debug!(?settings, "resolved settings");

        match ChatRequest::new(&settings, ask) {
            Ok(req) => self.send(req, sink, cancel).await,
            Err(e) => {
                sink.on_error(&e);
                Err(e)
            }
        }
    }

    /// Send `req`, forwarding each chunk to `sink` as it arrives.
    ///
    /// Once `cancel` fires no further callback is made and the connection is
    /// dropped.
    pub async fn send(
        &self,
        req: ChatRequest,
        sink: &mut dyn ResponseSink,
        cancel: &CancellationToken,
    ) -> Result<Completion, AskError> {
        let provider = self.provider.name();

        if cancel.is_cancelled() {
            tracing::info!(provider, "request cancelled before it was sent");
            return Ok(Completion::Cancelled);
        }

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(provider, "request cancelled before the response started");
                return Ok(Completion::Cancelled);
            }
            opened = self.provider.stream_chat(req) => opened,
        };

        let mut stream = match opened {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(provider, error = %e, "request failed");
                sink.on_error(&e);
                return Err(e);
            }
        };

        let mut full = String::new();
        let mut chunks = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(provider, chunks, "request cancelled mid-stream");
                    return Ok(Completion::Cancelled);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    chunks += 1;
                    full.push_str(&chunk.text);
                    sink.on_delta(&chunk.text);
                }
                Some(Err(e)) => {
                    tracing::debug!(provider, chunks, error = %e, "stream failed");
                    sink.on_error(&e);
                    return Err(e);
                }
                None => break,
            }
        }

        tracing::debug!(provider, chunks, bytes = full.len(), "completion finished");
        sink.on_done(&full);
        Ok(Completion::Done(full))
    }
}

#[cfg(feature = "tui")]
/// Controller output marshaled back to the host's own loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Delta(String),
    Done(String),
    Error(AskError),
}

#[cfg(feature = "tui")]
impl HostEvent {
    /// Replay this event on a sink owned by the host.
    pub fn dispatch(self, sink: &mut dyn ResponseSink) {
        match self {
            Self::Delta(t) => sink.on_delta(&t),
            Self::Done(t) => sink.on_done(&t),
            Self::Error(err) => sink.on_error(&err),
        }
    }
}

#[cfg(feature = "tui")]
struct ChannelSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

#[cfg(feature = "tui")]
impl ResponseSink for ChannelSink {
    fn on_delta(&mut self, text: &str) {
        let _ = self.tx.send(HostEvent::Delta(text.to_string()));
    }

    fn on_done(&mut self, full_text: &str) {
        let _ = self.tx.send(HostEvent::Done(full_text.to_string()));
    }

    fn on_error(&mut self, err: &AskError) {
        let _ = self.tx.send(HostEvent::Error(err.clone()));
    }
}

#[cfg(feature = "tui")]
/// An ask running on a background task.
///
/// Dropping it (or calling [`ActiveRequest::cancel`]) aborts the network
/// read; events queued before that are discarded.
pub struct ActiveRequest {
    rx: mpsc::UnboundedReceiver<HostEvent>,
    cancel: CancellationToken,
}

#[cfg(feature = "tui")]
impl ActiveRequest {
    pub fn spawn(controller: Controller, settings: Settings, ask: Ask) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut sink = ChannelSink { tx };
            let _ = controller.ask(&settings, ask, &mut sink, &token).await;
        });

        Self { rx, cancel }
    }

    /// Next event, or `None` once the request has finished or been cancelled.
    pub async fn recv(&mut self) -> Option<HostEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            ev = self.rx.recv() => ev,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(feature = "tui")]
impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::provider::{ChatChunk, ChunkStream, OpenAiProvider};
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Default)]
    struct Recorder {
        deltas: Vec<String>,
        done: Vec<String>,
        errors: Vec<AskError>,
    }

    impl ResponseSink for Recorder {
        fn on_delta(&mut self, text: &str) {
            self.deltas.push(text.to_string());
        }
        fn on_done(&mut self, full_text: &str) {
            self.done.push(full_text.to_string());
        }
        fn on_error(&mut self, err: &AskError) {
            self.errors.push(err.clone());
        }
    }

    /// Yields scripted items with a pause between them.
    struct Scripted {
        items: Vec<Result<&'static str, AskError>>,
        pause: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl Provider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn stream_chat(
            &self,
            _req: ChatRequest,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ChunkStream, AskError>> + Send>>
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items = self.items.clone();
            let pause = self.pause;
            Box::pin(async move {
                let s = stream::iter(items).then(move |item| async move {
                    tokio::time::sleep(pause).await;
                    item.map(|t| ChatChunk { text: t.to_string() })
                });
                Ok(s.boxed())
            })
        }
    }

    fn scripted(items: Vec<Result<&'static str, AskError>>, pause: Duration) -> (Controller, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Scripted {
            items,
            pause,
            calls: calls.clone(),
        };
        (Controller::new(Arc::new(provider)), calls)
    }

    fn settings_for(server: &MockServer, stream: bool) -> Settings {
        Settings {
            url: format!("{}/v1/chat/completions", server.uri()),
            stream,
            timeout: Duration::from_secs(5),
            ..Settings::default()
        }
    }

    fn sse(fragments: &[serde_json::Value]) -> String {
        let mut out = String::new();
        for f in fragments {
            out.push_str(&format!("data: {f}\n\n"));
        }
        out.push_str("data: [DONE]\n\n");
        out
    }

    fn delta(text: &str) -> serde_json::Value {
        json!({"choices": [{"delta": {"content": text}}]})
    }

    #[tokio::test]
    async fn empty_prompt_fails_before_the_network() {
        let (controller, calls) = scripted(vec![Ok("never")], Duration::ZERO);
        let mut rec = Recorder::default();

        let err = controller
            .ask(&Settings::default(), Ask::new("   ", "ctx"), &mut rec, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AskError::InvalidRequest(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(rec.errors, vec![err]);
        assert!(rec.deltas.is_empty() && rec.done.is_empty());
    }

    #[tokio::test]
    async fn streamed_chunks_concatenate_to_done_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[
                    delta("The loop "),
                    json!({"choices": [{"delta": {}}]}),
                    delta("prints 0, 1"),
                    delta(" and 2."),
                ]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let controller = Controller::new(Arc::new(OpenAiProvider::new(reqwest::Client::new())));
        let mut rec = Recorder::default();
        let out = controller
            .ask(
                &settings_for(&server, true),
                Ask::new("Explain this", "for i in range(3): print(i)"),
                &mut rec,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let full = "The loop prints 0, 1 and 2.".to_string();
        assert_eq!(out, Completion::Done(full.clone()));
        assert_eq!(rec.deltas, vec!["The loop ", "prints 0, 1", " and 2."]);
        assert_eq!(rec.deltas.concat(), full);
        assert_eq!(rec.done, vec![full]);
        assert!(rec.errors.is_empty());
    }

    #[tokio::test]
    async fn malformed_fragment_does_not_end_the_stream() {
        let server = MockServer::start().await;
        let body = format!(
            "data: {}\n\ndata: {{\"choices\": [\n\ndata: {}\n\ndata: [DONE]\n\n",
            delta("before"),
            delta(" after")
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let controller = Controller::new(Arc::new(OpenAiProvider::new(reqwest::Client::new())));
        let mut rec = Recorder::default();
        controller
            .ask(&settings_for(&server, true), Ask::new("hi", ""), &mut rec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(rec.deltas, vec!["before", " after"]);
        assert_eq!(rec.done, vec!["before after"]);
    }

    #[tokio::test]
    async fn non_streaming_delivers_exactly_one_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"choices": [{"message": {"role": "assistant", "content": "all at once"}}]}),
            ))
            .mount(&server)
            .await;

        let controller = Controller::new(Arc::new(OpenAiProvider::new(reqwest::Client::new())));
        let mut rec = Recorder::default();
        controller
            .ask(&settings_for(&server, false), Ask::new("hi", ""), &mut rec, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(rec.deltas, vec!["all at once"]);
        assert_eq!(rec.done, vec!["all at once"]);
    }

    #[tokio::test]
    async fn http_error_yields_one_error_and_no_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let controller = Controller::new(Arc::new(OpenAiProvider::new(reqwest::Client::new())));
        let mut rec = Recorder::default();
        let err = controller
            .ask(&settings_for(&server, true), Ask::new("hi", ""), &mut rec, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, AskError::failed("HTTP 401 Unauthorized: bad key"));
        assert_eq!(rec.errors, vec![err]);
        assert!(rec.deltas.is_empty());
        assert!(rec.done.is_empty());
    }

    #[tokio::test]
    async fn unexpected_json_shape_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "?"})))
            .mount(&server)
            .await;

        let controller = Controller::new(Arc::new(OpenAiProvider::new(reqwest::Client::new())));
        let mut rec = Recorder::default();
        let err = controller
            .ask(&settings_for(&server, false), Ask::new("hi", ""), &mut rec, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Unexpected response format.");
        assert_eq!(rec.errors.len(), 1);
    }

    #[tokio::test]
    async fn mid_stream_error_stops_after_delivered_chunks() {
        let (controller, _) = scripted(
            vec![Ok("a"), Err(AskError::failed("connection reset")), Ok("b")],
            Duration::ZERO,
        );
        let mut rec = Recorder::default();
        let err = controller
            .ask(&Settings::default(), Ask::new("hi", ""), &mut rec, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, AskError::failed("connection reset"));
        assert_eq!(rec.deltas, vec!["a"]);
        assert!(rec.done.is_empty());
    }

    #[tokio::test]
    async fn cancel_stops_all_callbacks() {
        let (controller, _) = scripted(vec![Ok("a"), Ok("b"), Ok("c"), Ok("d")], Duration::from_millis(40));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let mut rec = Recorder::default();
        let out = controller
            .ask(&Settings::default(), Ask::new("hi", ""), &mut rec, &cancel)
            .await
            .unwrap();

        assert_eq!(out, Completion::Cancelled);
        assert!(rec.deltas.len() < 4);
        assert!(rec.done.is_empty());
        assert!(rec.errors.is_empty());
    }

    #[tokio::test]
    async fn already_cancelled_sends_nothing() {
        let (controller, calls) = scripted(vec![Ok("a")], Duration::ZERO);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut rec = Recorder::default();
        let out = controller
            .ask(&Settings::default(), Ask::new("hi", ""), &mut rec, &cancel)
            .await
            .unwrap();

        assert_eq!(out, Completion::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(rec.deltas.is_empty());
    }

    #[cfg(feature = "tui")]
    #[tokio::test]
    async fn active_request_marshals_events() {
        let (controller, _) = scripted(vec![Ok("x"), Ok("y")], Duration::ZERO);
        let mut active = ActiveRequest::spawn(controller, Settings::default(), Ask::new("hi", ""));

        let mut events = Vec::new();
        while let Some(ev) = active.recv().await {
            let done = matches!(ev, HostEvent::Done(_) | HostEvent::Error(_));
            events.push(ev);
            if done {
                break;
            }
        }
        assert_eq!(
            events,
            vec![
                HostEvent::Delta("x".into()),
                HostEvent::Delta("y".into()),
                HostEvent::Done("xy".into())
            ]
        );
    }

    #[cfg(feature = "tui")]
    #[tokio::test]
    async fn active_request_reports_validation_errors() {
        let (controller, _) = scripted(vec![], Duration::ZERO);
        let mut active = ActiveRequest::spawn(controller, Settings::default(), Ask::new("", ""));
        assert_eq!(
            active.recv().await,
            Some(HostEvent::Error(AskError::invalid("prompt is empty")))
        );
    }

    #[cfg(feature = "tui")]
    #[tokio::test]
    async fn cancelled_active_request_yields_nothing_more() {
        let (controller, _) = scripted(vec![Ok("a"), Ok("b"), Ok("c")], Duration::from_millis(30));
        let mut active = ActiveRequest::spawn(controller, Settings::default(), Ask::new("hi", ""));

        assert_eq!(active.recv().await, Some(HostEvent::Delta("a".into())));
        active.cancel();
        // Let the task run on; anything it queued must stay invisible.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(active.recv().await, None);
    }

    #[cfg(feature = "tui")]
    #[tokio::test]
    async fn superseding_request_never_sees_old_chunks() {
        let (slow, _) = scripted(vec![Ok("old-1"), Ok("old-2"), Ok("old-3")], Duration::from_millis(30));
        let (fast, _) = scripted(vec![Ok("new")], Duration::ZERO);

        let mut active = ActiveRequest::spawn(slow, Settings::default(), Ask::new("first", ""));
        assert_eq!(active.recv().await, Some(HostEvent::Delta("old-1".into())));

        active = ActiveRequest::spawn(fast, Settings::default(), Ask::new("second", ""));
        let mut seen = Vec::new();
        while let Some(ev) = active.recv().await {
            let done = matches!(ev, HostEvent::Done(_));
            seen.push(ev);
            if done {
                break;
            }
        }
        assert_eq!(seen, vec![HostEvent::Delta("new".into()), HostEvent::Done("new".into())]);
    }

    #[cfg(feature = "tui")]
    #[test]
    fn host_events_replay_on_a_sink() {
        let mut rec = Recorder::default();
        HostEvent::Delta("a".into()).dispatch(&mut rec);
        HostEvent::Done("a".into()).dispatch(&mut rec);
        HostEvent::Error(AskError::failed("boom")).dispatch(&mut rec);
        assert_eq!(rec.deltas, vec!["a"]);
        assert_eq!(rec.done, vec!["a"]);
        assert_eq!(rec.errors, vec![AskError::failed("boom")]);
    }
}
