use crate::config::{ApiKey, Settings};
use crate::error::AskError;
use futures_core::stream::BoxStream;
use reqwest::header::HeaderValue;
use reqwest::Url;
use std::time::Duration;

/// Header prepended to the selected text when it is sent as context.
pub const CONTEXT_PREAMBLE: &str = "The following text is selected in the editor:\n\n";

/// What the user asked for: a prompt plus the (possibly empty) selection.
#[derive(Debug, Clone, Default)]
pub struct Ask {
    pub prompt: String,
    pub context: String,
}

impl Ask {
    pub fn new(prompt: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: context.into(),
        }
    }
}

/// A validated chat-completion request. Built fresh per ask and consumed
/// when sent.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub url: Url,
    pub api_key: Option<ApiKey>,
    pub model: String,
    pub prompt: String,
    pub context: String,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,

    /// Longest wait for response headers or the next body read.
    pub idle_timeout: Duration,
}

impl ChatRequest {
    pub fn new(settings: &Settings, ask: Ask) -> Result<Self, AskError> {
        let prompt = ask.prompt.trim();
        if prompt.is_empty() {
            return Err(AskError::invalid("prompt is empty"));
        }

        let url = parse_endpoint(&settings.url)?;

        if let Some(key) = &settings.api_key {
            HeaderValue::from_str(&key.bearer())
                .map_err(|_| AskError::invalid("API key contains characters not allowed in a header"))?;
        }

        Ok(Self {
            url,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            prompt: prompt.to_string(),
            context: ask.context,
            stream: settings.stream,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            idle_timeout: settings.timeout,
        })
    }

    /// Context message content, if any text was selected.
    pub fn context_message(&self) -> Option<String> {
        if self.context.is_empty() {
            None
        } else {
            Some(format!("{CONTEXT_PREAMBLE}{}", self.context))
        }
    }
}

/// Parse an endpoint URL, accepting only http and https.
pub fn parse_endpoint(raw: &str) -> Result<Url, AskError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AskError::invalid(format!("bad endpoint URL {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AskError::invalid(format!(
            "endpoint URL must be http or https, got {other:?}"
        ))),
    }
}

/// One incremental piece of model output, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatChunk {
    pub text: String,
}

pub type ChunkStream = BoxStream<'static, Result<ChatChunk, AskError>>;

/// Provider interface.
pub trait Provider {
    fn name(&self) -> &'static str;

    /// Open the request and return its output as a lazy stream of chunks.
    ///
    /// Dropping the stream releases the underlying connection.
    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ChunkStream, AskError>> + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let err = ChatRequest::new(&settings(), Ask::new("  \n", "some code")).unwrap_err();
        assert_eq!(err, AskError::invalid("prompt is empty"));
    }

    #[test]
    fn prompt_is_trimmed_and_context_kept_verbatim() {
        let req = ChatRequest::new(&settings(), Ask::new("  Explain this\n", "  x = 1\n")).unwrap();
        assert_eq!(req.prompt, "Explain this");
        assert_eq!(req.context, "  x = 1\n");
        assert_eq!(
            req.context_message().as_deref(),
            Some("The following text is selected in the editor:\n\n  x = 1\n")
        );
    }

    #[test]
    fn no_context_message_without_selection() {
        let req = ChatRequest::new(&settings(), Ask::new("hi", "")).unwrap();
        assert!(req.context_message().is_none());
    }

    #[test]
    fn endpoint_must_be_http() {
        assert!(parse_endpoint("http://127.0.0.1:5000/v1/chat/completions").is_ok());
        assert!(parse_endpoint("https://example.com/v1/chat/completions").is_ok());
        assert!(matches!(
            parse_endpoint("ftp://example.com/"),
            Err(AskError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_endpoint("not a url"),
            Err(AskError::InvalidRequest(_))
        ));
    }

    #[test]
    fn bad_url_in_settings_is_a_validation_error() {
        let mut s = settings();
        s.url = "localhost:5000".to_string();
        let err = ChatRequest::new(&s, Ask::new("hi", "")).unwrap_err();
        assert!(matches!(err, AskError::InvalidRequest(_)));
    }

    #[test]
    fn api_key_must_fit_in_a_header() {
        let mut s = settings();
        s.api_key = ApiKey::from_config("bad\nkey");
        let err = ChatRequest::new(&s, Ask::new("hi", "")).unwrap_err();
        assert!(matches!(err, AskError::InvalidRequest(_)));
    }
}
