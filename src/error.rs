use thiserror::Error;

/// Longest slice of an HTTP error body carried into the message.
pub const BODY_EXCERPT_CHARS: usize = 512;

/// Failure kinds surfaced by the request controller.
///
/// Transport failures, timeouts and HTTP error statuses all collapse into
/// `RequestFailed`; only the message tells them apart.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AskError {
    /// Rejected before anything went on the wire.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Non-streaming body that does not carry a completion.
    #[error("{0}")]
    UnexpectedResponse(String),
}

impl AskError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn http_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = body.trim();
        if body.is_empty() {
            return Self::RequestFailed(format!("HTTP {status}"));
        }
        Self::RequestFailed(format!("HTTP {status}: {}", excerpt(body)))
    }
}

impl From<reqwest::Error> for AskError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::RequestFailed(format!("timed out: {err}"))
        } else if err.is_connect() {
            Self::RequestFailed(format!("connection failed: {err}"))
        } else {
            Self::RequestFailed(err.to_string())
        }
    }
}

fn excerpt(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(BODY_EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
