//! Line-oriented server-sent-event framing.

/// Payload that ends an OpenAI-style event stream.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    /// A line that could not be decoded; the stream carries on.
    Invalid,
}

/// Minimal SSE parser.
///
/// - Collects lines across arbitrary byte boundaries
/// - Joins the `data:` lines of one event with `\n`
/// - Emits the event when a blank line ends it, or on [`SseParser::finish`]
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    cur_data: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.line(&line, &mut out);
        }

        out
    }

    /// Flush whatever the body ended with, terminated or not.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut out = Vec::new();
        if !self.buf.is_empty() {
            let mut line = std::mem::take(&mut self.buf);
            if line.ends_with(b"\r") {
                line.pop();
            }
            self.line(&line, &mut out);
        }
        self.dispatch(&mut out);
        out
    }

    fn line(&mut self, line: &[u8], out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }

        let Ok(s) = std::str::from_utf8(line) else {
            tracing::warn!(bytes = line.len(), "skipping SSE line that is not valid UTF-8");
            out.push(SseEvent::Invalid);
            return;
        };

        // Other fields (event:, id:, retry:) and comments carry no text.
        if let Some(rest) = s.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match &mut self.cur_data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(rest);
                }
                None => self.cur_data = Some(rest.to_string()),
            }
        }
    }

    fn dispatch(&mut self, out: &mut Vec<SseEvent>) {
        if let Some(data) = self.cur_data.take() {
            out.push(SseEvent::Data(data));
        }
    }
}
