use super::openai::ChatPayload;
use super::{ChatChunk, ChatRequest, ChunkStream, Provider};
use crate::error::AskError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Dry-run provider: streams back the request it would have sent, one line
/// per chunk, without touching the network.
#[derive(Debug, Default, Clone)]
pub struct EchoProvider {
    delay: std::time::Duration,
}

#[cfg(feature = "tui")]
impl EchoProvider {
    pub fn new(delay: std::time::Duration) -> Self {
        Self { delay }
    }
}

impl Provider for EchoProvider {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ChunkStream, AskError>> + Send>> {
        let delay = self.delay;

        Box::pin(async move {
            let body = serde_json::to_string_pretty(&ChatPayload::from_request(&req))
                .map_err(|e| AskError::invalid(format!("cannot encode payload: {e}")))?;
            let auth = if req.api_key.is_some() {
                "Authorization: Bearer ****\n"
            } else {
                ""
            };
            let head = format!("POST {}\n{auth}\n", req.url);

            let (tx, rx) = mpsc::channel::<Result<ChatChunk, AskError>>(32);

            tokio::spawn(async move {
                let lines = std::iter::once(head).chain(body.lines().map(|l| format!("{l}\n")));
                for text in lines {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.send(Ok(ChatChunk { text })).await.is_err() {
                        break;
                    }
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
        })
    }
}
