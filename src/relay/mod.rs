pub mod foundry;
pub mod sse;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::models::chat::ChatMessage;

pub use foundry::FoundryClient;
pub use sse::{ decode_sse_line, ChunkStream, SseLine };

#[derive(Debug)]
pub enum RelayOutput {
    Stream(ChunkStream),
    Complete(String),
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Sends the most recent user message to the agent.
    async fn forward(
        &self,
        messages: &[ChatMessage],
        stream: bool,
        cancel: CancellationToken
    ) -> Result<RelayOutput, RelayError>;

    async fn send_message_stream(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken
    ) -> Result<ChunkStream, RelayError> {
        match self.forward(messages, true, cancel).await? {
            RelayOutput::Stream(chunks) => Ok(chunks),
            RelayOutput::Complete(body) => Ok(ChunkStream::from_chunks(vec![body])),
        }
    }

    async fn send_message(&self, messages: &[ChatMessage]) -> Result<String, RelayError> {
        match self.forward(messages, false, CancellationToken::new()).await? {
            RelayOutput::Complete(body) => Ok(body),
            RelayOutput::Stream(chunks) => {
                let parts: Vec<String> = chunks.try_collect().await?;
                Ok(parts.concat())
            }
        }
    }
}
