//! Boundary to the language model. Inference itself happens elsewhere; the runtime only
//! needs a stream of chunks for a stateless request.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use shopkeep_core::{ContentBlock, Message, MessageRole, ToolSchema};

use crate::events::Usage;

#[derive(Clone, Debug, PartialEq)]
pub struct ModelMessage {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl From<&Message> for ModelMessage {
    fn from(message: &Message) -> Self {
        Self { role: message.role, content: message.content.clone() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolSchema>,
}

impl ModelRequest {
    pub fn new(system_prompt: Option<String>, history: &[Message], tools: Vec<ToolSchema>) -> Self {
        Self { system_prompt, messages: history.iter().map(ModelMessage::from).collect(), tools }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelChunk {
    TextDelta(String),
    ToolUse { id: String, name: String, input: Value },
    Finished { usage: Usage },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model stream interrupted: {0}")]
    Stream(String),
}

pub type ChunkStream = BoxStream<'static, Result<ModelChunk, ModelError>>;

#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn stream(&self, request: ModelRequest) -> Result<ChunkStream, ModelError>;
}

/// Replays pre-recorded rounds in order, one per `stream` call, and keeps every request
/// it received. Used for offline runs and tests.
#[derive(Default)]
pub struct ScriptedModel {
    rounds: Mutex<VecDeque<Vec<Result<ModelChunk, ModelError>>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_round(mut self, chunks: Vec<ModelChunk>) -> Self {
        self.rounds.get_mut().push_back(chunks.into_iter().map(Ok).collect());
        self
    }

    /// A round that yields `chunks` and then fails mid-stream.
    pub fn with_broken_round(mut self, chunks: Vec<ModelChunk>, error: ModelError) -> Self {
        let mut round: Vec<_> = chunks.into_iter().map(Ok).collect();
        round.push(Err(error));
        self.rounds.get_mut().push_back(round);
        self
    }

    pub async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ModelRuntime for ScriptedModel {
    async fn stream(&self, request: ModelRequest) -> Result<ChunkStream, ModelError> {
        self.requests.lock().await.push(request);
        let round = self
            .rounds
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ModelError::Request("no scripted round left".to_string()))?;
        Ok(stream::iter(round).boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use shopkeep_core::{ConversationId, Message};

    use super::{ModelChunk, ModelError, ModelRequest, ModelRuntime, ScriptedModel};

    #[tokio::test]
    async fn scripted_rounds_replay_in_order_then_run_out() {
        let model = ScriptedModel::new()
            .with_round(vec![ModelChunk::TextDelta("one".to_string())])
            .with_broken_round(vec![], ModelError::Stream("reset".to_string()));
        let history = [Message::user_text(ConversationId("c-1".to_string()), "hi")];

        let first: Vec<_> =
            model.stream(ModelRequest::new(None, &history, vec![])).await.expect("round 1").collect().await;
        assert_eq!(first, vec![Ok(ModelChunk::TextDelta("one".to_string()))]);

        let second: Vec<_> =
            model.stream(ModelRequest::new(None, &history, vec![])).await.expect("round 2").collect().await;
        assert_eq!(second, vec![Err(ModelError::Stream("reset".to_string()))]);

        assert!(model.stream(ModelRequest::new(None, &history, vec![])).await.is_err());
        assert_eq!(model.requests().await.len(), 3);
    }
}
