use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use shopkeep_core::config::AgentConfig;
use shopkeep_core::{
    ApplicationError, ContentBlock, ConversationId, DomainError, InterfaceError, Message,
    MessageRole, TenantId, ToolSchema, UserId,
};

use crate::dispatcher::ToolDispatcher;
use crate::events::{TurnEvent, Usage};
use crate::llm::{ModelChunk, ModelError, ModelRequest, ModelRuntime};
use crate::store::ConversationStore;
use crate::strategies::ToolCallContext;
use crate::telemetry::{new_span_id, TraceContext};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnRequest {
    /// `None` starts a new conversation.
    pub conversation_id: Option<ConversationId>,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub agent_id: Option<String>,
    pub text: String,
}

impl TurnRequest {
    pub fn new(tenant_id: TenantId, text: impl Into<String>) -> Self {
        Self { conversation_id: None, tenant_id, user_id: None, agent_id: None, text: text.into() }
    }

    pub fn in_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Default)]
struct TurnProgress {
    conversation_id: Option<ConversationId>,
    usage: Usage,
    saw_usage: bool,
}

struct RoundOutput {
    text: String,
    tool_uses: Vec<(String, String, serde_json::Value)>,
    output_tokens: Option<u32>,
}

/// Drives one user turn: history in, model rounds with tool calls, events out.
pub struct AgentRuntime {
    store: ConversationStore,
    dispatcher: Arc<ToolDispatcher>,
    model: Arc<dyn ModelRuntime>,
    config: AgentConfig,
}

impl AgentRuntime {
    pub fn new(
        store: ConversationStore,
        dispatcher: Arc<ToolDispatcher>,
        model: Arc<dyn ModelRuntime>,
        config: AgentConfig,
    ) -> Self {
        Self { store, dispatcher, model, config }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Runs the turn and sends its events to `events`. Exactly one `Done` or `Error` is
    /// sent last. A closed receiver does not stop the turn; persistence still completes.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<TurnEvent>,
    ) -> Result<ConversationId, InterfaceError> {
        let mut progress = TurnProgress::default();

        match self.drive(&request, &events, &mut progress).await {
            Ok(conversation_id) => {
                let usage = progress.saw_usage.then_some(progress.usage);
                info!(
                    event_name = "agent.turn.completed",
                    conversation_id = %conversation_id,
                    tenant_id = %request.tenant_id,
                    input_tokens = usage.as_ref().map(|usage| usage.input_tokens),
                    output_tokens = usage.as_ref().map(|usage| usage.output_tokens),
                    "turn completed"
                );
                emit(&events, TurnEvent::Done { conversation_id: conversation_id.clone(), usage }).await;
                Ok(conversation_id)
            }
            Err(error) => {
                let correlation_id = progress
                    .conversation_id
                    .as_ref()
                    .map(|id| id.0.clone())
                    .unwrap_or_else(|| format!("turn-{}", new_span_id()));
                warn!(
                    event_name = "agent.turn.failed",
                    correlation_id = %correlation_id,
                    tenant_id = %request.tenant_id,
                    error = %error,
                    "turn failed"
                );
                let interface = error.into_interface(correlation_id);
                emit(&events, TurnEvent::Error { message: interface.user_message().to_string() })
                    .await;
                Err(interface)
            }
        }
    }

    async fn drive(
        &self,
        request: &TurnRequest,
        events: &mpsc::Sender<TurnEvent>,
        progress: &mut TurnProgress,
    ) -> Result<ConversationId, ApplicationError> {
        let (conversation, created) = self
            .store
            .ensure(
                request.conversation_id.as_ref(),
                &request.tenant_id,
                request.user_id.as_ref(),
                request.agent_id.as_deref(),
                &request.text,
            )
            .await?;
        let conversation_id = conversation.id.clone();
        progress.conversation_id = Some(conversation_id.clone());
        if created {
            emit(
                events,
                TurnEvent::ConversationCreated {
                    conversation_id: conversation_id.clone(),
                    title: conversation.title.clone(),
                },
            )
            .await;
        }

        let mut history = self.store.build_request_messages(&conversation_id, &request.text).await?;
        if let Some(user_turn) = history.last() {
            self.store.append_message(user_turn.clone()).await?;
        }

        let tools = self
            .dispatcher
            .schemas(&request.tenant_id)
            .await
            .map_err(|error| ApplicationError::Integration(error.to_string()))?;
        let turn_trace = TraceContext::for_conversation(&conversation_id).child(new_span_id());

        for round in 0..self.config.max_tool_rounds {
            let output = self.run_round(&history, &tools, events, progress).await?;
            debug!(
                event_name = "agent.round.completed",
                conversation_id = %conversation_id,
                round,
                tool_calls = output.tool_uses.len(),
            );

            let mut content = Vec::with_capacity(output.tool_uses.len() + 1);
            if !output.text.is_empty() {
                content.push(ContentBlock::text(output.text));
            }
            for (id, name, input) in &output.tool_uses {
                content.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
            }
            if content.is_empty() {
                return Ok(conversation_id);
            }

            let (assistant, _) = self
                .store
                .append_turn(&conversation_id, MessageRole::Assistant, content, output.output_tokens)
                .await?;
            history.push(assistant);

            if output.tool_uses.is_empty() {
                return Ok(conversation_id);
            }

            let results = self.run_tools(request, output.tool_uses, &turn_trace, events).await;
            let (tool_turn, _) =
                self.store.append_turn(&conversation_id, MessageRole::User, results, None).await?;
            history.push(tool_turn);
        }

        Err(DomainError::InvariantViolation(format!(
            "turn did not finish within {} tool rounds",
            self.config.max_tool_rounds
        ))
        .into())
    }

    async fn run_round(
        &self,
        history: &[Message],
        tools: &[ToolSchema],
        events: &mpsc::Sender<TurnEvent>,
        progress: &mut TurnProgress,
    ) -> Result<RoundOutput, ApplicationError> {
        let request = ModelRequest::new(self.config.system_prompt.clone(), history, tools.to_vec());
        let mut stream = self.model.stream(request).await.map_err(model_failure)?;

        let mut output = RoundOutput { text: String::new(), tool_uses: Vec::new(), output_tokens: None };
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(model_failure)? {
                ModelChunk::TextDelta(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    output.text.push_str(&text);
                    emit(events, TurnEvent::TextDelta { text }).await;
                }
                ModelChunk::ToolUse { id, name, input } => output.tool_uses.push((id, name, input)),
                ModelChunk::Finished { usage } => {
                    output.output_tokens = Some(usage.output_tokens);
                    progress.usage.accumulate(&usage);
                    progress.saw_usage = true;
                }
            }
        }
        Ok(output)
    }

    async fn run_tools(
        &self,
        request: &TurnRequest,
        tool_uses: Vec<(String, String, serde_json::Value)>,
        trace: &TraceContext,
        events: &mpsc::Sender<TurnEvent>,
    ) -> Vec<ContentBlock> {
        let mut results = Vec::with_capacity(tool_uses.len());
        for (call_id, name, input) in tool_uses {
            emit(
                events,
                TurnEvent::ToolStart { call_id: Some(call_id.clone()), name: name.clone(), input: input.clone() },
            )
            .await;

            let context =
                ToolCallContext::new(request.tenant_id.clone(), request.user_id.clone(), trace.clone());
            let result = self.dispatcher.execute(&name, input, &context).await;

            emit(
                events,
                TurnEvent::ToolResult {
                    call_id: Some(call_id.clone()),
                    name,
                    success: result.success,
                    output: result.data.clone(),
                    error: result.error.clone(),
                },
            )
            .await;

            results.push(ContentBlock::ToolResult {
                tool_use_id: call_id,
                content: result.to_model_content(),
                is_error: !result.success,
            });
        }
        results
    }
}

async fn emit(events: &mpsc::Sender<TurnEvent>, event: TurnEvent) {
    let name = event.name();
    if events.send(event).await.is_err() {
        debug!(event_name = "agent.turn.listener_gone", event = name, "turn event dropped");
    }
}

fn model_failure(error: ModelError) -> ApplicationError {
    ApplicationError::ModelRuntime(error.to_string())
}
