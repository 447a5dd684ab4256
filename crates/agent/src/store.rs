use std::sync::Arc;

use tracing::{debug, info};

use shopkeep_core::domain::conversation::derive_title;
use shopkeep_core::{
    ApplicationError, ContentBlock, Conversation, ConversationId, DomainError, Message, MessageRole,
    TenantId, UserId,
};
use shopkeep_db::repositories::{ConversationRepository, RepositoryError};

/// Durable conversation history in content-block form.
///
/// Rows are stored exactly as the model API expects them, so replaying a conversation
/// is a straight read in sequence order.
#[derive(Clone)]
pub struct ConversationStore {
    conversations: Arc<dyn ConversationRepository>,
}

impl ConversationStore {
    pub fn new(conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { conversations }
    }

    pub async fn create(
        &self,
        tenant_id: TenantId,
        user_id: Option<UserId>,
        agent_id: Option<String>,
    ) -> Result<Conversation, ApplicationError> {
        let conversation = Conversation::new(tenant_id, user_id, agent_id);
        self.conversations.create(conversation.clone()).await.map_err(persistence)?;
        Ok(conversation)
    }

    /// Returns the existing conversation, or creates one titled after `first_text`.
    /// The flag is true when a conversation was created.
    pub async fn ensure(
        &self,
        conversation_id: Option<&ConversationId>,
        tenant_id: &TenantId,
        user_id: Option<&UserId>,
        agent_id: Option<&str>,
        first_text: &str,
    ) -> Result<(Conversation, bool), ApplicationError> {
        if let Some(id) = conversation_id {
            let conversation = self.get(id).await?;
            if &conversation.tenant_id != tenant_id {
                return Err(DomainError::UnknownConversation(id.0.clone()).into());
            }
            return Ok((conversation, false));
        }

        let mut conversation =
            Conversation::new(tenant_id.clone(), user_id.cloned(), agent_id.map(str::to_string));
        conversation.title = derive_title(first_text);
        self.conversations.create(conversation.clone()).await.map_err(persistence)?;

        info!(
            event_name = "conversation.created",
            conversation_id = %conversation.id,
            tenant_id = %tenant_id,
            "conversation created"
        );
        Ok((conversation, true))
    }

    /// Persists one turn. Returns the stored message with its sequence number.
    pub async fn append_turn(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        content: Vec<ContentBlock>,
        token_count: Option<u32>,
    ) -> Result<(Message, u32), ApplicationError> {
        let message = Message::new(conversation_id.clone(), role, content, token_count);
        let seq = self.append_message(message.clone()).await?;
        Ok((message, seq))
    }

    pub async fn append_message(&self, message: Message) -> Result<u32, ApplicationError> {
        let seq = self.conversations.append_message(message.clone()).await.map_err(|error| {
            match error {
                RepositoryError::NotFound(_) => {
                    DomainError::UnknownConversation(message.conversation_id.0.clone()).into()
                }
                other => persistence(other),
            }
        })?;

        debug!(
            event_name = "conversation.turn_appended",
            conversation_id = %message.conversation_id,
            role = message.role.as_str(),
            seq,
            blocks = message.content.len(),
        );
        Ok(seq)
    }

    /// Full ordered history followed by the new user turn. Nothing is written.
    pub async fn build_request_messages(
        &self,
        conversation_id: &ConversationId,
        new_user_text: &str,
    ) -> Result<Vec<Message>, ApplicationError> {
        let mut messages = self.history(conversation_id).await?;
        messages.push(Message::user_text(conversation_id.clone(), new_user_text));
        Ok(messages)
    }

    /// History for `ConversationTimeline::restore`.
    pub async fn restore_timeline(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.get(conversation_id).await?;
        self.history(conversation_id).await
    }

    pub async fn get(&self, id: &ConversationId) -> Result<Conversation, ApplicationError> {
        self.conversations
            .find_by_id(id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| DomainError::UnknownConversation(id.0.clone()).into())
    }

    /// Most recently active first.
    pub async fn list(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<Conversation>, ApplicationError> {
        self.conversations.list_for_tenant(tenant_id, limit).await.map_err(persistence)
    }

    pub async fn delete(&self, id: &ConversationId) -> Result<bool, ApplicationError> {
        self.conversations.delete(id).await.map_err(persistence)
    }

    async fn history(&self, id: &ConversationId) -> Result<Vec<Message>, ApplicationError> {
        self.conversations.list_messages(id).await.map_err(persistence)
    }
}

fn persistence(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
