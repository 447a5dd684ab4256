use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use shopkeep_core::{
    Conversation, ConversationId, ExecutionStatus, Message, TenantId, ToolExecutionRecord,
    ToolRegistryEntry, ToolSource,
};

use super::{
    ConversationRepository, RepositoryError, ToolDefinitionRepository, ToolExecutionRepository,
};

#[derive(Default)]
struct ConversationState {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    state: RwLock<ConversationState>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.conversations.contains_key(&conversation.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "conversation `{}` already exists",
                conversation.id
            )));
        }
        state.conversations.insert(conversation.id.0.clone(), conversation);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.conversations.get(&id.0).cloned())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let state = self.state.read().await;
        let mut conversations: Vec<_> = state
            .conversations
            .values()
            .filter(|conversation| &conversation.tenant_id == tenant_id)
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.0.cmp(&b.id.0)));
        conversations.truncate(limit as usize);
        Ok(conversations)
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        state.messages.remove(&id.0);
        Ok(state.conversations.remove(&id.0).is_some())
    }

    async fn append_message(&self, message: Message) -> Result<u32, RepositoryError> {
        let mut state = self.state.write().await;
        let conversation =
            state.conversations.get_mut(&message.conversation_id.0).ok_or_else(|| {
                RepositoryError::NotFound(format!("conversation `{}`", message.conversation_id))
            })?;
        conversation.updated_at = message.created_at;

        let messages = state.messages.entry(message.conversation_id.0.clone()).or_default();
        messages.push(message);
        Ok(messages.len() as u32)
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.messages.get(&id.0).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryToolDefinitionRepository {
    entries: RwLock<Vec<ToolRegistryEntry>>,
}

impl InMemoryToolDefinitionRepository {
    pub fn with_entries(entries: Vec<ToolRegistryEntry>) -> Self {
        Self { entries: RwLock::new(entries) }
    }
}

#[async_trait::async_trait]
impl ToolDefinitionRepository for InMemoryToolDefinitionRepository {
    async fn list_system(&self) -> Result<Vec<ToolRegistryEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| entry.source == ToolSource::System).cloned().collect())
    }

    async fn list_custom(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ToolRegistryEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|entry| {
                entry.source == ToolSource::Custom && entry.tenant_id.as_ref() == Some(tenant_id)
            })
            .cloned()
            .collect())
    }

    async fn save(&self, entry: ToolRegistryEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries.retain(|existing| {
            !(existing.name == entry.name
                && existing.source == entry.source
                && existing.tenant_id == entry.tenant_id)
        });
        entries.push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryToolExecutionRepository {
    records: RwLock<HashMap<String, ToolExecutionRecord>>,
    claimed: RwLock<HashSet<String>>,
}

#[async_trait::async_trait]
impl ToolExecutionRepository for InMemoryToolExecutionRepository {
    async fn save(&self, record: ToolExecutionRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ToolExecutionRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn list_recent(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ToolExecutionRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut recent: Vec<_> =
            records.values().filter(|record| &record.tenant_id == tenant_id).cloned().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit as usize);
        Ok(recent)
    }

    async fn claim_approved(&self, id: &str, tenant_id: &TenantId) -> Result<bool, RepositoryError> {
        let mut claimed = self.claimed.write().await;
        let records = self.records.read().await;
        let approved = records.get(id).is_some_and(|record| {
            &record.tenant_id == tenant_id && record.status == ExecutionStatus::Running
        });
        Ok(approved && claimed.insert(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use shopkeep_core::{Conversation, ConversationId, Message, TenantId};

    use crate::repositories::{
        ConversationRepository, InMemoryConversationRepository, RepositoryError,
    };

    #[tokio::test]
    async fn in_memory_conversation_repo_matches_sql_contract() {
        let repo = InMemoryConversationRepository::default();
        let conversation = Conversation::new(TenantId("tenant-1".to_string()), None, None);
        repo.create(conversation.clone()).await.expect("create");

        let first = Message::user_text(conversation.id.clone(), "one");
        let second = Message::user_text(conversation.id.clone(), "two");
        assert_eq!(repo.append_message(first.clone()).await.expect("append"), 1);
        assert_eq!(repo.append_message(second.clone()).await.expect("append"), 2);

        let replayed = repo.list_messages(&conversation.id).await.expect("list");
        assert_eq!(replayed, vec![first, second.clone()]);

        let found = repo.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(found.updated_at, second.created_at);

        let missing = repo
            .append_message(Message::user_text(ConversationId("missing".to_string()), "x"))
            .await
            .expect_err("missing conversation");
        assert!(matches!(missing, RepositoryError::NotFound(_)));
    }
}
