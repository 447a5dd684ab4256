use std::sync::Arc;

use anyhow::{ensure, Context};
use serde_json::{json, Value};
use shopkeep_agent::{ConversationStore, ConversationTimeline};
use shopkeep_core::{ConversationId, TenantId};
use shopkeep_db::repositories::SqlConversationRepository;
use shopkeep_db::DbPool;

use crate::commands::{with_migrated_pool, CommandResult};

/// Lists recent conversations, or replays one conversation as timeline entries.
pub fn run(tenant: &str, conversation: Option<&str>, limit: u32) -> CommandResult {
    let tenant_id = TenantId(tenant.to_string());
    let conversation_id = conversation.map(|id| ConversationId(id.to_string()));

    let result = with_migrated_pool("history", |_, pool| async move {
        let outcome = match &conversation_id {
            Some(id) => replay(pool, &tenant_id, id).await,
            None => recent(pool, &tenant_id, limit).await,
        };
        outcome.map_err(|error| ("history", format!("{error:#}"), 5u8))
    });

    match result {
        Ok((_, (message, data))) => CommandResult::success_with_data("history", message, Some(data)),
        Err(failure) => failure,
    }
}

async fn recent(pool: DbPool, tenant_id: &TenantId, limit: u32) -> anyhow::Result<(String, Value)> {
    let store = ConversationStore::new(Arc::new(SqlConversationRepository::new(pool)));
    let conversations = store
        .list(tenant_id, limit.clamp(1, 200))
        .await
        .with_context(|| format!("listing conversations for `{tenant_id}`"))?;

    let rows: Vec<Value> = conversations
        .iter()
        .map(|conversation| {
            json!({
                "id": conversation.id,
                "title": conversation.title,
                "updated_at": conversation.updated_at,
            })
        })
        .collect();
    Ok((format!("{} conversations for `{tenant_id}`", rows.len()), Value::Array(rows)))
}

async fn replay(
    pool: DbPool,
    tenant_id: &TenantId,
    conversation_id: &ConversationId,
) -> anyhow::Result<(String, Value)> {
    let store = ConversationStore::new(Arc::new(SqlConversationRepository::new(pool)));
    let conversation = store
        .get(conversation_id)
        .await
        .with_context(|| format!("loading conversation `{conversation_id}`"))?;
    ensure!(
        &conversation.tenant_id == tenant_id,
        "conversation `{conversation_id}` does not belong to `{tenant_id}`"
    );

    let messages = store.restore_timeline(conversation_id).await.context("loading turns")?;
    let timeline = ConversationTimeline::restored(&messages);
    let entries = serde_json::to_value(timeline.entries()).context("encoding timeline")?;
    Ok((
        format!("{} timeline entries from {} turns", timeline.entries().len(), messages.len()),
        json!({"conversation": conversation, "entries": entries}),
    ))
}
