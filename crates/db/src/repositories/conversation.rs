use sqlx::{sqlite::SqliteRow, Row};

use shopkeep_core::{
    ContentBlock, Conversation, ConversationId, Message, MessageId, MessageRole, TenantId, UserId,
};

use super::decode::{encode_json, parse_json, parse_optional_json, parse_timestamp, parse_u32};
use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO conversation (id, tenant_id, user_id, agent_id, title, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id.0)
        .bind(&conversation.tenant_id.0)
        .bind(conversation.user_id.as_ref().map(|user| user.0.as_str()))
        .bind(conversation.agent_id.as_deref())
        .bind(conversation.title.as_deref())
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, user_id, agent_id, title, created_at, updated_at
             FROM conversation
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, user_id, agent_id, title, created_at, updated_at
             FROM conversation
             WHERE tenant_id = ?
             ORDER BY updated_at DESC, id ASC
             LIMIT ?",
        )
        .bind(&tenant_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(conversation_from_row).collect()
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM conversation WHERE id = ?").bind(&id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(&self, message: Message) -> Result<u32, RepositoryError> {
        let content_json = encode_json("content_json", &message.content)?;
        let tool_names_json = message
            .tool_names
            .as_ref()
            .map(|names| encode_json("tool_names_json", names))
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM conversation WHERE id = ?1)")
                .bind(&message.conversation_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if exists == 0 {
            return Err(RepositoryError::NotFound(format!(
                "conversation `{}`",
                message.conversation_id
            )));
        }

        let seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM conversation_message WHERE conversation_id = ?1",
        )
        .bind(&message.conversation_id.0)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversation_message (
                id,
                conversation_id,
                seq,
                role,
                content_json,
                is_tool_use,
                tool_names_json,
                token_count,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(seq)
        .bind(message.role.as_str())
        .bind(&content_json)
        .bind(message.is_tool_use)
        .bind(tool_names_json.as_deref())
        .bind(message.token_count.map(i64::from))
        .bind(message.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversation SET updated_at = ?2 WHERE id = ?1")
            .bind(&message.conversation_id.0)
            .bind(message.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        parse_u32("seq", seq)
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                conversation_id,
                role,
                content_json,
                is_tool_use,
                tool_names_json,
                token_count,
                created_at
             FROM conversation_message
             WHERE conversation_id = ?
             ORDER BY seq ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        user_id: row.try_get::<Option<String>, _>("user_id")?.map(UserId),
        agent_id: row.try_get("agent_id")?,
        title: row.try_get("title")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let content: Vec<ContentBlock> =
        parse_json("content_json", &row.try_get::<String, _>("content_json")?)?;

    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        role,
        content,
        is_tool_use: row.try_get("is_tool_use")?,
        tool_names: parse_optional_json("tool_names_json", row.try_get("tool_names_json")?)?,
        token_count: row
            .try_get::<Option<i64>, _>("token_count")?
            .map(|value| parse_u32("token_count", value))
            .transpose()?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
