use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::conversation::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Provider-native unit of message content. The serialized shape is the one the
/// model API expects on every (stateless) request, so rows are replayed verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    pub is_tool_use: bool,
    pub tool_names: Option<Vec<String>>,
    pub token_count: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        role: MessageRole,
        content: Vec<ContentBlock>,
        token_count: Option<u32>,
    ) -> Self {
        let tool_names = content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();

        Self {
            id: MessageId::generate(),
            conversation_id,
            role,
            content,
            is_tool_use: !tool_names.is_empty(),
            tool_names: (!tool_names.is_empty()).then_some(tool_names),
            token_count,
            created_at: Utc::now(),
        }
    }

    pub fn user_text(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self::new(conversation_id, MessageRole::User, vec![ContentBlock::text(text)], None)
    }

    /// User rows that only carry tool results back to the model.
    pub fn is_tool_result_turn(&self) -> bool {
        self.role == MessageRole::User
            && self.content.first().map(ContentBlock::is_tool_result).unwrap_or(false)
    }
}
