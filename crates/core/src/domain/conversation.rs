use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub agent_id: Option<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(tenant_id: TenantId, user_id: Option<UserId>, agent_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::generate(),
            tenant_id,
            user_id,
            agent_id,
            title: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub const TITLE_MAX_CHARS: usize = 60;

/// Title shown in conversation lists, taken from the first user message.
pub fn derive_title(first_user_text: &str) -> Option<String> {
    let first_line = first_user_text.lines().map(str::trim).find(|line| !line.is_empty())?;
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return Some(collapsed);
    }

    let truncated: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    Some(format!("{}...", truncated.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::{derive_title, TITLE_MAX_CHARS};

    #[test]
    fn title_uses_first_non_empty_line_with_collapsed_whitespace() {
        let title = derive_title("\n\n  check   my\tstock \nand the orders");
        assert_eq!(title.as_deref(), Some("check my stock"));
    }

    #[test]
    fn long_titles_are_truncated_on_char_boundaries() {
        let text = "é".repeat(TITLE_MAX_CHARS + 10);
        let title = derive_title(&text).expect("title");
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn blank_text_has_no_title() {
        assert_eq!(derive_title("   \n\t "), None);
    }
}
