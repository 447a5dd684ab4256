use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Success,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    UserMessage {
        content: String,
    },
    /// Placeholder shown while the model has not produced output yet.
    Thinking,
    ToolCall {
        call_id: Option<String>,
        name: String,
        status: ToolCallStatus,
        input: Value,
        result: Option<Value>,
    },
    AssistantMessage {
        content: String,
        is_streaming: bool,
    },
    Error {
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl TimelineEntry {
    pub fn new(kind: EntryKind) -> Self {
        Self::at(kind, Utc::now())
    }

    pub fn at(kind: EntryKind, timestamp: DateTime<Utc>) -> Self {
        Self { id: Uuid::new_v4(), timestamp, kind }
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self.kind, EntryKind::Thinking)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.kind, EntryKind::AssistantMessage { is_streaming: true, .. })
    }
}

/// Text of the assistant message currently being streamed. Kept apart from the entry
/// list so deltas never touch entries; flushed into the entry when the message ends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamingBuffer {
    text: String,
}

impl StreamingBuffer {
    pub fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}
