use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use shopkeep_core::ConversationId;

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEY_FRAGMENTS: &[&str] =
    &["password", "secret", "token", "api_key", "apikey", "authorization", "credential"];

/// Links every tool call of one conversation session. `parent_span_id` is the span of
/// the caller (the model round that requested the tool), when known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    pub fn generate() -> Self {
        Self { trace_id: Uuid::new_v4().to_string(), parent_span_id: None }
    }

    /// The trace id is the conversation id, so it stays stable across turns and restarts.
    pub fn for_conversation(conversation_id: &ConversationId) -> Self {
        Self { trace_id: conversation_id.0.clone(), parent_span_id: None }
    }

    pub fn child(&self, parent_span_id: impl Into<String>) -> Self {
        Self { trace_id: self.trace_id.clone(), parent_span_id: Some(parent_span_id.into()) }
    }
}

pub fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Copy of `args` with every secret-looking key replaced, at any depth.
pub fn sanitize_args(args: &Value) -> Value {
    match args {
        Value::Object(map) => {
            let sanitized: Map<String, Value> = map
                .iter()
                .map(|(key, value)| {
                    let value = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_args(value)
                    };
                    (key.clone(), value)
                })
                .collect();
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_args).collect()),
        other => other.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|fragment| key.contains(fragment))
}

/// `tool.<name>` or `tool.<name>.<action>` for consolidated tools.
pub fn audit_action(tool_name: &str, args: &Value) -> String {
    match args.get("action").and_then(Value::as_str) {
        Some(action) if !action.is_empty() => format!("tool.{tool_name}.{action}"),
        _ => format!("tool.{tool_name}"),
    }
}
