use std::collections::HashMap;

use serde_json::Value;

use shopkeep_core::{ContentBlock, Message, MessageRole};

use super::{ConversationTimeline, EntryKind, TimelineEntry, ToolCallStatus, TurnPhase};

impl ConversationTimeline {
    /// Rebuilds the timeline from persisted history, replacing whatever it held.
    ///
    /// User rows that only carry tool results are not rendered. Their outcome is folded into
    /// the matching `ToolCall` entry by `tool_use_id`; calls without a stored result are shown
    /// as succeeded with no result.
    pub fn restore(&mut self, messages: &[Message]) {
        let outcomes = collect_tool_outcomes(messages);
        let mut entries = Vec::new();

        for message in messages {
            if message.is_tool_result_turn() {
                continue;
            }

            for block in &message.content {
                let kind = match (message.role, block) {
                    (MessageRole::User, ContentBlock::Text { text }) => {
                        EntryKind::UserMessage { content: text.clone() }
                    }
                    (MessageRole::Assistant, ContentBlock::Text { text }) => {
                        if text.is_empty() {
                            continue;
                        }
                        EntryKind::AssistantMessage { content: text.clone(), is_streaming: false }
                    }
                    (MessageRole::Assistant, ContentBlock::ToolUse { id, name, input }) => {
                        let (status, result) = outcomes
                            .get(id.as_str())
                            .cloned()
                            .unwrap_or((ToolCallStatus::Success, None));
                        EntryKind::ToolCall {
                            call_id: Some(id.clone()),
                            name: name.clone(),
                            status,
                            input: input.clone(),
                            result,
                        }
                    }
                    _ => continue,
                };
                entries.push(TimelineEntry::at(kind, message.created_at));
            }
        }

        self.clear();
        self.entries = entries;
        self.phase = TurnPhase::Idle;
        self.conversation_id = messages.first().map(|message| message.conversation_id.clone());
    }

    pub fn restored(messages: &[Message]) -> Self {
        let mut timeline = Self::new();
        timeline.restore(messages);
        timeline
    }
}

fn collect_tool_outcomes(messages: &[Message]) -> HashMap<&str, (ToolCallStatus, Option<Value>)> {
    let mut outcomes = HashMap::new();
    for message in messages.iter().filter(|message| message.role == MessageRole::User) {
        for block in &message.content {
            if let ContentBlock::ToolResult { tool_use_id, content, is_error } = block {
                let outcome = if *is_error {
                    (ToolCallStatus::Failed, Some(failure_text(content)))
                } else {
                    (ToolCallStatus::Success, Some(decode_content(content)))
                };
                outcomes.insert(tool_use_id.as_str(), outcome);
            }
        }
    }
    outcomes
}

fn decode_content(content: &str) -> Value {
    serde_json::from_str(content).unwrap_or_else(|_| Value::String(content.to_string()))
}

// Failed results are persisted as the full result envelope; the live view only shows the text.
fn failure_text(content: &str) -> Value {
    match decode_content(content) {
        Value::Object(map) => match map.get("error") {
            Some(Value::String(error)) => Value::String(error.clone()),
            _ => Value::Object(map),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use shopkeep_core::{ContentBlock, ConversationId, Message, MessageRole, ToolResult};

    use crate::timeline::{ConversationTimeline, EntryKind, ToolCallStatus, TurnPhase};

    fn conversation() -> ConversationId {
        ConversationId("c-restore".to_string())
    }

    fn history() -> Vec<Message> {
        let conversation_id = conversation();
        vec![
            Message::user_text(conversation_id.clone(), "check my stock"),
            Message::new(
                conversation_id.clone(),
                MessageRole::Assistant,
                vec![
                    ContentBlock::text("Let me look."),
                    ContentBlock::ToolUse {
                        id: "toolu_1".to_string(),
                        name: "inventory".to_string(),
                        input: json!({"action": "summary"}),
                    },
                ],
                None,
            ),
            Message::new(
                conversation_id.clone(),
                MessageRole::User,
                vec![ContentBlock::ToolResult {
                    tool_use_id: "toolu_1".to_string(),
                    content: ToolResult::ok(json!({"total_units": 169})).to_model_content(),
                    is_error: false,
                }],
                None,
            ),
            Message::new(
                conversation_id,
                MessageRole::Assistant,
                vec![ContentBlock::text("You have 169 units.")],
                Some(20),
            ),
        ]
    }

    #[test]
    fn tool_result_turns_are_folded_into_tool_calls() {
        let timeline = ConversationTimeline::restored(&history());
        let kinds: Vec<_> = timeline.entries().iter().map(|entry| entry.kind.clone()).collect();

        assert_eq!(
            kinds,
            vec![
                EntryKind::UserMessage { content: "check my stock".to_string() },
                EntryKind::AssistantMessage {
                    content: "Let me look.".to_string(),
                    is_streaming: false
                },
                EntryKind::ToolCall {
                    call_id: Some("toolu_1".to_string()),
                    name: "inventory".to_string(),
                    status: ToolCallStatus::Success,
                    input: json!({"action": "summary"}),
                    result: Some(json!({"total_units": 169})),
                },
                EntryKind::AssistantMessage {
                    content: "You have 169 units.".to_string(),
                    is_streaming: false
                },
            ]
        );
        assert_eq!(timeline.phase(), TurnPhase::Idle);
        assert_eq!(timeline.conversation_id(), Some(&conversation()));
    }

    #[test]
    fn failed_results_restore_as_failed_with_error_text() {
        let conversation_id = conversation();
        let messages = vec![
            Message::new(
                conversation_id.clone(),
                MessageRole::Assistant,
                vec![ContentBlock::ToolUse {
                    id: "toolu_2".to_string(),
                    name: "orders".to_string(),
                    input: json!({"action": "get", "order_id": "nope"}),
                }],
                None,
            ),
            Message::new(
                conversation_id,
                MessageRole::User,
                vec![ContentBlock::ToolResult {
                    tool_use_id: "toolu_2".to_string(),
                    content: ToolResult::failure("order nope was not found").to_model_content(),
                    is_error: true,
                }],
                None,
            ),
        ];

        let timeline = ConversationTimeline::restored(&messages);
        assert_eq!(timeline.entries().len(), 1);
        assert!(matches!(
            &timeline.entries()[0].kind,
            EntryKind::ToolCall { status: ToolCallStatus::Failed, result: Some(result), .. }
                if result == &json!("order nope was not found")
        ));
    }

    #[test]
    fn tool_use_without_stored_result_defaults_to_success() {
        let messages = vec![Message::new(
            conversation(),
            MessageRole::Assistant,
            vec![ContentBlock::ToolUse {
                id: "toolu_3".to_string(),
                name: "customers".to_string(),
                input: json!({"action": "search", "query": "ada"}),
            }],
            None,
        )];

        let timeline = ConversationTimeline::restored(&messages);
        assert!(matches!(
            &timeline.entries()[0].kind,
            EntryKind::ToolCall { status: ToolCallStatus::Success, result: None, .. }
        ));
    }

    #[test]
    fn restore_replaces_an_in_flight_turn() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("abandoned").expect("submit");
        timeline.on_text_delta("half").expect("delta");

        timeline.restore(&history());

        assert_eq!(timeline.phase(), TurnPhase::Idle);
        assert_eq!(timeline.streaming_text(), "");
        assert!(timeline.entries().iter().all(|entry| !entry.is_thinking() && !entry.is_streaming()));
        timeline.on_user_submit("next").expect("new turn after restore");
    }
}
