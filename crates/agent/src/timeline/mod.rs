//! Live view of a conversation.
//!
//! `ConversationTimeline` consumes the events of one turn at a time and keeps an ordered
//! list of entries. Entries are only appended, replaced in place of the `Thinking`
//! placeholder, or removed when an assistant message ends up empty; they are never
//! reordered. At most one `Thinking` and one streaming assistant message exist at once.

mod entry;
mod restore;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub use entry::{EntryKind, StreamingBuffer, TimelineEntry, ToolCallStatus};

use shopkeep_core::ConversationId;

use crate::events::{TurnEvent, Usage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Thinking,
    Streaming,
    ToolRunning,
    Failed,
}

impl TurnPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Thinking | Self::Streaming | Self::ToolRunning)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TimelineError {
    #[error("`{event}` arrived with no turn in progress")]
    NoActiveTurn { event: &'static str },
    #[error("a turn is already in progress")]
    TurnInProgress,
}

#[derive(Clone, Debug)]
pub struct ConversationTimeline {
    entries: Vec<TimelineEntry>,
    buffer: StreamingBuffer,
    phase: TurnPhase,
    conversation_id: Option<ConversationId>,
    last_usage: Option<Usage>,
    last_error: Option<String>,
}

impl Default for ConversationTimeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationTimeline {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            buffer: StreamingBuffer::default(),
            phase: TurnPhase::Idle,
            conversation_id: None,
            last_usage: None,
            last_error: None,
        }
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Text streamed so far for the live assistant message.
    pub fn streaming_text(&self) -> &str {
        self.buffer.as_str()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    pub fn last_usage(&self) -> Option<&Usage> {
        self.last_usage.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn on_user_submit(&mut self, text: &str) -> Result<(), TimelineError> {
        if self.phase.is_active() {
            return Err(TimelineError::TurnInProgress);
        }

        self.buffer.clear();
        self.last_error = None;
        self.entries.push(TimelineEntry::new(EntryKind::UserMessage { content: text.to_string() }));
        self.entries.push(TimelineEntry::new(EntryKind::Thinking));
        self.phase = TurnPhase::Thinking;
        Ok(())
    }

    pub fn on_text_delta(&mut self, text: &str) -> Result<(), TimelineError> {
        self.require_active("text_delta")?;

        if self.streaming_index().is_none() {
            self.replace_thinking(EntryKind::AssistantMessage {
                content: String::new(),
                is_streaming: true,
            });
        }
        self.buffer.push(text);
        self.phase = TurnPhase::Streaming;
        Ok(())
    }

    pub fn on_tool_start(
        &mut self,
        call_id: Option<String>,
        name: &str,
        input: Value,
    ) -> Result<(), TimelineError> {
        self.require_active("tool_start")?;

        self.finalize_streaming();
        self.replace_thinking(EntryKind::ToolCall {
            call_id,
            name: name.to_string(),
            status: ToolCallStatus::Running,
            input,
            result: None,
        });
        self.entries.push(TimelineEntry::new(EntryKind::Thinking));
        self.phase = TurnPhase::ToolRunning;
        Ok(())
    }

    /// Completes the matching running tool call. Returns `false` when no running call
    /// matches; the result is then dropped.
    pub fn on_tool_result(
        &mut self,
        call_id: Option<&str>,
        name: &str,
        success: bool,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<bool, TimelineError> {
        self.require_active("tool_result")?;

        let Some(index) = self.find_running_call(call_id, name) else {
            warn!(
                event_name = "timeline.tool_result.unmatched",
                tool = name,
                call_id = call_id.unwrap_or("none"),
                "tool result did not match a running tool call"
            );
            return Ok(false);
        };

        if let EntryKind::ToolCall { status, result, .. } = &mut self.entries[index].kind {
            *status = if success { ToolCallStatus::Success } else { ToolCallStatus::Failed };
            *result = if success { output } else { error.map(Value::String).or(output) };
        }

        if !self.has_running_calls() && self.phase == TurnPhase::ToolRunning {
            self.phase = TurnPhase::Thinking;
        }
        Ok(true)
    }

    pub fn on_done(
        &mut self,
        conversation_id: ConversationId,
        usage: Option<Usage>,
    ) -> Result<(), TimelineError> {
        self.require_active("done")?;

        self.finalize_streaming();
        self.entries.retain(|entry| !entry.is_thinking());
        self.conversation_id = Some(conversation_id);
        self.last_usage = usage;
        self.phase = TurnPhase::Idle;
        Ok(())
    }

    pub fn on_error(&mut self, message: &str) -> Result<(), TimelineError> {
        self.require_active("error")?;

        self.finalize_streaming();
        self.replace_thinking(EntryKind::Error { message: message.to_string() });
        self.last_error = Some(message.to_string());
        self.phase = TurnPhase::Failed;
        Ok(())
    }

    pub fn apply(&mut self, event: TurnEvent) -> Result<(), TimelineError> {
        match event {
            TurnEvent::ConversationCreated { conversation_id, .. } => {
                self.conversation_id = Some(conversation_id);
                Ok(())
            }
            TurnEvent::TextDelta { text } => self.on_text_delta(&text),
            TurnEvent::ToolStart { call_id, name, input } => {
                self.on_tool_start(call_id, &name, input)
            }
            TurnEvent::ToolResult { call_id, name, success, output, error } => {
                self.on_tool_result(call_id.as_deref(), &name, success, output, error).map(|_| ())
            }
            TurnEvent::Done { conversation_id, usage } => self.on_done(conversation_id, usage),
            TurnEvent::Error { message } => self.on_error(&message),
        }
    }

    /// Drops all state, including any turn in progress.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn require_active(&self, event: &'static str) -> Result<(), TimelineError> {
        if self.phase.is_active() {
            Ok(())
        } else {
            debug!(event_name = "timeline.event.rejected", event, "late event rejected");
            Err(TimelineError::NoActiveTurn { event })
        }
    }

    fn thinking_index(&self) -> Option<usize> {
        self.entries.iter().rposition(TimelineEntry::is_thinking)
    }

    fn streaming_index(&self) -> Option<usize> {
        self.entries.iter().rposition(TimelineEntry::is_streaming)
    }

    /// Swaps the live `Thinking` entry for `kind` in one step, or appends when there is none.
    fn replace_thinking(&mut self, kind: EntryKind) {
        match self.thinking_index() {
            Some(index) => self.entries[index] = TimelineEntry::new(kind),
            None => self.entries.push(TimelineEntry::new(kind)),
        }
    }

    fn finalize_streaming(&mut self) {
        let text = self.buffer.take();
        let Some(index) = self.streaming_index() else {
            return;
        };

        if text.is_empty() {
            self.entries.remove(index);
            return;
        }
        if let EntryKind::AssistantMessage { content, is_streaming } = &mut self.entries[index].kind
        {
            *content = text;
            *is_streaming = false;
        }
    }

    fn find_running_call(&self, call_id: Option<&str>, name: &str) -> Option<usize> {
        let running = |entry: &TimelineEntry| {
            matches!(entry.kind, EntryKind::ToolCall { status: ToolCallStatus::Running, .. })
        };

        if let Some(call_id) = call_id {
            let by_id = self.entries.iter().rposition(|entry| {
                running(entry)
                    && matches!(&entry.kind, EntryKind::ToolCall { call_id: Some(id), .. } if id == call_id)
            });
            if by_id.is_some() {
                return by_id;
            }
        }

        self.entries.iter().rposition(|entry| {
            running(entry)
                && matches!(&entry.kind, EntryKind::ToolCall { name: entry_name, .. } if entry_name == name)
        })
    }

    fn has_running_calls(&self) -> bool {
        self.entries.iter().any(|entry| {
            matches!(entry.kind, EntryKind::ToolCall { status: ToolCallStatus::Running, .. })
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use shopkeep_core::ConversationId;

    use super::{ConversationTimeline, EntryKind, TimelineError, ToolCallStatus, TurnPhase};
    use crate::events::{TurnEvent, Usage};

    fn thinking_count(timeline: &ConversationTimeline) -> usize {
        timeline.entries().iter().filter(|entry| entry.is_thinking()).count()
    }

    fn streaming_count(timeline: &ConversationTimeline) -> usize {
        timeline.entries().iter().filter(|entry| entry.is_streaming()).count()
    }

    #[test]
    fn submit_appends_user_message_and_thinking() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("check my stock").expect("submit");

        assert!(matches!(
            &timeline.entries()[0].kind,
            EntryKind::UserMessage { content } if content == "check my stock"
        ));
        assert!(timeline.entries()[1].is_thinking());
        assert_eq!(timeline.phase(), TurnPhase::Thinking);
    }

    #[test]
    fn first_delta_replaces_thinking_in_place() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("hi").expect("submit");
        let thinking_position = timeline.entries().len() - 1;

        timeline.on_text_delta("Hel").expect("delta");
        timeline.on_text_delta("lo").expect("delta");

        assert_eq!(timeline.entries().len(), 2);
        assert!(timeline.entries()[thinking_position].is_streaming());
        assert_eq!(thinking_count(&timeline), 0);
        assert_eq!(streaming_count(&timeline), 1);
        assert_eq!(timeline.streaming_text(), "Hello");
    }

    #[test]
    fn at_most_one_thinking_and_one_streaming_across_tool_rounds() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("check my stock").expect("submit");

        let events = vec![
            TurnEvent::TextDelta { text: "Let me look.".to_string() },
            TurnEvent::ToolStart {
                call_id: Some("toolu_1".to_string()),
                name: "inventory".to_string(),
                input: json!({"action": "summary"}),
            },
            TurnEvent::ToolResult {
                call_id: Some("toolu_1".to_string()),
                name: "inventory".to_string(),
                success: true,
                output: Some(json!({"total_units": 169})),
                error: None,
            },
            TurnEvent::TextDelta { text: "You have ".to_string() },
            TurnEvent::TextDelta { text: "169 units.".to_string() },
        ];
        for event in events {
            timeline.apply(event).expect("apply");
            assert!(thinking_count(&timeline) <= 1);
            assert!(streaming_count(&timeline) <= 1);
        }

        timeline
            .on_done(ConversationId("c-1".to_string()), Some(Usage::default()))
            .expect("done");

        let kinds: Vec<_> = timeline.entries().iter().map(|entry| &entry.kind).collect();
        assert_eq!(kinds.len(), 4);
        assert!(matches!(kinds[1], EntryKind::AssistantMessage { content, is_streaming: false } if content == "Let me look."));
        assert!(matches!(kinds[2], EntryKind::ToolCall { status: ToolCallStatus::Success, .. }));
        assert!(matches!(kinds[3], EntryKind::AssistantMessage { content, is_streaming: false } if content == "You have 169 units."));
        assert_eq!(timeline.phase(), TurnPhase::Idle);
        assert_eq!(timeline.streaming_text(), "");
    }

    #[test]
    fn empty_streamed_message_is_removed_on_done() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("hi").expect("submit");
        timeline.on_text_delta("").expect("empty delta");
        timeline.on_done(ConversationId("c-1".to_string()), None).expect("done");

        assert_eq!(timeline.entries().len(), 1);
        assert!(matches!(timeline.entries()[0].kind, EntryKind::UserMessage { .. }));
    }

    #[test]
    fn call_id_match_beats_most_recent_name_match() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("two lookups").expect("submit");
        timeline
            .on_tool_start(Some("a".to_string()), "inventory", json!({"sku": "A"}))
            .expect("start a");
        timeline
            .on_tool_start(Some("b".to_string()), "inventory", json!({"sku": "B"}))
            .expect("start b");

        let matched = timeline
            .on_tool_result(Some("a"), "inventory", false, None, Some("boom".to_string()))
            .expect("result");
        assert!(matched);

        let calls: Vec<_> = timeline
            .entries()
            .iter()
            .filter_map(|entry| match &entry.kind {
                EntryKind::ToolCall { call_id, status, result, .. } => {
                    Some((call_id.clone(), *status, result.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            calls,
            vec![
                (Some("a".to_string()), ToolCallStatus::Failed, Some(json!("boom"))),
                (Some("b".to_string()), ToolCallStatus::Running, None),
            ]
        );
    }

    #[test]
    fn result_without_call_id_falls_back_to_most_recent_running_by_name() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("two lookups").expect("submit");
        timeline.on_tool_start(None, "orders", json!({})).expect("start 1");
        timeline.on_tool_start(None, "orders", json!({})).expect("start 2");

        timeline.on_tool_result(None, "orders", true, Some(json!([])), None).expect("result");

        let statuses: Vec<_> = timeline
            .entries()
            .iter()
            .filter_map(|entry| match &entry.kind {
                EntryKind::ToolCall { status, .. } => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![ToolCallStatus::Running, ToolCallStatus::Success]);
    }

    #[test]
    fn unmatched_result_is_ignored() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("hi").expect("submit");
        let before = timeline.entries().to_vec();

        let matched = timeline
            .on_tool_result(Some("ghost"), "inventory", true, Some(json!({})), None)
            .expect("result");

        assert!(!matched);
        assert_eq!(timeline.entries(), before.as_slice());
    }

    #[test]
    fn error_replaces_thinking_and_sets_banner() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("hi").expect("submit");
        timeline.on_text_delta("partial").expect("delta");
        timeline.on_tool_start(None, "inventory", json!({})).expect("tool");
        timeline.on_error("The assistant is temporarily unavailable.").expect("error");

        let last = timeline.entries().last().expect("entry");
        assert!(matches!(&last.kind, EntryKind::Error { message } if message.contains("unavailable")));
        assert_eq!(thinking_count(&timeline), 0);
        assert_eq!(timeline.last_error(), Some("The assistant is temporarily unavailable."));
        assert_eq!(timeline.phase(), TurnPhase::Failed);
    }

    #[test]
    fn events_after_terminal_are_rejected_until_next_submit() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("hi").expect("submit");
        timeline.on_done(ConversationId("c-1".to_string()), None).expect("done");

        assert_eq!(
            timeline.on_text_delta("late"),
            Err(TimelineError::NoActiveTurn { event: "text_delta" })
        );
        assert_eq!(
            timeline.on_error("late"),
            Err(TimelineError::NoActiveTurn { event: "error" })
        );

        timeline.on_user_submit("again").expect("second submit");
        assert_eq!(timeline.on_user_submit("overlap"), Err(TimelineError::TurnInProgress));
    }

    #[test]
    fn done_records_conversation_and_usage() {
        let mut timeline = ConversationTimeline::new();
        timeline.on_user_submit("hi").expect("submit");
        timeline
            .apply(TurnEvent::Done {
                conversation_id: ConversationId("c-9".to_string()),
                usage: Some(Usage { input_tokens: 12, output_tokens: 3, cost: Some(0.002) }),
            })
            .expect("done");

        assert_eq!(timeline.conversation_id(), Some(&ConversationId("c-9".to_string())));
        assert_eq!(timeline.last_usage().map(|usage| usage.output_tokens), Some(3));
    }
}
