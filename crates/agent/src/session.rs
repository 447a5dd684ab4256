use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use shopkeep_core::Message;

use crate::events::TurnEvent;
use crate::timeline::{ConversationTimeline, TimelineError};

/// Session generation captured when a turn began. Events applied with an outdated
/// ticket are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnTicket {
    generation: u64,
}

impl TurnTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Stale,
    ReloadRequired,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriveOutcome {
    Completed,
    Failed(String),
    Superseded,
}

#[derive(Debug)]
struct SessionState {
    timeline: ConversationTimeline,
    generation: u64,
    needs_reload: bool,
}

/// One conversation's timeline behind a single async lock. Every event is applied while
/// holding the lock, so multi-step transitions are never observed half done.
#[derive(Debug)]
pub struct TimelineSession {
    state: Mutex<SessionState>,
}

impl Default for TimelineSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                timeline: ConversationTimeline::new(),
                generation: 0,
                needs_reload: false,
            }),
        }
    }

    pub fn restored(messages: &[Message]) -> Self {
        Self {
            state: Mutex::new(SessionState {
                timeline: ConversationTimeline::restored(messages),
                generation: 0,
                needs_reload: false,
            }),
        }
    }

    /// Opens a turn for `text`. The ticket is scoped to the current reset epoch, not to this
    /// turn: only `reset` and `reload` make it stale, so one stream per turn is the caller's job.
    pub async fn begin_turn(&self, text: &str) -> Result<TurnTicket, TimelineError> {
        let mut state = self.state.lock().await;
        state.timeline.on_user_submit(text)?;
        Ok(TurnTicket { generation: state.generation })
    }

    pub async fn apply(&self, ticket: TurnTicket, event: TurnEvent) -> ApplyOutcome {
        let mut state = self.state.lock().await;
        Self::apply_locked(&mut state, ticket, event)
    }

    /// Decodes one wire event and applies it. A payload that cannot be decoded or applied
    /// flags the session for a full reload instead of leaving it stuck mid-turn.
    pub async fn apply_encoded(&self, ticket: TurnTicket, payload: &str) -> ApplyOutcome {
        let mut state = self.state.lock().await;
        if state.generation != ticket.generation {
            return ApplyOutcome::Stale;
        }

        match serde_json::from_str::<TurnEvent>(payload) {
            Ok(event) => Self::apply_locked(&mut state, ticket, event),
            Err(error) => {
                warn!(
                    event_name = "timeline.event.undecodable",
                    error = %error,
                    "turn event could not be decoded; reload required"
                );
                state.needs_reload = true;
                ApplyOutcome::ReloadRequired
            }
        }
    }

    /// Consumes a turn's event channel until a terminal event. A channel that closes early
    /// is closed out with an error entry so the turn never stays open.
    pub async fn drive(
        &self,
        ticket: TurnTicket,
        mut events: mpsc::Receiver<TurnEvent>,
    ) -> DriveOutcome {
        while let Some(event) = events.recv().await {
            let terminal = match &event {
                TurnEvent::Done { .. } => Some(DriveOutcome::Completed),
                TurnEvent::Error { message } => Some(DriveOutcome::Failed(message.clone())),
                _ => None,
            };

            match self.apply(ticket, event).await {
                ApplyOutcome::Stale => return DriveOutcome::Superseded,
                ApplyOutcome::ReloadRequired => {
                    return DriveOutcome::Failed("timeline needs a reload".to_string())
                }
                ApplyOutcome::Applied => {}
            }
            if let Some(outcome) = terminal {
                return outcome;
            }
        }

        let message = "The response ended unexpectedly.".to_string();
        match self.apply(ticket, TurnEvent::Error { message: message.clone() }).await {
            ApplyOutcome::Stale => DriveOutcome::Superseded,
            _ => DriveOutcome::Failed(message),
        }
    }

    /// Clears the timeline and invalidates every outstanding ticket.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.timeline.clear();
        state.needs_reload = false;
        info!(event_name = "timeline.session.reset", generation = state.generation, "session reset");
    }

    pub async fn reload(&self, messages: &[Message]) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.timeline.restore(messages);
        state.needs_reload = false;
    }

    pub async fn needs_reload(&self) -> bool {
        self.state.lock().await.needs_reload
    }

    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    pub async fn snapshot(&self) -> ConversationTimeline {
        self.state.lock().await.timeline.clone()
    }

    fn apply_locked(state: &mut SessionState, ticket: TurnTicket, event: TurnEvent) -> ApplyOutcome {
        if state.generation != ticket.generation {
            return ApplyOutcome::Stale;
        }

        let name = event.name();
        match state.timeline.apply(event) {
            Ok(()) => ApplyOutcome::Applied,
            Err(TimelineError::NoActiveTurn { .. }) => {
                // Late event for a turn that already closed; dropping it is enough.
                ApplyOutcome::Stale
            }
            Err(error) => {
                warn!(event_name = "timeline.event.failed", event = name, error = %error);
                state.needs_reload = true;
                ApplyOutcome::ReloadRequired
            }
        }
    }
}

/// Hands out one session per conversation key.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<TimelineSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session(&self, key: &str) -> Arc<TimelineSession> {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(key.to_string()).or_insert_with(|| Arc::new(TimelineSession::new())).clone()
    }

    pub async fn remove(&self, key: &str) -> Option<Arc<TimelineSession>> {
        self.sessions.lock().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
