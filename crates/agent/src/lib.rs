//! Agent conversation and tool-execution runtime.
//!
//! A turn flows through four pieces:
//! 1. **Timeline** (`timeline`, `session`) - folds streamed [`events::TurnEvent`]s into an
//!    ordered, replayable list of entries.
//! 2. **Registry** (`registry`) - cached system tools merged with tenant custom tools.
//! 3. **Dispatcher** (`dispatcher`, `strategies`, `tools`) - resolves a tool call to a local
//!    handler, RPC procedure, HTTP request or sandboxed query and returns a `ToolResult`.
//! 4. **Store** (`store`) - persists turns as provider content blocks and rebuilds the
//!    request history for the next model call.
//!
//! `runtime::AgentRuntime` drives one turn end to end against a `llm::ModelRuntime`.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod llm;
pub mod registry;
pub mod runtime;
pub mod secrets;
pub mod session;
pub mod store;
pub mod strategies;
pub mod telemetry;
pub mod timeline;
pub mod tools;
pub mod validation;

pub use dispatcher::ToolDispatcher;
pub use error::ToolError;
pub use events::{TurnEvent, Usage};
pub use registry::{ToolCatalog, ToolRegistry};
pub use runtime::{AgentRuntime, TurnRequest};
pub use session::{SessionRegistry, TimelineSession, TurnTicket};
pub use store::ConversationStore;
pub use strategies::ToolCallContext;
pub use timeline::{ConversationTimeline, EntryKind, TimelineEntry, ToolCallStatus};
