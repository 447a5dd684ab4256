pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;

pub use audit::{AuditError, AuditSeverity, AuditSink, InMemoryAuditSink, ToolAuditRecord};
pub use domain::conversation::{Conversation, ConversationId, TenantId, UserId};
pub use domain::message::{ContentBlock, Message, MessageId, MessageRole};
pub use domain::tool::{
    ExecutionKind, ExecutionStatus, ToolExecutionRecord, ToolRegistryEntry, ToolResult,
    ToolSchema, ToolSource,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};

pub use chrono;
