use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::conversation::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One dispatched tool call as written to the audit log.
///
/// `args` must already be sanitized; sinks store them as given.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolAuditRecord {
    pub id: String,
    pub action: String,
    pub severity: AuditSeverity,
    pub tenant_id: TenantId,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub args: Value,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ToolAuditRecord {
    pub fn new(
        action: impl Into<String>,
        tenant_id: TenantId,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        parent_span_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action: action.into(),
            severity: AuditSeverity::Info,
            tenant_id,
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id,
            args: Value::Null,
            result: None,
            error: None,
            duration_ms: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_outcome(
        mut self,
        result: Option<Value>,
        error: Option<String>,
        duration_ms: u64,
    ) -> Self {
        self.severity = if error.is_some() { AuditSeverity::Warning } else { AuditSeverity::Info };
        self.result = result;
        self.error = error;
        self.duration_ms = duration_ms;
        self
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: ToolAuditRecord) -> Result<(), AuditError>;
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    records: Arc<Mutex<Vec<ToolAuditRecord>>>,
}

impl InMemoryAuditSink {
    pub fn records(&self) -> Vec<ToolAuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: ToolAuditRecord) -> Result<(), AuditError> {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
        Ok(())
    }
}
