use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::conversation::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Local,
    Rpc,
    Http,
    Sql,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Rpc => "rpc",
            Self::Http => "http",
            Self::Sql => "sql",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "rpc" => Some(Self::Rpc),
            "http" => Some(Self::Http),
            "sql" => Some(Self::Sql),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    System,
    Custom,
}

impl ToolSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Self::System),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// One tool the model may request.
///
/// `execution_config` is strategy specific (rpc procedure, http template, sql template)
/// and is only interpreted by the strategy that owns `execution_kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRegistryEntry {
    pub name: String,
    pub category: String,
    pub description: String,
    pub input_schema: Value,
    pub execution_kind: ExecutionKind,
    pub execution_config: Value,
    pub source: ToolSource,
    pub tenant_id: Option<TenantId>,
    pub requires_tenant_id: bool,
    pub requires_user_id: bool,
    pub is_read_only: bool,
    pub requires_approval: bool,
    pub max_execution_time_ms: u64,
    pub enabled: bool,
}

impl ToolRegistryEntry {
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// What the model provider sees for each tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), ..Self::default() }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), ..Self::default() }
    }

    pub fn pending_approval(execution_id: impl Into<String>) -> Self {
        Self {
            success: false,
            pending_approval: true,
            execution_id: Some(execution_id.into()),
            error: Some("tool requires approval before it can run".to_string()),
            ..Self::default()
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    /// Text handed back to the model as the tool_result content.
    pub fn to_model_content(&self) -> String {
        if self.success {
            self.data
                .as_ref()
                .map(|data| serde_json::to_string(data).unwrap_or_else(|_| data.to_string()))
                .unwrap_or_else(|| "null".to_string())
        } else {
            serde_json::to_string(self).unwrap_or_else(|_| {
                self.error.clone().unwrap_or_else(|| "tool execution failed".to_string())
            })
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionRecord {
    pub id: String,
    pub tool_id: String,
    pub tenant_id: TenantId,
    pub input_args: Value,
    pub status: ExecutionStatus,
    pub output_result: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolExecutionRecord {
    pub fn new(
        tool_id: impl Into<String>,
        tenant_id: TenantId,
        input_args: Value,
        status: ExecutionStatus,
        trace_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tool_id: tool_id.into(),
            tenant_id,
            input_args,
            status,
            output_result: None,
            error: None,
            execution_time_ms: 0,
            trace_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn complete(&mut self, result: &ToolResult, execution_time_ms: u64) {
        self.status =
            if result.success { ExecutionStatus::Success } else { ExecutionStatus::Failed };
        self.output_result = result.data.clone();
        self.error = result.error.clone();
        self.execution_time_ms = execution_time_ms;
        self.updated_at = Utc::now();
    }
}
