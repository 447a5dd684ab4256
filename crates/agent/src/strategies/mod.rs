//! Execution strategies a registry entry can be dispatched to.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use shopkeep_core::{ExecutionKind, TenantId, ToolRegistryEntry, UserId};

use crate::error::ToolError;
use crate::telemetry::TraceContext;

pub mod http;
pub mod local;
pub mod rpc;
pub mod sql;

pub use http::HttpStrategy;
pub use local::{LocalStrategy, LocalTool};
pub use rpc::{HttpRpcBackend, RpcBackend, RpcStrategy};
pub use sql::SqlStrategy;

/// Caller identity and trace carried through one dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCallContext {
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub trace: TraceContext,
}

impl ToolCallContext {
    pub fn new(tenant_id: TenantId, user_id: Option<UserId>, trace: TraceContext) -> Self {
        Self { tenant_id, user_id, trace }
    }
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> ExecutionKind;

    /// Runs the tool. `args` are already validated and carry injected identity fields.
    async fn execute(
        &self,
        entry: &ToolRegistryEntry,
        args: Value,
        context: &ToolCallContext,
    ) -> Result<Value, ToolError>;
}

/// Parses an entry's `execution_config` into the strategy's typed config.
pub(crate) fn parse_config<T: DeserializeOwned>(entry: &ToolRegistryEntry) -> Result<T, ToolError> {
    serde_json::from_value(entry.execution_config.clone()).map_err(|error| {
        ToolError::Configuration(format!("`{}` has an invalid execution config: {error}", entry.name))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::{json, Value};

    use shopkeep_core::{ExecutionKind, TenantId, ToolRegistryEntry, ToolSource, UserId};

    use super::ToolCallContext;
    use crate::telemetry::TraceContext;

    pub fn entry(name: &str, kind: ExecutionKind, config: Value) -> ToolRegistryEntry {
        ToolRegistryEntry {
            name: name.to_string(),
            category: "test".to_string(),
            description: format!("{name} test tool"),
            input_schema: json!({"type": "object", "properties": {}}),
            execution_kind: kind,
            execution_config: config,
            source: ToolSource::System,
            tenant_id: None,
            requires_tenant_id: true,
            requires_user_id: false,
            is_read_only: true,
            requires_approval: false,
            max_execution_time_ms: 5_000,
            enabled: true,
        }
    }

    pub fn context() -> ToolCallContext {
        ToolCallContext::new(
            TenantId("tenant-demo".to_string()),
            Some(UserId("user-1".to_string())),
            TraceContext::generate(),
        )
    }
}
