use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use shopkeep_core::{ExecutionKind, ToolRegistryEntry};

use super::{ExecutionStrategy, ToolCallContext};
use crate::error::ToolError;

/// In-process tool handler.
#[async_trait]
pub trait LocalTool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, args: Value, context: &ToolCallContext) -> Result<Value, ToolError>;
}

/// Dispatches `local` entries to handlers registered under the same name.
#[derive(Default)]
pub struct LocalStrategy {
    tools: HashMap<String, Arc<dyn LocalTool>>,
}

impl LocalStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: LocalTool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn with_tool<T>(mut self, tool: T) -> Self
    where
        T: LocalTool + 'static,
    {
        self.register(tool);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ExecutionStrategy for LocalStrategy {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Local
    }

    async fn execute(
        &self,
        entry: &ToolRegistryEntry,
        args: Value,
        context: &ToolCallContext,
    ) -> Result<Value, ToolError> {
        let tool = self.tools.get(&entry.name).ok_or_else(|| {
            ToolError::Configuration(format!("no local handler is registered for `{}`", entry.name))
        })?;
        tool.execute(args, context).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use shopkeep_core::ExecutionKind;

    use super::{LocalStrategy, LocalTool};
    use crate::error::ToolError;
    use crate::strategies::test_support::{context, entry};
    use crate::strategies::{ExecutionStrategy, ToolCallContext};

    struct Echo;

    #[async_trait]
    impl LocalTool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, args: Value, context: &ToolCallContext) -> Result<Value, ToolError> {
            Ok(json!({"args": args, "tenant": context.tenant_id.0}))
        }
    }

    #[tokio::test]
    async fn routes_by_entry_name() {
        let strategy = LocalStrategy::new().with_tool(Echo);
        let output = strategy
            .execute(&entry("echo", ExecutionKind::Local, json!({})), json!({"x": 1}), &context())
            .await
            .expect("echo");
        assert_eq!(output, json!({"args": {"x": 1}, "tenant": "tenant-demo"}));

        let missing = strategy
            .execute(&entry("ghost", ExecutionKind::Local, json!({})), json!({}), &context())
            .await
            .expect_err("no handler");
        assert_eq!(missing.kind(), "configuration");
    }
}
