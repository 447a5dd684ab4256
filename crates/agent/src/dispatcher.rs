use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{info, warn};

use shopkeep_core::config::AppConfig;
use shopkeep_core::{
    AuditSink, ExecutionKind, ExecutionStatus, TenantId, ToolAuditRecord, ToolExecutionRecord,
    ToolRegistryEntry, ToolResult, ToolSchema,
};
use shopkeep_db::repositories::{
    SqlAuditSink, SqlToolDefinitionRepository, SqlToolExecutionRepository,
    ToolExecutionRepository,
};
use shopkeep_db::{DbPool, SqlQueryRunner};

use crate::error::ToolError;
use crate::registry::{ToolCatalog, ToolRegistry};
use crate::secrets::EnvSecretStore;
use crate::strategies::{
    ExecutionStrategy, HttpRpcBackend, HttpStrategy, RpcStrategy, SqlStrategy, ToolCallContext,
};
use crate::tools::{builtin_local_tools, BusinessStores};
use crate::telemetry::{audit_action, new_span_id, sanitize_args};
use crate::validation::validate_arguments;

/// Resolves tool calls against the registry and runs them through the matching strategy.
///
/// `execute` and `resume_approved` always produce a `ToolResult`; every failure, including
/// a panicking handler, comes back as `success: false` with an error message.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    strategies: HashMap<ExecutionKind, Arc<dyn ExecutionStrategy>>,
    executions: Arc<dyn ToolExecutionRepository>,
    audit: Arc<dyn AuditSink>,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        executions: Arc<dyn ToolExecutionRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { registry, strategies: HashMap::new(), executions, audit }
    }

    /// SQL-backed registry, execution log and audit sink with every strategy wired in.
    /// Http secrets come from the environment under `tools.secret_env_prefix`, scoped per tenant.
    pub fn for_pool(pool: DbPool, config: &AppConfig) -> Result<Self, ToolError> {
        let rpc = match HttpRpcBackend::from_config(&config.rpc)? {
            Some(backend) => RpcStrategy::new(Arc::new(backend)),
            None => RpcStrategy::unconfigured(),
        };
        let secrets = Arc::new(EnvSecretStore::new(config.tools.secret_env_prefix.clone()));
        let definitions = Arc::new(SqlToolDefinitionRepository::new(pool.clone()));

        Ok(Self::new(
            Arc::new(ToolRegistry::from_config(definitions, &config.tools)),
            Arc::new(SqlToolExecutionRepository::new(pool.clone())),
            Arc::new(SqlAuditSink::new(pool.clone())),
        )
        .with_strategy(Arc::new(builtin_local_tools(&BusinessStores::sql(pool.clone()))))
        .with_strategy(Arc::new(rpc))
        .with_strategy(Arc::new(HttpStrategy::new(secrets, &config.tools)))
        .with_strategy(Arc::new(SqlStrategy::new(Arc::new(SqlQueryRunner::new(pool))))))
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ExecutionStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Schemas of every tool available to the tenant, for the model request.
    pub async fn schemas(&self, tenant_id: &TenantId) -> Result<Vec<ToolSchema>, ToolError> {
        self.catalog(tenant_id).await.map(|catalog| catalog.schemas())
    }

    pub async fn execute(&self, tool_name: &str, args: Value, context: &ToolCallContext) -> ToolResult {
        let started = Instant::now();
        let span_id = new_span_id();

        let entry = match self.resolve(tool_name, &context.tenant_id).await {
            Ok(entry) => entry,
            Err(error) => {
                let result = ToolResult::failure(error.to_string());
                self.finish(tool_name, &args, None, &result, Some(&error), context, &span_id, started)
                    .await;
                return result;
            }
        };

        let args = match prepare_arguments(&entry, args, context) {
            Ok(args) => args,
            Err((args, error)) => {
                let mut record = self.new_record(&entry, &args, ExecutionStatus::Failed, context);
                let result = ToolResult::failure(error.to_string()).with_execution_id(record.id.clone());
                record.complete(&result, elapsed_ms(started));
                self.finish(tool_name, &args, Some(record), &result, Some(&error), context, &span_id, started)
                    .await;
                return result;
            }
        };

        if entry.requires_approval {
            return self.request_approval(&entry, args, context, &span_id, started).await;
        }

        let mut record = self.new_record(&entry, &args, ExecutionStatus::Running, context);
        self.save_record(&record).await;

        let outcome = self.run_strategy(&entry, args.clone(), context).await;
        let (result, error) = match outcome {
            Ok(data) => (ToolResult::ok(data), None),
            Err(error) => (ToolResult::failure(error.to_string()), Some(error)),
        };
        let result = result.with_execution_id(record.id.clone());
        record.complete(&result, elapsed_ms(started));
        self.finish(tool_name, &args, Some(record), &result, error.as_ref(), context, &span_id, started)
            .await;
        result
    }

    /// Runs an execution that was held for approval and has since been approved, which the
    /// approval workflow signals by moving the record to `running`.
    pub async fn resume_approved(&self, execution_id: &str, context: &ToolCallContext) -> ToolResult {
        let started = Instant::now();
        let span_id = new_span_id();

        let mut record = match self.executions.find_by_id(execution_id).await {
            Ok(Some(record)) if record.tenant_id == context.tenant_id => record,
            Ok(_) => return ToolResult::failure(format!("execution `{execution_id}` was not found")),
            Err(error) => {
                warn!(event_name = "tools.dispatch.resume_lookup_failed", execution_id, error = %error);
                return ToolResult::failure("execution history is unavailable");
            }
        };
        if record.status != ExecutionStatus::Running {
            return ToolResult::failure(format!(
                "execution `{execution_id}` is not approved (status {})",
                record.status.as_str()
            ))
            .with_execution_id(execution_id);
        }
        match self.executions.claim_approved(execution_id, &context.tenant_id).await {
            Ok(true) => {}
            Ok(false) => {
                return ToolResult::failure(format!("execution `{execution_id}` is already being resumed"))
                    .with_execution_id(execution_id);
            }
            Err(error) => {
                warn!(event_name = "tools.dispatch.resume_claim_failed", execution_id, error = %error);
                return ToolResult::failure("execution history is unavailable");
            }
        }

        let tool_name = record.tool_id.clone();
        let args = record.input_args.clone();
        let (result, error) = match self.resolve(&tool_name, &context.tenant_id).await {
            Ok(entry) => match self.run_strategy(&entry, args.clone(), context).await {
                Ok(data) => (ToolResult::ok(data), None),
                Err(error) => (ToolResult::failure(error.to_string()), Some(error)),
            },
            Err(error) => (ToolResult::failure(error.to_string()), Some(error)),
        };

        let result = result.with_execution_id(execution_id);
        record.complete(&result, elapsed_ms(started));
        self.finish(&tool_name, &args, Some(record), &result, error.as_ref(), context, &span_id, started)
            .await;
        result
    }

    async fn catalog(&self, tenant_id: &TenantId) -> Result<ToolCatalog, ToolError> {
        self.registry.load(tenant_id, false).await.map_err(|error| {
            warn!(event_name = "tools.registry.load_failed", tenant_id = %tenant_id, error = %error);
            ToolError::Downstream("tool registry is unavailable".to_string())
        })
    }

    async fn resolve(&self, tool_name: &str, tenant_id: &TenantId) -> Result<ToolRegistryEntry, ToolError> {
        let catalog = self.catalog(tenant_id).await?;
        catalog.find(tool_name).cloned().ok_or_else(|| ToolError::UnknownTool {
            name: tool_name.to_string(),
            available: catalog.names(),
        })
    }

    async fn request_approval(
        &self,
        entry: &ToolRegistryEntry,
        args: Value,
        context: &ToolCallContext,
        span_id: &str,
        started: Instant,
    ) -> ToolResult {
        let record = self.new_record(entry, &args, ExecutionStatus::Pending, context);
        if let Err(error) = self.executions.save(record.clone()).await {
            warn!(
                event_name = "tools.dispatch.approval_record_failed",
                tool = %entry.name,
                error = %error,
            );
            let result = ToolResult::failure("approval request could not be recorded");
            self.finish(&entry.name, &args, None, &result, None, context, span_id, started).await;
            return result;
        }

        info!(
            event_name = "tools.dispatch.approval_requested",
            tool = %entry.name,
            tenant_id = %context.tenant_id,
            execution_id = %record.id,
            "tool call held for approval"
        );
        let result = ToolResult::pending_approval(record.id.clone());
        self.finish(&entry.name, &args, None, &result, None, context, span_id, started).await;
        result
    }

    async fn run_strategy(
        &self,
        entry: &ToolRegistryEntry,
        args: Value,
        context: &ToolCallContext,
    ) -> Result<Value, ToolError> {
        let strategy = self.strategies.get(&entry.execution_kind).ok_or_else(|| {
            ToolError::Configuration(format!(
                "no `{}` strategy is installed",
                entry.execution_kind.as_str()
            ))
        })?;

        let budget_ms = entry.max_execution_time_ms.max(1);
        let call = AssertUnwindSafe(strategy.execute(entry, args, context)).catch_unwind();
        match tokio::time::timeout(Duration::from_millis(budget_ms), call).await {
            Err(_) => Err(ToolError::Timeout(budget_ms)),
            Ok(Err(_panic)) => {
                warn!(event_name = "tools.dispatch.panicked", tool = %entry.name, "tool handler panicked");
                Err(ToolError::Downstream(format!("`{}` failed unexpectedly", entry.name)))
            }
            Ok(Ok(outcome)) => outcome,
        }
    }

    fn new_record(
        &self,
        entry: &ToolRegistryEntry,
        args: &Value,
        status: ExecutionStatus,
        context: &ToolCallContext,
    ) -> ToolExecutionRecord {
        ToolExecutionRecord::new(
            entry.name.clone(),
            context.tenant_id.clone(),
            sanitize_args(args),
            status,
            Some(context.trace.trace_id.clone()),
        )
    }

    async fn save_record(&self, record: &ToolExecutionRecord) {
        if let Err(error) = self.executions.save(record.clone()).await {
            warn!(
                event_name = "tools.dispatch.record_failed",
                execution_id = %record.id,
                error = %error,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        tool_name: &str,
        args: &Value,
        record: Option<ToolExecutionRecord>,
        result: &ToolResult,
        error: Option<&ToolError>,
        context: &ToolCallContext,
        span_id: &str,
        started: Instant,
    ) {
        let duration_ms = elapsed_ms(started);
        if let Some(record) = record {
            self.save_record(&record).await;
        }

        let outcome = if result.pending_approval {
            Some(json!({"pending_approval": true, "execution_id": result.execution_id}))
        } else {
            result.data.clone()
        };
        let audit = ToolAuditRecord::new(
            audit_action(tool_name, args),
            context.tenant_id.clone(),
            context.trace.trace_id.clone(),
            span_id,
            context.trace.parent_span_id.clone(),
        )
        .with_args(sanitize_args(args))
        .with_outcome(outcome, if result.pending_approval { None } else { result.error.clone() }, duration_ms);

        if let Err(error) = self.audit.record(audit).await {
            warn!(event_name = "tools.dispatch.audit_failed", tool = tool_name, error = %error);
        }

        info!(
            event_name = "tools.dispatch.completed",
            tool = tool_name,
            tenant_id = %context.tenant_id,
            trace_id = %context.trace.trace_id,
            success = result.success,
            pending_approval = result.pending_approval,
            error_kind = error.map(ToolError::kind).unwrap_or("none"),
            duration_ms,
            "tool call finished"
        );
    }
}

/// Applies identity injection. On failure the original arguments come back with the error
/// so they can still be recorded.
fn prepare_arguments(
    entry: &ToolRegistryEntry,
    args: Value,
    context: &ToolCallContext,
) -> Result<Value, (Value, ToolError)> {
    let args = if args.is_null() { json!({}) } else { args };
    let Value::Object(mut fields) = args else {
        let error = ToolError::Validation("arguments must be a JSON object".to_string());
        return Err((args, error));
    };

    if entry.requires_tenant_id {
        fields.insert("tenant_id".to_string(), Value::String(context.tenant_id.0.clone()));
    }
    if entry.requires_user_id {
        match &context.user_id {
            Some(user_id) => {
                fields.insert("user_id".to_string(), Value::String(user_id.0.clone()));
            }
            None => {
                let error = ToolError::Validation(format!("`{}` needs a signed-in user", entry.name));
                return Err((Value::Object(fields), error));
            }
        }
    }

    let args = Value::Object(fields);
    match validate_arguments(&args, &entry.input_schema) {
        Ok(()) => Ok(args),
        Err(error) => Err((args, error)),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use shopkeep_core::{
        ExecutionKind, ExecutionStatus, InMemoryAuditSink, TenantId, ToolRegistryEntry, ToolSource,
    };
    use shopkeep_db::repositories::{
        InMemoryToolDefinitionRepository, InMemoryToolExecutionRepository, ToolExecutionRepository,
    };

    use super::ToolDispatcher;
    use crate::error::ToolError;
    use crate::registry::ToolRegistry;
    use crate::strategies::{LocalStrategy, LocalTool, ToolCallContext};
    use crate::telemetry::TraceContext;

    struct Recorder {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LocalTool for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn execute(&self, args: Value, _context: &ToolCallContext) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"seen": args}))
        }
    }

    struct Slow;

    #[async_trait]
    impl LocalTool for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn execute(&self, _args: Value, _context: &ToolCallContext) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    struct Exploding;

    #[async_trait]
    impl LocalTool for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        async fn execute(&self, _args: Value, _context: &ToolCallContext) -> Result<Value, ToolError> {
            panic!("handler bug");
        }
    }

    fn entry(name: &str) -> ToolRegistryEntry {
        ToolRegistryEntry {
            name: name.to_string(),
            category: "test".to_string(),
            description: format!("{name} tool"),
            input_schema: json!({
                "type": "object",
                "properties": {"count": {"type": "integer"}, "password": {"type": "string"}},
                "required": ["count"]
            }),
            execution_kind: ExecutionKind::Local,
            execution_config: json!({}),
            source: ToolSource::System,
            tenant_id: None,
            requires_tenant_id: true,
            requires_user_id: false,
            is_read_only: true,
            requires_approval: false,
            max_execution_time_ms: 2_000,
            enabled: true,
        }
    }

    struct Harness {
        dispatcher: ToolDispatcher,
        calls: Arc<AtomicUsize>,
        executions: Arc<InMemoryToolExecutionRepository>,
        audit: InMemoryAuditSink,
    }

    fn harness() -> Harness {
        let mut slow = entry("slow");
        slow.max_execution_time_ms = 50;
        let mut gated = entry("recorder_gated");
        gated.requires_approval = true;
        gated.requires_user_id = true;
        let mut custom = entry("loyalty");
        custom.source = ToolSource::Custom;
        custom.tenant_id = Some(TenantId("tenant-1".to_string()));

        let definitions = Arc::new(InMemoryToolDefinitionRepository::with_entries(vec![
            entry("recorder"),
            slow,
            entry("exploding"),
            gated,
            custom,
        ]));
        let registry = Arc::new(ToolRegistry::new(definitions, Duration::from_secs(60), "custom_"));

        let calls = Arc::new(AtomicUsize::new(0));
        let local = LocalStrategy::new()
            .with_tool(Recorder { calls: calls.clone() })
            .with_tool(Slow)
            .with_tool(Exploding)
            .with_tool(GatedRecorder { calls: calls.clone() });

        let executions = Arc::new(InMemoryToolExecutionRepository::default());
        let audit = InMemoryAuditSink::default();
        let dispatcher = ToolDispatcher::new(registry, executions.clone(), Arc::new(audit.clone()))
            .with_strategy(Arc::new(local));
        Harness { dispatcher, calls, executions, audit }
    }

    struct GatedRecorder {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LocalTool for GatedRecorder {
        fn name(&self) -> &'static str {
            "recorder_gated"
        }

        async fn execute(&self, args: Value, _context: &ToolCallContext) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"sent": args["count"]}))
        }
    }

    fn context(user: Option<&str>) -> ToolCallContext {
        ToolCallContext::new(
            TenantId("tenant-1".to_string()),
            user.map(|id| shopkeep_core::UserId(id.to_string())),
            TraceContext { trace_id: "trace-1".to_string(), parent_span_id: Some("span-0".to_string()) },
        )
    }

    #[tokio::test]
    async fn unknown_tool_lists_known_names() {
        let harness = harness();
        let result = harness.dispatcher.execute("not_a_real_tool", json!({}), &context(None)).await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some(
                "unknown tool `not_a_real_tool`; available tools: custom_loyalty, exploding, \
                 recorder, recorder_gated, slow"
            )
        );
    }

    #[tokio::test]
    async fn malformed_arguments_fail_without_running_the_tool() {
        let harness = harness();
        for args in [json!("count=1"), json!([1]), json!({}), json!({"count": "one"})] {
            let result = harness.dispatcher.execute("recorder", args.clone(), &context(None)).await;
            assert!(!result.success, "{args}");
            assert!(result.error.as_deref().is_some_and(|error| error.starts_with("invalid arguments")));
        }
        assert_eq!(harness.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tenant_is_injected_and_execution_is_recorded() {
        let harness = harness();
        let result = harness
            .dispatcher
            .execute("recorder", json!({"count": 2, "tenant_id": "spoofed"}), &context(None))
            .await;

        assert!(result.success);
        assert_eq!(result.data, Some(json!({"seen": {"count": 2, "tenant_id": "tenant-1"}})));

        let execution_id = result.execution_id.expect("execution id");
        let record = harness.executions.find_by_id(&execution_id).await.expect("find").expect("record");
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.trace_id.as_deref(), Some("trace-1"));
    }

    #[tokio::test]
    async fn panics_and_timeouts_become_failures() {
        let harness = harness();

        let panicked = harness.dispatcher.execute("exploding", json!({"count": 1}), &context(None)).await;
        assert_eq!(panicked.error.as_deref(), Some("`exploding` failed unexpectedly"));

        let timed_out = harness.dispatcher.execute("slow", json!({"count": 1}), &context(None)).await;
        assert_eq!(timed_out.error, Some(ToolError::Timeout(50).to_string()));
    }

    #[tokio::test]
    async fn approval_gate_holds_the_call_until_resumed() {
        let harness = harness();

        let missing_user =
            harness.dispatcher.execute("recorder_gated", json!({"count": 3}), &context(None)).await;
        assert!(!missing_user.success && !missing_user.pending_approval);

        let pending =
            harness.dispatcher.execute("recorder_gated", json!({"count": 3}), &context(Some("u-1"))).await;
        assert!(!pending.success);
        assert!(pending.pending_approval);
        assert_eq!(harness.calls.load(Ordering::SeqCst), 0);

        let execution_id = pending.execution_id.clone().expect("execution id");
        let not_yet = harness.dispatcher.resume_approved(&execution_id, &context(Some("u-1"))).await;
        assert!(not_yet.error.as_deref().is_some_and(|error| error.contains("not approved")));

        let mut record =
            harness.executions.find_by_id(&execution_id).await.expect("find").expect("pending record");
        assert_eq!(record.status, ExecutionStatus::Pending);
        record.status = ExecutionStatus::Running;
        harness.executions.save(record).await.expect("approve");

        let resumed = harness.dispatcher.resume_approved(&execution_id, &context(Some("u-1"))).await;
        assert!(resumed.success);
        assert_eq!(resumed.data, Some(json!({"sent": 3})));
        assert_eq!(harness.calls.load(Ordering::SeqCst), 1);

        let done = harness.executions.find_by_id(&execution_id).await.expect("find").expect("record");
        assert_eq!(done.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn concurrent_resumes_run_an_approved_call_once() {
        let harness = harness();
        let pending =
            harness.dispatcher.execute("recorder_gated", json!({"count": 2}), &context(Some("u-1"))).await;
        let execution_id = pending.execution_id.clone().expect("execution id");

        let mut record =
            harness.executions.find_by_id(&execution_id).await.expect("find").expect("pending record");
        record.status = ExecutionStatus::Running;
        harness.executions.save(record).await.expect("approve");

        let approver = context(Some("u-1"));
        let (first, second) = tokio::join!(
            harness.dispatcher.resume_approved(&execution_id, &approver),
            harness.dispatcher.resume_approved(&execution_id, &approver),
        );

        assert_eq!(harness.calls.load(Ordering::SeqCst), 1);
        assert_eq!([first.success, second.success].iter().filter(|success| **success).count(), 1);
        let loser = if first.success { &second } else { &first };
        assert!(loser.error.as_deref().is_some_and(|error| error.contains("already being resumed")));

        let replay = harness.dispatcher.resume_approved(&execution_id, &approver).await;
        assert!(!replay.success);
        assert_eq!(harness.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn audit_records_are_sanitized_and_linked_to_the_trace() {
        let harness = harness();
        harness
            .dispatcher
            .execute("recorder", json!({"count": 1, "password": "hunter2"}), &context(None))
            .await;

        let records = harness.audit.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.action, "tool.recorder");
        assert_eq!(record.trace_id, "trace-1");
        assert_eq!(record.parent_span_id.as_deref(), Some("span-0"));
        assert_eq!(record.args["password"], json!("[REDACTED]"));
        assert!(!serde_json::to_string(record).expect("encode").contains("hunter2"));
    }
}
