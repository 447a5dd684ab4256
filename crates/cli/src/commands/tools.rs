use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use shopkeep_agent::tools::sync_system_tools;
use shopkeep_agent::ToolRegistry;
use shopkeep_core::config::AppConfig;
use shopkeep_core::TenantId;
use shopkeep_db::repositories::SqlToolDefinitionRepository;
use shopkeep_db::DbPool;

use crate::commands::{with_migrated_pool, CommandResult};

pub fn sync() -> CommandResult {
    let result = with_migrated_pool("tools.sync", |config, pool| async move {
        let definitions = SqlToolDefinitionRepository::new(pool);
        sync_system_tools(&definitions, config.tools.default_max_execution_ms)
            .await
            .map_err(|error| ("tool_sync", error.to_string(), 5u8))
    });

    match result {
        Ok((_, count)) => CommandResult::success("tools.sync", format!("synced {count} system tools")),
        Err(failure) => failure,
    }
}

pub fn list(tenant: &str) -> CommandResult {
    let tenant_id = TenantId(tenant.to_string());
    let result = with_migrated_pool("tools.list", |config, pool| async move {
        catalog_rows(&config, pool, &tenant_id)
            .await
            .map_err(|error| ("tool_registry", format!("{error:#}"), 5u8))
    });

    match result {
        Ok((_, rows)) => {
            let message = format!("{} tools available to `{tenant}`", rows.len());
            CommandResult::success_with_data("tools.list", message, Some(Value::Array(rows)))
        }
        Err(failure) => failure,
    }
}

async fn catalog_rows(
    config: &AppConfig,
    pool: DbPool,
    tenant_id: &TenantId,
) -> anyhow::Result<Vec<Value>> {
    let registry = ToolRegistry::from_config(
        Arc::new(SqlToolDefinitionRepository::new(pool)),
        &config.tools,
    );
    let catalog = registry
        .load(tenant_id, true)
        .await
        .with_context(|| format!("loading tool registry for `{tenant_id}`"))?;

    Ok(catalog
        .entries()
        .iter()
        .map(|entry| {
            json!({
                "name": entry.name,
                "category": entry.category,
                "kind": entry.execution_kind.as_str(),
                "source": entry.source,
                "read_only": entry.is_read_only,
                "requires_approval": entry.requires_approval,
                "max_execution_time_ms": entry.max_execution_time_ms,
            })
        })
        .collect())
}
