use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use shopkeep_core::{ExecutionKind, TenantId, ToolRegistryEntry, ToolSource};

use super::decode::{encode_json, parse_json, parse_u64, to_i64};
use super::{RepositoryError, ToolDefinitionRepository};
use crate::DbPool;

const SYSTEM_SCOPE: &str = "system";

const SELECT_COLUMNS: &str = "SELECT
        name,
        source,
        tenant_id,
        category,
        description,
        input_schema_json,
        execution_kind,
        execution_config_json,
        requires_tenant_id,
        requires_user_id,
        is_read_only,
        requires_approval,
        max_execution_time_ms,
        enabled
     FROM tool_registry";

pub struct SqlToolDefinitionRepository {
    pool: DbPool,
}

impl SqlToolDefinitionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ToolDefinitionRepository for SqlToolDefinitionRepository {
    async fn list_system(&self) -> Result<Vec<ToolRegistryEntry>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} WHERE scope = ? ORDER BY name ASC"))
            .bind(SYSTEM_SCOPE)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn list_custom(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ToolRegistryEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE scope = ? AND source = 'custom' ORDER BY name ASC"
        ))
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    async fn save(&self, entry: ToolRegistryEntry) -> Result<(), RepositoryError> {
        let scope = match (entry.source, entry.tenant_id.as_ref()) {
            (ToolSource::System, _) => SYSTEM_SCOPE.to_string(),
            (ToolSource::Custom, Some(tenant_id)) => tenant_id.0.clone(),
            (ToolSource::Custom, None) => {
                return Err(RepositoryError::Conflict(format!(
                    "custom tool `{}` must belong to a tenant",
                    entry.name
                )))
            }
        };

        sqlx::query(
            "INSERT INTO tool_registry (
                scope,
                name,
                source,
                tenant_id,
                category,
                description,
                input_schema_json,
                execution_kind,
                execution_config_json,
                requires_tenant_id,
                requires_user_id,
                is_read_only,
                requires_approval,
                max_execution_time_ms,
                enabled,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(scope, name) DO UPDATE SET
                source = excluded.source,
                tenant_id = excluded.tenant_id,
                category = excluded.category,
                description = excluded.description,
                input_schema_json = excluded.input_schema_json,
                execution_kind = excluded.execution_kind,
                execution_config_json = excluded.execution_config_json,
                requires_tenant_id = excluded.requires_tenant_id,
                requires_user_id = excluded.requires_user_id,
                is_read_only = excluded.is_read_only,
                requires_approval = excluded.requires_approval,
                max_execution_time_ms = excluded.max_execution_time_ms,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
        )
        .bind(scope)
        .bind(&entry.name)
        .bind(entry.source.as_str())
        .bind(entry.tenant_id.as_ref().map(|tenant| tenant.0.as_str()))
        .bind(&entry.category)
        .bind(&entry.description)
        .bind(encode_json("input_schema_json", &entry.input_schema)?)
        .bind(entry.execution_kind.as_str())
        .bind(encode_json("execution_config_json", &entry.execution_config)?)
        .bind(entry.requires_tenant_id)
        .bind(entry.requires_user_id)
        .bind(entry.is_read_only)
        .bind(entry.requires_approval)
        .bind(to_i64("max_execution_time_ms", entry.max_execution_time_ms)?)
        .bind(entry.enabled)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn entry_from_row(row: SqliteRow) -> Result<ToolRegistryEntry, RepositoryError> {
    let source_raw = row.try_get::<String, _>("source")?;
    let source = ToolSource::parse(&source_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown tool source `{source_raw}`")))?;
    let kind_raw = row.try_get::<String, _>("execution_kind")?;
    let execution_kind = ExecutionKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown execution kind `{kind_raw}`")))?;

    Ok(ToolRegistryEntry {
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        input_schema: parse_json("input_schema_json", &row.try_get::<String, _>("input_schema_json")?)?,
        execution_kind,
        execution_config: parse_json(
            "execution_config_json",
            &row.try_get::<String, _>("execution_config_json")?,
        )?,
        source,
        tenant_id: row.try_get::<Option<String>, _>("tenant_id")?.map(TenantId),
        requires_tenant_id: row.try_get("requires_tenant_id")?,
        requires_user_id: row.try_get("requires_user_id")?,
        is_read_only: row.try_get("is_read_only")?,
        requires_approval: row.try_get("requires_approval")?,
        max_execution_time_ms: parse_u64(
            "max_execution_time_ms",
            row.try_get("max_execution_time_ms")?,
        )?,
        enabled: row.try_get("enabled")?,
    })
}
