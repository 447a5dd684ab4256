use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use shopkeep_core::{ExecutionStatus, TenantId, ToolExecutionRecord};

use super::decode::{
    encode_json, parse_json, parse_optional_json, parse_timestamp, parse_u64, to_i64,
};
use super::{RepositoryError, ToolExecutionRepository};
use crate::DbPool;

pub struct SqlToolExecutionRepository {
    pool: DbPool,
}

impl SqlToolExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ToolExecutionRepository for SqlToolExecutionRepository {
    async fn save(&self, record: ToolExecutionRecord) -> Result<(), RepositoryError> {
        let output_json = record
            .output_result
            .as_ref()
            .map(|value| encode_json("output_result_json", value))
            .transpose()?;

        sqlx::query(
            "INSERT INTO tool_execution (
                id,
                tool_id,
                tenant_id,
                input_args_json,
                status,
                output_result_json,
                error,
                execution_time_ms,
                trace_id,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                output_result_json = excluded.output_result_json,
                error = excluded.error,
                execution_time_ms = excluded.execution_time_ms,
                updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&record.tool_id)
        .bind(&record.tenant_id.0)
        .bind(encode_json("input_args_json", &record.input_args)?)
        .bind(record.status.as_str())
        .bind(output_json.as_deref())
        .bind(record.error.as_deref())
        .bind(to_i64("execution_time_ms", record.execution_time_ms)?)
        .bind(record.trace_id.as_deref())
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ToolExecutionRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                tool_id,
                tenant_id,
                input_args_json,
                status,
                output_result_json,
                error,
                execution_time_ms,
                trace_id,
                created_at,
                updated_at
             FROM tool_execution
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn list_recent(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ToolExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                tool_id,
                tenant_id,
                input_args_json,
                status,
                output_result_json,
                error,
                execution_time_ms,
                trace_id,
                created_at,
                updated_at
             FROM tool_execution
             WHERE tenant_id = ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(&tenant_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn claim_approved(&self, id: &str, tenant_id: &TenantId) -> Result<bool, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE tool_execution
             SET claimed_at = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ? AND status = 'running' AND claimed_at IS NULL",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(&tenant_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn record_from_row(row: SqliteRow) -> Result<ToolExecutionRecord, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ExecutionStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown tool execution status `{status_raw}`"))
    })?;

    Ok(ToolExecutionRecord {
        id: row.try_get("id")?,
        tool_id: row.try_get("tool_id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        input_args: parse_json("input_args_json", &row.try_get::<String, _>("input_args_json")?)?,
        status,
        output_result: parse_optional_json("output_result_json", row.try_get("output_result_json")?)?,
        error: row.try_get("error")?,
        execution_time_ms: parse_u64("execution_time_ms", row.try_get("execution_time_ms")?)?,
        trace_id: row.try_get("trace_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
