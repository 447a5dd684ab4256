use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use shopkeep_core::{AuditError, AuditSeverity, AuditSink, TenantId, ToolAuditRecord};

use super::decode::{encode_json, parse_json, parse_optional_json, parse_timestamp, parse_u64, to_i64};
use super::RepositoryError;
use crate::DbPool;

/// Writes tool audit records to `tool_audit_log`.
pub struct SqlAuditSink {
    pool: DbPool,
}

impl SqlAuditSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &ToolAuditRecord) -> Result<(), RepositoryError> {
        let result_json = record
            .result
            .as_ref()
            .map(|value| encode_json("result_json", value))
            .transpose()?;

        sqlx::query(
            "INSERT INTO tool_audit_log (
                id,
                action,
                severity,
                tenant_id,
                trace_id,
                span_id,
                parent_span_id,
                args_json,
                result_json,
                error,
                duration_ms,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.action)
        .bind(record.severity.as_str())
        .bind(&record.tenant_id.0)
        .bind(&record.trace_id)
        .bind(&record.span_id)
        .bind(record.parent_span_id.as_deref())
        .bind(encode_json("args_json", &record.args)?)
        .bind(result_json.as_deref())
        .bind(record.error.as_deref())
        .bind(to_i64("duration_ms", record.duration_ms)?)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_for_trace(
        &self,
        trace_id: &str,
    ) -> Result<Vec<ToolAuditRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                action,
                severity,
                tenant_id,
                trace_id,
                span_id,
                parent_span_id,
                args_json,
                result_json,
                error,
                duration_ms,
                created_at
             FROM tool_audit_log
             WHERE trace_id = ?
             ORDER BY created_at ASC",
        )
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(audit_from_row).collect()
    }
}

#[async_trait]
impl AuditSink for SqlAuditSink {
    async fn record(&self, record: ToolAuditRecord) -> Result<(), AuditError> {
        self.insert(&record).await.map_err(|error| AuditError::Unavailable(error.to_string()))
    }
}

fn audit_from_row(row: SqliteRow) -> Result<ToolAuditRecord, RepositoryError> {
    let severity_raw = row.try_get::<String, _>("severity")?;
    let severity = AuditSeverity::parse(&severity_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown severity `{severity_raw}`")))?;

    Ok(ToolAuditRecord {
        id: row.try_get("id")?,
        action: row.try_get("action")?,
        severity,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        trace_id: row.try_get("trace_id")?,
        span_id: row.try_get("span_id")?,
        parent_span_id: row.try_get("parent_span_id")?,
        args: parse_json("args_json", &row.try_get::<String, _>("args_json")?)?,
        result: parse_optional_json("result_json", row.try_get("result_json")?)?,
        error: row.try_get("error")?,
        duration_ms: parse_u64("duration_ms", row.try_get("duration_ms")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
