use sqlx::{sqlite::SqliteRow, Row};

use shopkeep_core::domain::business::OutboundEmail;
use shopkeep_core::TenantId;

use super::decode::parse_timestamp;
use super::{EmailOutboxRepository, RepositoryError};
use crate::DbPool;

/// Queue of emails the agent asked to send. Delivery happens elsewhere.
pub struct SqlEmailOutboxRepository {
    pool: DbPool,
}

impl SqlEmailOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl EmailOutboxRepository for SqlEmailOutboxRepository {
    async fn enqueue(&self, email: OutboundEmail) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO email_outbox (id, tenant_id, recipient, subject, body, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&email.id)
        .bind(&email.tenant_id.0)
        .bind(&email.to)
        .bind(&email.subject)
        .bind(&email.body)
        .bind(&email.status)
        .bind(email.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, tenant_id: &TenantId) -> Result<Vec<OutboundEmail>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, recipient, subject, body, status, created_at
             FROM email_outbox
             WHERE tenant_id = ?
             ORDER BY created_at ASC",
        )
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(email_from_row).collect()
    }
}

fn email_from_row(row: SqliteRow) -> Result<OutboundEmail, RepositoryError> {
    Ok(OutboundEmail {
        id: row.try_get("id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        to: row.try_get("recipient")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        status: row.try_get("status")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
