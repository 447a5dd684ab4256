use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};

use shopkeep_core::domain::business::{Order, OrderStatus};
use shopkeep_core::TenantId;

use super::decode::parse_timestamp;
use super::{OrderRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn list(
        &self,
        tenant_id: &TenantId,
        status: Option<OrderStatus>,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, customer_id, status, total, created_at, updated_at
             FROM sales_order
             WHERE tenant_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC, id ASC
             LIMIT ?3",
        )
        .bind(&tenant_id.0)
        .bind(status.map(|status| status.as_str()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(order_from_row).collect()
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, customer_id, status, total, created_at, updated_at
             FROM sales_order
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(&tenant_id.0)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(order_from_row).transpose()
    }

    async fn update_status(
        &self,
        tenant_id: &TenantId,
        id: &str,
        status: OrderStatus,
    ) -> Result<Order, RepositoryError> {
        let current = self
            .find_by_id(tenant_id, id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("order `{id}`")))?;

        if !current.status.can_transition_to(status) {
            return Err(RepositoryError::Conflict(format!(
                "order `{id}` cannot move from {} to {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        // Guarded on the previous status so a concurrent change is not overwritten.
        let result = sqlx::query(
            "UPDATE sales_order SET status = ?4, updated_at = ?5
             WHERE tenant_id = ?1 AND id = ?2 AND status = ?3",
        )
        .bind(&tenant_id.0)
        .bind(id)
        .bind(current.status.as_str())
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!("order `{id}` changed concurrently")));
        }

        self.find_by_id(tenant_id, id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("order `{id}`")))
    }
}

fn order_from_row(row: SqliteRow) -> Result<Order, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = OrderStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status_raw}`")))?;
    let total_raw = row.try_get::<String, _>("total")?;
    let total = Decimal::from_str(&total_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `total`: `{total_raw}` ({error})"))
    })?;

    Ok(Order {
        id: row.try_get("id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        customer_id: row.try_get("customer_id")?,
        status,
        total,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
