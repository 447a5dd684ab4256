use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use shopkeep_core::domain::business::InventoryItem;
use shopkeep_core::TenantId;

use super::decode::parse_timestamp;
use super::{BulkSetOutcome, InventoryRepository, RepositoryError, StockLevel};
use crate::DbPool;

const SELECT_ITEM: &str = "SELECT tenant_id, sku, location, name, quantity, reorder_point, updated_at
     FROM inventory_item";

pub struct SqlInventoryRepository {
    pool: DbPool,
}

impl SqlInventoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InventoryRepository for SqlInventoryRepository {
    async fn list(&self, tenant_id: &TenantId) -> Result<Vec<InventoryItem>, RepositoryError> {
        let rows =
            sqlx::query(&format!("{SELECT_ITEM} WHERE tenant_id = ? ORDER BY sku ASC, location ASC"))
                .bind(&tenant_id.0)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn find_by_sku(
        &self,
        tenant_id: &TenantId,
        sku: &str,
    ) -> Result<Vec<InventoryItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_ITEM} WHERE tenant_id = ? AND sku = ? COLLATE NOCASE ORDER BY location ASC"
        ))
        .bind(&tenant_id.0)
        .bind(sku.trim())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn list_low_stock(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<InventoryItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_ITEM} WHERE tenant_id = ? AND quantity <= reorder_point
             ORDER BY quantity ASC, sku ASC, location ASC"
        ))
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn adjust(
        &self,
        tenant_id: &TenantId,
        sku: &str,
        location: &str,
        delta: i64,
    ) -> Result<InventoryItem, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let item = fetch_item(&mut tx, tenant_id, sku, location)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("sku `{sku}` at `{location}`")))?;
        let next = item.quantity.checked_add(delta).ok_or_else(|| {
            RepositoryError::Conflict(format!(
                "adjustment {delta} overflows stock for `{sku}` at `{location}`"
            ))
        })?;
        if next < 0 {
            return Err(RepositoryError::Conflict(format!(
                "insufficient stock for `{sku}` at `{location}`: have {}, adjustment {delta}",
                item.quantity
            )));
        }

        set_quantity(&mut tx, tenant_id, &item.sku, &item.location, next).await?;
        let updated = fetch_item(&mut tx, tenant_id, &item.sku, &item.location)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("sku `{sku}` at `{location}`")))?;
        tx.commit().await?;

        Ok(updated)
    }

    async fn transfer(
        &self,
        tenant_id: &TenantId,
        sku: &str,
        from_location: &str,
        to_location: &str,
        quantity: i64,
    ) -> Result<(InventoryItem, InventoryItem), RepositoryError> {
        if quantity <= 0 {
            return Err(RepositoryError::Conflict(
                "transfer quantity must be greater than zero".to_string(),
            ));
        }
        if from_location == to_location {
            return Err(RepositoryError::Conflict(
                "transfer source and destination must differ".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let source = fetch_item(&mut tx, tenant_id, sku, from_location)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("sku `{sku}` at `{from_location}`")))?;
        if source.quantity < quantity {
            return Err(RepositoryError::Conflict(format!(
                "insufficient stock for `{sku}` at `{from_location}`: have {}, requested {quantity}",
                source.quantity
            )));
        }
        set_quantity(&mut tx, tenant_id, &source.sku, from_location, source.quantity - quantity)
            .await?;

        match fetch_item(&mut tx, tenant_id, &source.sku, to_location).await? {
            Some(destination) => {
                let total = destination.quantity.checked_add(quantity).ok_or_else(|| {
                    RepositoryError::Conflict(format!(
                        "transfer of {quantity} overflows stock for `{sku}` at `{to_location}`"
                    ))
                })?;
                set_quantity(&mut tx, tenant_id, &source.sku, to_location, total).await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO inventory_item
                        (tenant_id, sku, location, name, quantity, reorder_point, updated_at)
                     VALUES (?, ?, ?, ?, ?, 0, ?)",
                )
                .bind(&tenant_id.0)
                .bind(&source.sku)
                .bind(to_location)
                .bind(&source.name)
                .bind(quantity)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            }
        }

        let from = fetch_item(&mut tx, tenant_id, &source.sku, from_location).await?;
        let to = fetch_item(&mut tx, tenant_id, &source.sku, to_location).await?;
        tx.commit().await?;

        match (from, to) {
            (Some(from), Some(to)) => Ok((from, to)),
            _ => Err(RepositoryError::NotFound(format!("sku `{sku}` after transfer"))),
        }
    }

    async fn bulk_set(
        &self,
        tenant_id: &TenantId,
        levels: Vec<StockLevel>,
    ) -> Result<BulkSetOutcome, RepositoryError> {
        if let Some(level) = levels.iter().find(|level| level.quantity < 0) {
            return Err(RepositoryError::Conflict(format!(
                "quantity for `{}` at `{}` must not be negative",
                level.sku, level.location
            )));
        }

        let mut tx = self.pool.begin().await?;
        let mut outcome = BulkSetOutcome::default();

        for level in levels {
            let affected =
                set_quantity(&mut tx, tenant_id, &level.sku, &level.location, level.quantity)
                    .await?;
            if affected == 0 {
                outcome.missing.push(level);
                continue;
            }
            if let Some(item) = fetch_item(&mut tx, tenant_id, &level.sku, &level.location).await? {
                outcome.updated.push(item);
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }
}

async fn fetch_item(
    conn: &mut SqliteConnection,
    tenant_id: &TenantId,
    sku: &str,
    location: &str,
) -> Result<Option<InventoryItem>, RepositoryError> {
    let row = sqlx::query(&format!(
        "{SELECT_ITEM} WHERE tenant_id = ? AND sku = ? COLLATE NOCASE AND location = ?"
    ))
    .bind(&tenant_id.0)
    .bind(sku.trim())
    .bind(location.trim())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(item_from_row).transpose()
}

async fn set_quantity(
    conn: &mut SqliteConnection,
    tenant_id: &TenantId,
    sku: &str,
    location: &str,
    quantity: i64,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE inventory_item
         SET quantity = ?4, updated_at = ?5
         WHERE tenant_id = ?1 AND sku = ?2 COLLATE NOCASE AND location = ?3",
    )
    .bind(&tenant_id.0)
    .bind(sku.trim())
    .bind(location.trim())
    .bind(quantity)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

fn item_from_row(row: SqliteRow) -> Result<InventoryItem, RepositoryError> {
    Ok(InventoryItem {
        tenant_id: TenantId(row.try_get("tenant_id")?),
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        location: row.try_get("location")?,
        quantity: row.try_get("quantity")?,
        reorder_point: row.try_get("reorder_point")?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
