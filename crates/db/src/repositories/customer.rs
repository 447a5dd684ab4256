use sqlx::{sqlite::SqliteRow, Row};

use shopkeep_core::domain::business::Customer;
use shopkeep_core::TenantId;

use super::decode::parse_timestamp;
use super::{CustomerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomerRepository {
    pool: DbPool,
}

impl SqlCustomerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CustomerRepository for SqlCustomerRepository {
    async fn search(
        &self,
        tenant_id: &TenantId,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Customer>, RepositoryError> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, email, phone, created_at
             FROM customer
             WHERE tenant_id = ?1
               AND (name LIKE ?2 ESCAPE '\\' OR email LIKE ?2 ESCAPE '\\' OR phone LIKE ?2 ESCAPE '\\')
             ORDER BY name ASC
             LIMIT ?3",
        )
        .bind(&tenant_id.0)
        .bind(pattern)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(customer_from_row).collect()
    }

    async fn find_by_id(
        &self,
        tenant_id: &TenantId,
        id: &str,
    ) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, email, phone, created_at
             FROM customer
             WHERE tenant_id = ? AND id = ?",
        )
        .bind(&tenant_id.0)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(customer_from_row).transpose()
    }

    async fn create(&self, customer: Customer) -> Result<(), RepositoryError> {
        if let Some(email) = customer.email.as_deref() {
            let taken: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM customer WHERE tenant_id = ?1 AND email = ?2 COLLATE NOCASE)",
            )
            .bind(&customer.tenant_id.0)
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
            if taken == 1 {
                return Err(RepositoryError::Conflict(format!(
                    "a customer with email `{email}` already exists"
                )));
            }
        }

        sqlx::query(
            "INSERT INTO customer (id, tenant_id, name, email, phone, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&customer.id)
        .bind(&customer.tenant_id.0)
        .bind(&customer.name)
        .bind(customer.email.as_deref())
        .bind(customer.phone.as_deref())
        .bind(customer.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn escape_like(value: &str) -> String {
    value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn customer_from_row(row: SqliteRow) -> Result<Customer, RepositoryError> {
    Ok(Customer {
        id: row.try_get("id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
