use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

pub const DEMO_TENANT_ID: &str = "tenant-demo";

const SEED_SKUS: &[(&str, &str)] = &[
    ("SKU-MUG-01", "main"),
    ("SKU-MUG-01", "annex"),
    ("SKU-TEE-02", "main"),
    ("SKU-CAP-03", "main"),
    ("SKU-BAG-04", "main"),
];

const SEED_CUSTOMER_IDS: &[&str] = &["cust-demo-001", "cust-demo-002", "cust-demo-003"];

const SEED_ORDERS: &[(&str, &str)] =
    &[("ord-demo-001", "pending"), ("ord-demo-002", "paid"), ("ord-demo-003", "fulfilled")];

/// Demo shop used by `shopkeep seed` and by tests that need business data.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            tenant_id: DEMO_TENANT_ID,
            inventory_rows: SEED_SKUS.len(),
            customers: SEED_CUSTOMER_IDS.len(),
            orders: SEED_ORDERS.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (sku, location) in SEED_SKUS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM inventory_item WHERE tenant_id = ?1 AND sku = ?2 AND location = ?3)",
            )
            .bind(DEMO_TENANT_ID)
            .bind(sku)
            .bind(location)
            .fetch_one(pool)
            .await?;
            checks.push((format!("inventory {sku}@{location}"), exists == 1));
        }

        for customer_id in SEED_CUSTOMER_IDS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM customer WHERE tenant_id = ?1 AND id = ?2)",
            )
            .bind(DEMO_TENANT_ID)
            .bind(customer_id)
            .fetch_one(pool)
            .await?;
            checks.push((format!("customer {customer_id}"), exists == 1));
        }

        for (order_id, status) in SEED_ORDERS {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sales_order WHERE tenant_id = ?1 AND id = ?2 AND status = ?3)",
            )
            .bind(DEMO_TENANT_ID)
            .bind(order_id)
            .bind(status)
            .fetch_one(pool)
            .await?;
            checks.push((format!("order {order_id} ({status})"), exists == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        for table in ["sales_order", "customer", "inventory_item", "email_outbox"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE tenant_id = ?"))
                .bind(DEMO_TENANT_ID)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub tenant_id: &'static str,
    pub inventory_rows: usize,
    pub customers: usize,
    pub orders: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}
