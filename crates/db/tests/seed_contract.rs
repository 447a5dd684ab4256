use serde_json::json;

use shopkeep_core::domain::business::OrderStatus;
use shopkeep_core::TenantId;
use shopkeep_db::fixtures::DEMO_TENANT_ID;
use shopkeep_db::repositories::{
    InventoryRepository, OrderRepository, SqlInventoryRepository, SqlOrderRepository,
};
use shopkeep_db::{connect_with_settings, migrations, DbPool, DemoSeedDataset, QueryRunner, SqlQueryRunner};

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require_eq {
    ($left:expr, $right:expr, $($arg:tt)*) => {
        if $left != $right {
            return Err(format!($($arg)*));
        }
    };
}

async fn seeded_pool() -> SeedContractTestResult<DbPool> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.map_err(|e| e.to_string())?;
    migrations::run_pending(&pool).await.map_err(|e| e.to_string())?;
    DemoSeedDataset::load(&pool).await.map_err(|e| e.to_string())?;
    Ok(pool)
}

#[tokio::test]
async fn demo_stock_matches_the_documented_totals() -> SeedContractTestResult {
    let pool = seeded_pool().await?;
    let tenant = TenantId(DEMO_TENANT_ID.to_string());
    let inventory = SqlInventoryRepository::new(pool.clone());

    let items = inventory.list(&tenant).await.map_err(|e| e.to_string())?;
    let total: i64 = items.iter().map(|item| item.quantity).sum();
    require_eq!(total, 169, "demo stock should total 169 units, got {total}");

    let main: i64 = items.iter().filter(|item| item.location == "main").map(|item| item.quantity).sum();
    require_eq!(main, 161, "main location should hold 161 units, got {main}");

    let low = inventory.list_low_stock(&tenant).await.map_err(|e| e.to_string())?;
    require_eq!(low.len(), 3, "expected three low-stock rows, got {}", low.len());

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn demo_orders_cover_each_early_lifecycle_state() -> SeedContractTestResult {
    let pool = seeded_pool().await?;
    let tenant = TenantId(DEMO_TENANT_ID.to_string());
    let orders = SqlOrderRepository::new(pool.clone());

    for (status, expected_id) in [
        (OrderStatus::Pending, "ord-demo-001"),
        (OrderStatus::Paid, "ord-demo-002"),
        (OrderStatus::Fulfilled, "ord-demo-003"),
    ] {
        let listed = orders.list(&tenant, Some(status), 10).await.map_err(|e| e.to_string())?;
        let ids: Vec<&str> = listed.iter().map(|order| order.id.as_str()).collect();
        require_eq!(ids, vec![expected_id], "unexpected {} orders: {ids:?}", status.as_str());
    }

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn query_runner_sees_seeded_rows_as_json() -> SeedContractTestResult {
    let pool = seeded_pool().await?;
    let runner = SqlQueryRunner::new(pool.clone());

    let rows = runner
        .fetch(
            "SELECT name, email FROM customer WHERE tenant_id = ? ORDER BY id",
            &[json!(DEMO_TENANT_ID)],
        )
        .await
        .map_err(|e| e.to_string())?;
    require_eq!(rows.len(), 3, "expected three customers, got {}", rows.len());
    require_eq!(rows[0].get("name"), Some(&json!("Ada Lovelace")), "first customer: {:?}", rows[0]);
    require_eq!(rows[2].get("email"), Some(&json!(null)), "third customer has no email: {:?}", rows[2]);

    pool.close().await;
    Ok(())
}
