use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use shopkeep_db::repositories::{InventoryRepository, StockLevel};

use super::{decode_action, to_json};
use crate::error::ToolError;
use crate::strategies::{LocalTool, ToolCallContext};

pub const ACTIONS: &[&str] = &["summary", "lookup", "low_stock", "adjust", "transfer", "bulk_set"];

const DEFAULT_LOCATION: &str = "main";

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum InventoryAction {
    Summary,
    Lookup {
        sku: String,
    },
    LowStock,
    Adjust {
        sku: String,
        #[serde(default = "default_location")]
        location: String,
        delta: i64,
    },
    Transfer {
        sku: String,
        from_location: String,
        to_location: String,
        quantity: i64,
    },
    BulkSet {
        items: Vec<BulkItem>,
    },
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    sku: String,
    #[serde(default = "default_location")]
    location: String,
    quantity: i64,
}

pub struct InventoryTool {
    inventory: Arc<dyn InventoryRepository>,
}

impl InventoryTool {
    pub fn new(inventory: Arc<dyn InventoryRepository>) -> Self {
        Self { inventory }
    }

    async fn summary(&self, context: &ToolCallContext) -> Result<Value, ToolError> {
        let items = self.inventory.list(&context.tenant_id).await?;

        let skus: BTreeSet<&str> = items.iter().map(|item| item.sku.as_str()).collect();
        let mut locations: BTreeMap<&str, i64> = BTreeMap::new();
        for item in &items {
            *locations.entry(item.location.as_str()).or_default() += item.quantity;
        }
        let low_stock: Vec<_> = items
            .iter()
            .filter(|item| item.is_low_stock())
            .map(|item| json!({"sku": item.sku, "location": item.location, "quantity": item.quantity}))
            .collect();

        Ok(json!({
            "sku_count": skus.len(),
            "total_units": items.iter().map(|item| item.quantity).sum::<i64>(),
            "low_stock_count": low_stock.len(),
            "low_stock": low_stock,
            "locations": locations,
        }))
    }
}

#[async_trait]
impl LocalTool for InventoryTool {
    fn name(&self) -> &'static str {
        "inventory"
    }

    async fn execute(&self, args: Value, context: &ToolCallContext) -> Result<Value, ToolError> {
        let tenant_id = &context.tenant_id;

        match decode_action(self.name(), &args, ACTIONS)? {
            InventoryAction::Summary => self.summary(context).await,
            InventoryAction::Lookup { sku } => {
                let items = self.inventory.find_by_sku(tenant_id, &sku).await?;
                if items.is_empty() {
                    return Err(ToolError::Downstream(format!("no inventory found for sku `{sku}`")));
                }
                let total: i64 = items.iter().map(|item| item.quantity).sum();
                Ok(json!({"sku": sku, "total_quantity": total, "items": to_json(&items)?}))
            }
            InventoryAction::LowStock => {
                let items = self.inventory.list_low_stock(tenant_id).await?;
                Ok(json!({"count": items.len(), "items": to_json(&items)?}))
            }
            InventoryAction::Adjust { sku, location, delta } => {
                if delta == 0 {
                    return Err(ToolError::Validation("`delta` must not be zero".to_string()));
                }
                let item = self.inventory.adjust(tenant_id, &sku, &location, delta).await?;
                to_json(&item)
            }
            InventoryAction::Transfer { sku, from_location, to_location, quantity } => {
                let (from, to) = self
                    .inventory
                    .transfer(tenant_id, &sku, &from_location, &to_location, quantity)
                    .await?;
                Ok(json!({"from": to_json(&from)?, "to": to_json(&to)?}))
            }
            InventoryAction::BulkSet { items } => {
                if items.is_empty() {
                    return Err(ToolError::Validation("`items` must not be empty".to_string()));
                }
                let levels = items
                    .into_iter()
                    .map(|item| StockLevel {
                        sku: item.sku,
                        location: item.location,
                        quantity: item.quantity,
                    })
                    .collect();
                let outcome = self.inventory.bulk_set(tenant_id, levels).await?;
                let missing: Vec<_> = outcome
                    .missing
                    .iter()
                    .map(|level| json!({"sku": level.sku, "location": level.location}))
                    .collect();
                Ok(json!({
                    "updated": outcome.updated.len(),
                    "items": to_json(&outcome.updated)?,
                    "missing": missing,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::InventoryTool;
    use crate::error::ToolError;
    use crate::strategies::test_support::context;
    use crate::strategies::LocalTool;
    use crate::tools::test_support::seeded;

    #[tokio::test]
    async fn summary_totals_demo_stock() {
        let (pool, stores) = seeded().await;
        let tool = InventoryTool::new(stores.inventory.clone());

        let summary = tool.execute(json!({"action": "summary"}), &context()).await.expect("summary");
        assert_eq!(summary["sku_count"], json!(4));
        assert_eq!(summary["total_units"], json!(169));
        assert_eq!(summary["low_stock_count"], json!(3));
        assert_eq!(summary["locations"], json!({"annex": 8, "main": 161}));

        pool.close().await;
    }

    #[tokio::test]
    async fn adjust_defaults_to_main_and_refuses_negative_stock() {
        let (pool, stores) = seeded().await;
        let tool = InventoryTool::new(stores.inventory.clone());

        let adjusted = tool
            .execute(json!({"action": "adjust", "sku": "SKU-TEE-02", "delta": 6}), &context())
            .await
            .expect("adjust");
        assert_eq!(adjusted["quantity"], json!(10));
        assert_eq!(adjusted["location"], json!("main"));

        let error = tool
            .execute(json!({"action": "adjust", "sku": "SKU-BAG-04", "delta": -1}), &context())
            .await
            .expect_err("negative");
        assert_eq!(error.kind(), "downstream");

        pool.close().await;
    }

    #[tokio::test]
    async fn transfer_and_bulk_set_report_results() {
        let (pool, stores) = seeded().await;
        let tool = InventoryTool::new(stores.inventory.clone());

        let moved = tool
            .execute(
                json!({"action": "transfer", "sku": "SKU-MUG-01", "from_location": "main", "to_location": "annex", "quantity": 20}),
                &context(),
            )
            .await
            .expect("transfer");
        assert_eq!(moved["from"]["quantity"], json!(100));
        assert_eq!(moved["to"]["quantity"], json!(28));

        let bulk = tool
            .execute(
                json!({"action": "bulk_set", "items": [
                    {"sku": "SKU-CAP-03", "quantity": 50},
                    {"sku": "SKU-NOPE-99", "location": "main", "quantity": 1}
                ]}),
                &context(),
            )
            .await
            .expect("bulk");
        assert_eq!(bulk["updated"], json!(1));
        assert_eq!(bulk["missing"], json!([{"sku": "SKU-NOPE-99", "location": "main"}]));

        let unknown = tool
            .execute(json!({"action": "lookup", "sku": "SKU-NOPE-99"}), &context())
            .await
            .expect_err("unknown sku");
        assert_eq!(unknown, ToolError::Downstream("no inventory found for sku `SKU-NOPE-99`".to_string()));

        pool.close().await;
    }
}
