//! Built-in local tools over the shop's business data.
//!
//! Consolidated tools take an `action` discriminator and decode the rest of their
//! arguments into a typed action enum.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ToolError;

pub mod builtin;
pub mod customers;
pub mod email;
pub mod inventory;
pub mod orders;

pub use builtin::{builtin_local_tools, sync_system_tools, system_tool_definitions, BusinessStores};
pub use customers::CustomersTool;
pub use email::SendEmailTool;
pub use inventory::InventoryTool;
pub use orders::OrdersTool;

/// Checks `action` against the allowed set, then decodes the typed action.
pub(crate) fn decode_action<T: DeserializeOwned>(
    tool: &str,
    args: &Value,
    allowed: &[&str],
) -> Result<T, ToolError> {
    let action = args.get("action").and_then(Value::as_str).ok_or_else(|| {
        ToolError::Validation(format!("`action` is required; expected one of: {}", allowed.join(", ")))
    })?;

    if !allowed.contains(&action) {
        return Err(ToolError::UnknownAction {
            tool: tool.to_string(),
            action: action.to_string(),
            allowed: allowed.iter().map(|name| name.to_string()).collect(),
        });
    }

    serde_json::from_value(args.clone())
        .map_err(|error| ToolError::Validation(format!("invalid `{action}` arguments: {error}")))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|error| ToolError::Downstream(format!("result could not be encoded: {error}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use shopkeep_db::fixtures::DemoSeedDataset;
    use shopkeep_db::{connect_with_settings, migrations, DbPool};

    use super::BusinessStores;

    pub async fn seeded() -> (DbPool, Arc<BusinessStores>) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        DemoSeedDataset::load(&pool).await.expect("seed");
        let stores = Arc::new(BusinessStores::sql(pool.clone()));
        (pool, stores)
    }
}
