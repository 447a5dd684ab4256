use std::sync::Arc;

use serde_json::{json, Value};

use shopkeep_core::{ExecutionKind, ToolRegistryEntry, ToolSource};
use shopkeep_db::repositories::{
    CustomerRepository, EmailOutboxRepository, InventoryRepository, OrderRepository,
    RepositoryError, SqlCustomerRepository, SqlEmailOutboxRepository, SqlInventoryRepository,
    SqlOrderRepository, ToolDefinitionRepository,
};
use shopkeep_db::DbPool;

use super::{customers, inventory, orders, CustomersTool, InventoryTool, OrdersTool, SendEmailTool};
use crate::strategies::LocalStrategy;

/// Repositories the built-in tools read and write.
pub struct BusinessStores {
    pub inventory: Arc<dyn InventoryRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub customers: Arc<dyn CustomerRepository>,
    pub outbox: Arc<dyn EmailOutboxRepository>,
}

impl BusinessStores {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            inventory: Arc::new(SqlInventoryRepository::new(pool.clone())),
            orders: Arc::new(SqlOrderRepository::new(pool.clone())),
            customers: Arc::new(SqlCustomerRepository::new(pool.clone())),
            outbox: Arc::new(SqlEmailOutboxRepository::new(pool)),
        }
    }
}

pub fn builtin_local_tools(stores: &BusinessStores) -> LocalStrategy {
    LocalStrategy::new()
        .with_tool(InventoryTool::new(stores.inventory.clone()))
        .with_tool(OrdersTool::new(stores.orders.clone()))
        .with_tool(CustomersTool::new(stores.customers.clone()))
        .with_tool(SendEmailTool::new(stores.outbox.clone()))
}

fn action_property(actions: &[&str]) -> Value {
    json!({"type": "string", "description": format!("One of: {}", actions.join(", "))})
}

fn local_entry(
    name: &str,
    category: &str,
    description: &str,
    input_schema: Value,
    is_read_only: bool,
    max_execution_time_ms: u64,
) -> ToolRegistryEntry {
    ToolRegistryEntry {
        name: name.to_string(),
        category: category.to_string(),
        description: description.to_string(),
        input_schema,
        execution_kind: ExecutionKind::Local,
        execution_config: json!({}),
        source: ToolSource::System,
        tenant_id: None,
        requires_tenant_id: true,
        requires_user_id: false,
        is_read_only,
        requires_approval: false,
        max_execution_time_ms,
        enabled: true,
    }
}

/// Registry rows for the built-in tools.
pub fn system_tool_definitions(default_max_execution_ms: u64) -> Vec<ToolRegistryEntry> {
    let inventory = local_entry(
        "inventory",
        "inventory",
        "Stock levels across locations. `summary` totals all stock; `lookup` shows one SKU; \
         `low_stock` lists rows at or below their reorder point; `adjust` adds `delta` units \
         (negative to remove); `transfer` moves units between locations; `bulk_set` sets \
         absolute quantities.",
        json!({
            "type": "object",
            "properties": {
                "action": action_property(inventory::ACTIONS),
                "sku": {"type": "string"},
                "location": {"type": "string", "description": "Defaults to `main`."},
                "delta": {"type": "integer"},
                "from_location": {"type": "string"},
                "to_location": {"type": "string"},
                "quantity": {"type": "integer"},
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "sku": {"type": "string"},
                            "location": {"type": "string"},
                            "quantity": {"type": "integer"}
                        },
                        "required": ["sku", "quantity"]
                    }
                }
            },
            "required": ["action"]
        }),
        false,
        default_max_execution_ms,
    );

    let orders = local_entry(
        "orders",
        "sales",
        "Customer orders. `list` filters by optional `status`; `get` returns one order; \
         `update_status` moves an order along pending, paid, fulfilled, cancelled, refunded.",
        json!({
            "type": "object",
            "properties": {
                "action": action_property(orders::ACTIONS),
                "order_id": {"type": "string"},
                "status": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["action"]
        }),
        false,
        default_max_execution_ms,
    );

    let customers = local_entry(
        "customers",
        "sales",
        "Customer records. `search` matches name, email or phone; `get` returns one \
         customer; `create` adds a customer.",
        json!({
            "type": "object",
            "properties": {
                "action": action_property(customers::ACTIONS),
                "query": {"type": "string"},
                "customer_id": {"type": "string"},
                "name": {"type": "string"},
                "email": {"type": "string"},
                "phone": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["action"]
        }),
        false,
        default_max_execution_ms,
    );

    let mut send_email = local_entry(
        "send_email",
        "communication",
        "Queue an email to a customer. Requires approval before it is sent.",
        json!({
            "type": "object",
            "properties": {
                "to": {"type": "string"},
                "subject": {"type": "string"},
                "body": {"type": "string"}
            },
            "required": ["to", "subject", "body"]
        }),
        false,
        default_max_execution_ms,
    );
    send_email.requires_approval = true;
    send_email.requires_user_id = true;

    vec![inventory, orders, customers, send_email]
}

/// Writes the built-in definitions to the registry table. Returns how many were saved.
pub async fn sync_system_tools(
    definitions: &dyn ToolDefinitionRepository,
    default_max_execution_ms: u64,
) -> Result<usize, RepositoryError> {
    let entries = system_tool_definitions(default_max_execution_ms);
    let count = entries.len();
    for entry in entries {
        definitions.save(entry).await?;
    }
    Ok(count)
}
