use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use shopkeep_core::domain::business::OrderStatus;
use shopkeep_db::repositories::OrderRepository;

use super::{decode_action, to_json};
use crate::error::ToolError;
use crate::strategies::{LocalTool, ToolCallContext};

pub const ACTIONS: &[&str] = &["list", "get", "update_status"];

const DEFAULT_LIST_LIMIT: u32 = 20;
const MAX_LIST_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum OrdersAction {
    List {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        limit: Option<u32>,
    },
    Get {
        order_id: String,
    },
    UpdateStatus {
        order_id: String,
        status: String,
    },
}

pub struct OrdersTool {
    orders: Arc<dyn OrderRepository>,
}

impl OrdersTool {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }
}

fn parse_status(value: &str) -> Result<OrderStatus, ToolError> {
    OrderStatus::parse(value).ok_or_else(|| {
        let allowed: Vec<_> = OrderStatus::ALL.iter().map(OrderStatus::as_str).collect();
        ToolError::Validation(format!(
            "unknown order status `{value}`; expected one of: {}",
            allowed.join(", ")
        ))
    })
}

#[async_trait]
impl LocalTool for OrdersTool {
    fn name(&self) -> &'static str {
        "orders"
    }

    async fn execute(&self, args: Value, context: &ToolCallContext) -> Result<Value, ToolError> {
        let tenant_id = &context.tenant_id;

        match decode_action(self.name(), &args, ACTIONS)? {
            OrdersAction::List { status, limit } => {
                let status = status.as_deref().map(parse_status).transpose()?;
                let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
                let orders = self.orders.list(tenant_id, status, limit).await?;
                Ok(json!({"count": orders.len(), "orders": to_json(&orders)?}))
            }
            OrdersAction::Get { order_id } => {
                let order = self
                    .orders
                    .find_by_id(tenant_id, &order_id)
                    .await?
                    .ok_or_else(|| ToolError::Downstream(format!("order `{order_id}` was not found")))?;
                to_json(&order)
            }
            OrdersAction::UpdateStatus { order_id, status } => {
                let status = parse_status(&status)?;
                let order = self.orders.update_status(tenant_id, &order_id, status).await?;
                to_json(&order)
            }
        }
    }
}
