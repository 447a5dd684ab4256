use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shopkeep_core::domain::business::Customer;
use shopkeep_db::repositories::CustomerRepository;

use super::{decode_action, to_json};
use crate::error::ToolError;
use crate::strategies::{LocalTool, ToolCallContext};

pub const ACTIONS: &[&str] = &["search", "get", "create"];

const DEFAULT_SEARCH_LIMIT: u32 = 10;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum CustomersAction {
    Search {
        query: String,
        #[serde(default)]
        limit: Option<u32>,
    },
    Get {
        customer_id: String,
    },
    Create {
        name: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        phone: Option<String>,
    },
}

pub struct CustomersTool {
    customers: Arc<dyn CustomerRepository>,
}

impl CustomersTool {
    pub fn new(customers: Arc<dyn CustomerRepository>) -> Self {
        Self { customers }
    }
}

#[async_trait]
impl LocalTool for CustomersTool {
    fn name(&self) -> &'static str {
        "customers"
    }

    async fn execute(&self, args: Value, context: &ToolCallContext) -> Result<Value, ToolError> {
        let tenant_id = &context.tenant_id;

        match decode_action(self.name(), &args, ACTIONS)? {
            CustomersAction::Search { query, limit } => {
                let query = query.trim();
                if query.is_empty() {
                    return Err(ToolError::Validation("`query` must not be blank".to_string()));
                }
                let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, 50);
                let customers = self.customers.search(tenant_id, query, limit).await?;
                Ok(json!({"count": customers.len(), "customers": to_json(&customers)?}))
            }
            CustomersAction::Get { customer_id } => {
                let customer = self.customers.find_by_id(tenant_id, &customer_id).await?.ok_or_else(
                    || ToolError::Downstream(format!("customer `{customer_id}` was not found")),
                )?;
                to_json(&customer)
            }
            CustomersAction::Create { name, email, phone } => {
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(ToolError::Validation("`name` must not be blank".to_string()));
                }
                let email = email.map(|email| email.trim().to_string()).filter(|email| !email.is_empty());
                if email.as_deref().is_some_and(|email| !email.contains('@')) {
                    return Err(ToolError::Validation("`email` is not a valid address".to_string()));
                }

                let customer = Customer {
                    id: format!("cust-{}", Uuid::new_v4().simple()),
                    tenant_id: tenant_id.clone(),
                    name,
                    email,
                    phone: phone.map(|phone| phone.trim().to_string()).filter(|phone| !phone.is_empty()),
                    created_at: Utc::now(),
                };
                self.customers.create(customer.clone()).await?;
                to_json(&customer)
            }
        }
    }
}
