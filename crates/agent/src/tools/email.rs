use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shopkeep_core::domain::business::OutboundEmail;
use shopkeep_db::repositories::EmailOutboxRepository;

use crate::error::ToolError;
use crate::strategies::{LocalTool, ToolCallContext};

#[derive(Debug, Deserialize)]
struct SendEmailArgs {
    to: String,
    subject: String,
    body: String,
}

/// Queues a message in the outbox. Registered as requiring approval, so it only runs
/// once a pending execution has been approved.
pub struct SendEmailTool {
    outbox: Arc<dyn EmailOutboxRepository>,
}

impl SendEmailTool {
    pub fn new(outbox: Arc<dyn EmailOutboxRepository>) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl LocalTool for SendEmailTool {
    fn name(&self) -> &'static str {
        "send_email"
    }

    async fn execute(&self, args: Value, context: &ToolCallContext) -> Result<Value, ToolError> {
        let args: SendEmailArgs = serde_json::from_value(args)
            .map_err(|error| ToolError::Validation(format!("invalid email arguments: {error}")))?;

        let to = args.to.trim();
        let valid_address = to
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !valid_address {
            return Err(ToolError::Validation(format!("`{to}` is not a valid email address")));
        }
        if args.subject.trim().is_empty() {
            return Err(ToolError::Validation("`subject` must not be blank".to_string()));
        }

        let email = OutboundEmail {
            id: Uuid::new_v4().to_string(),
            tenant_id: context.tenant_id.clone(),
            to: to.to_string(),
            subject: args.subject.trim().to_string(),
            body: args.body,
            status: "queued".to_string(),
            created_at: Utc::now(),
        };
        self.outbox.enqueue(email.clone()).await?;

        info!(
            event_name = "tools.email.queued",
            tenant_id = %context.tenant_id,
            email_id = %email.id,
            "email queued for delivery"
        );
        Ok(json!({"email_id": email.id, "status": email.status}))
    }
}
