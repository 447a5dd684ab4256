use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use shopkeep_core::config::RpcConfig;
use shopkeep_core::{ExecutionKind, ToolRegistryEntry};

use super::{parse_config, ExecutionStrategy, ToolCallContext};
use crate::error::ToolError;

/// Remote procedures reachable by name. Failures carry the procedure's own message.
#[async_trait]
pub trait RpcBackend: Send + Sync {
    async fn call(&self, procedure: &str, payload: Value) -> Result<Value, ToolError>;
}

/// POSTs JSON to `{base_url}/rpc/{procedure}`.
pub struct HttpRpcBackend {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpRpcBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let client = Client::builder().timeout(timeout).build().map_err(|error| {
            ToolError::Configuration(format!("rpc client could not be built: {error}"))
        })?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string(), api_key })
    }

    /// `None` when no base url is configured; rpc tools then fail as misconfigured.
    pub fn from_config(config: &RpcConfig) -> Result<Option<Self>, ToolError> {
        match &config.base_url {
            Some(base_url) => Self::new(
                base_url.clone(),
                config.api_key.clone(),
                Duration::from_secs(config.timeout_secs),
            )
            .map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RpcBackend for HttpRpcBackend {
    async fn call(&self, procedure: &str, payload: Value) -> Result<Value, ToolError> {
        let url = format!("{}/rpc/{procedure}", self.base_url);
        let mut request = self.client.post(&url).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request
                .header("apikey", api_key.expose_secret())
                .bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            warn!(event_name = "tools.rpc.request_failed", procedure, error = %error);
            if error.is_timeout() {
                ToolError::Downstream(format!("procedure `{procedure}` timed out"))
            } else {
                ToolError::Downstream(format!("procedure `{procedure}` could not be reached"))
            }
        })?;

        let status = response.status();
        let body: Value = match response.text().await {
            Ok(text) if text.trim().is_empty() => Value::Null,
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            Err(error) => {
                return Err(ToolError::Downstream(format!(
                    "procedure `{procedure}` returned an unreadable body: {error}"
                )))
            }
        };

        if status.is_success() {
            return Ok(body);
        }

        let message = ["message", "error", "hint"]
            .iter()
            .find_map(|field| body.get(*field).and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| body.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("procedure `{procedure}` failed with status {status}"));
        Err(ToolError::Downstream(message))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RpcToolConfig {
    procedure: String,
}

pub struct RpcStrategy {
    backend: Option<Arc<dyn RpcBackend>>,
}

impl RpcStrategy {
    pub fn new(backend: Arc<dyn RpcBackend>) -> Self {
        Self { backend: Some(backend) }
    }

    pub fn unconfigured() -> Self {
        Self { backend: None }
    }
}

#[async_trait]
impl ExecutionStrategy for RpcStrategy {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Rpc
    }

    async fn execute(
        &self,
        entry: &ToolRegistryEntry,
        args: Value,
        context: &ToolCallContext,
    ) -> Result<Value, ToolError> {
        let config: RpcToolConfig = parse_config(entry)?;
        let backend = self.backend.as_ref().ok_or_else(|| {
            ToolError::Configuration("no rpc backend is configured (rpc.base_url)".to_string())
        })?;

        backend.call(&config.procedure, json!({"tenant_id": context.tenant_id.0, "args": args})).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use shopkeep_core::ExecutionKind;

    use super::{HttpRpcBackend, RpcStrategy};
    use crate::error::ToolError;
    use crate::strategies::test_support::{context, entry};
    use crate::strategies::ExecutionStrategy;

    fn strategy(server: &MockServer) -> RpcStrategy {
        let backend = HttpRpcBackend::new(
            server.uri(),
            Some(SecretString::from("anon-key")),
            Duration::from_secs(5),
        )
        .expect("backend");
        RpcStrategy::new(Arc::new(backend))
    }

    #[tokio::test]
    async fn posts_tenant_and_args_to_named_procedure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/loyalty_balance"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer anon-key"))
            .and(body_json(json!({"tenant_id": "tenant-demo", "args": {"customer_id": "c-1"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"points": 120})))
            .expect(1)
            .mount(&server)
            .await;

        let output = strategy(&server)
            .execute(
                &entry("loyalty", ExecutionKind::Rpc, json!({"procedure": "loyalty_balance"})),
                json!({"customer_id": "c-1"}),
                &context(),
            )
            .await
            .expect("rpc call");
        assert_eq!(output, json!({"points": 120}));
    }

    #[tokio::test]
    async fn procedure_failure_message_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/close_register"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"message": "register already closed"})),
            )
            .mount(&server)
            .await;

        let error = strategy(&server)
            .execute(
                &entry("close", ExecutionKind::Rpc, json!({"procedure": "close_register"})),
                json!({}),
                &context(),
            )
            .await
            .expect_err("procedure error");
        assert_eq!(error, ToolError::Downstream("register already closed".to_string()));
    }

    #[tokio::test]
    async fn missing_backend_or_procedure_is_a_configuration_error() {
        let unconfigured = RpcStrategy::unconfigured()
            .execute(
                &entry("loyalty", ExecutionKind::Rpc, json!({"procedure": "p"})),
                json!({}),
                &context(),
            )
            .await
            .expect_err("no backend");
        assert_eq!(unconfigured.kind(), "configuration");

        let server = MockServer::start().await;
        let bad_config = strategy(&server)
            .execute(&entry("loyalty", ExecutionKind::Rpc, json!({})), json!({}), &context())
            .await
            .expect_err("no procedure");
        assert_eq!(bad_config.kind(), "configuration");
    }
}
