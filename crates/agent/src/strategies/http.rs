use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tera::{Context, Tera};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use shopkeep_core::config::ToolsConfig;
use shopkeep_core::{ExecutionKind, ToolRegistryEntry, ToolSource};

use super::{parse_config, ExecutionStrategy, ToolCallContext};
use crate::error::ToolError;
use crate::secrets::SecretStore;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpToolConfig {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    query: BTreeMap<String, String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    batch: Option<BatchConfig>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Fan-out over an array argument: one request per element.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchConfig {
    items_field: String,
    #[serde(default)]
    max_parallel: Option<usize>,
    #[serde(default)]
    delay_ms: Option<u64>,
    #[serde(default)]
    continue_on_error: bool,
}

#[derive(Debug)]
struct RenderedRequest {
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

/// Templated HTTP calls. Placeholders are tera expressions over the tool arguments plus
/// `tenant_id`, `user_id` and `secrets.NAME`.
pub struct HttpStrategy {
    client: Client,
    secrets: Arc<dyn SecretStore>,
    default_max_parallel: usize,
    default_delay: Duration,
}

impl HttpStrategy {
    pub fn new(secrets: Arc<dyn SecretStore>, config: &ToolsConfig) -> Self {
        Self {
            client: Client::new(),
            secrets,
            default_max_parallel: config.http_max_parallel.max(1),
            default_delay: Duration::from_millis(config.http_item_delay_ms),
        }
    }

    fn template_context(
        &self,
        source: ToolSource,
        config: &HttpToolConfig,
        args: &Value,
        context: &ToolCallContext,
    ) -> Result<Map<String, Value>, ToolError> {
        let mut values = args.as_object().cloned().unwrap_or_default();
        values.insert("tenant_id".to_string(), Value::String(context.tenant_id.0.clone()));
        if let Some(user_id) = &context.user_id {
            values.insert("user_id".to_string(), Value::String(user_id.0.clone()));
        }

        let mut secrets = Map::new();
        for name in referenced_secrets(config) {
            // Shared secrets belong to the operator; tenant-authored tools only see their own.
            let secret = self
                .secrets
                .resolve(&context.tenant_id, &name)
                .or_else(|| match source {
                    ToolSource::System => self.secrets.resolve_shared(&name),
                    ToolSource::Custom => None,
                })
                .ok_or_else(|| {
                    ToolError::Configuration(format!("secret `{name}` is not available"))
                })?;
            secrets.insert(name, Value::String(secret.expose_secret().to_string()));
        }
        values.insert("secrets".to_string(), Value::Object(secrets));
        Ok(values)
    }

    async fn execute_batch(
        &self,
        config: &HttpToolConfig,
        batch: &BatchConfig,
        base: Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let items = base
            .get(&batch.items_field)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                ToolError::Validation(format!("`{}` must be an array", batch.items_field))
            })?;

        let mut requests = Vec::with_capacity(items.len());
        for item in &items {
            let mut values = base.clone();
            if let Value::Object(fields) = item {
                for (key, value) in fields {
                    values.insert(key.clone(), value.clone());
                }
            }
            values.insert("item".to_string(), item.clone());
            requests.push(render(config, &values)?);
        }

        let total = requests.len();
        let max_parallel = batch.max_parallel.unwrap_or(self.default_max_parallel).max(1);
        let delay = batch.delay_ms.map(Duration::from_millis).unwrap_or(self.default_delay);
        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let halted = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let permit = Arc::clone(&semaphore).acquire_owned().await.map_err(|error| {
                ToolError::Downstream(format!("batch was interrupted: {error}"))
            })?;
            if halted.load(Ordering::SeqCst) {
                break;
            }

            let client = self.client.clone();
            let halted = Arc::clone(&halted);
            let continue_on_error = batch.continue_on_error;
            tasks.spawn(async move {
                let outcome = send(&client, request).await;
                if outcome.is_err() && !continue_on_error {
                    halted.store(true, Ordering::SeqCst);
                }
                drop(permit);
                (index, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    warn!(event_name = "tools.http.batch_task_failed", error = %error);
                    return Err(ToolError::Downstream("a batch request task failed".to_string()));
                }
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);

        if !batch.continue_on_error {
            if let Some((index, Err(error))) = outcomes.iter().find(|(_, outcome)| outcome.is_err()) {
                return Err(ToolError::Downstream(format!("batch item {index} failed: {error}")));
            }
        }

        let succeeded = outcomes.iter().filter(|(_, outcome)| outcome.is_ok()).count();
        let results: Vec<Value> = outcomes
            .into_iter()
            .map(|(index, outcome)| match outcome {
                Ok(data) => json!({"index": index, "success": true, "data": data}),
                Err(error) => json!({"index": index, "success": false, "error": error.to_string()}),
            })
            .collect();

        debug!(event_name = "tools.http.batch_completed", total, succeeded, "http batch finished");
        Ok(json!({
            "total": total,
            "succeeded": succeeded,
            "failed": results.len() - succeeded,
            "results": results,
        }))
    }
}

#[async_trait]
impl ExecutionStrategy for HttpStrategy {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Http
    }

    async fn execute(
        &self,
        entry: &ToolRegistryEntry,
        args: Value,
        context: &ToolCallContext,
    ) -> Result<Value, ToolError> {
        let config: HttpToolConfig = parse_config(entry)?;
        let values = self.template_context(entry.source, &config, &args, context)?;

        match &config.batch {
            Some(batch) => self.execute_batch(&config, batch, values).await,
            None => send(&self.client, render(&config, &values)?).await,
        }
    }
}

async fn send(client: &Client, request: RenderedRequest) -> Result<Value, ToolError> {
    let mut builder = client.request(request.method, &request.url);
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }

    // The rendered url can carry secrets, so it stays out of errors and logs.
    let response = builder.send().await.map_err(|error| {
        if error.is_timeout() {
            ToolError::Downstream("http request timed out".to_string())
        } else {
            ToolError::Downstream("http request could not be sent".to_string())
        }
    })?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|_| ToolError::Downstream("http response body could not be read".to_string()))?;
    if !status.is_success() {
        return Err(ToolError::Downstream(format!("http request failed with status {status}")));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn render(
    config: &HttpToolConfig,
    values: &Map<String, Value>,
) -> Result<RenderedRequest, ToolError> {
    let context = Context::from_value(Value::Object(values.clone())).map_err(|error| {
        ToolError::Validation(format!("arguments cannot be used in a template: {error}"))
    })?;

    let method = render_text("method", &config.method, &context)?.trim().to_ascii_uppercase();
    let method = Method::from_bytes(method.as_bytes()).map_err(|_| {
        ToolError::Configuration(format!("`{}` is not an http method", config.method))
    })?;
    let url = render_text("url", &config.url, &context)?;

    let mut query = Vec::with_capacity(config.query.len());
    for (name, template) in &config.query {
        query.push((name.clone(), render_text(name, template, &context)?));
    }
    let mut headers = Vec::with_capacity(config.headers.len());
    for (name, template) in &config.headers {
        headers.push((name.clone(), render_text(name, template, &context)?));
    }
    let body = config.body.as_ref().map(|body| render_value(body, values, &context)).transpose()?;

    Ok(RenderedRequest { method, url, query, headers, body })
}

fn render_text(field: &str, template: &str, context: &Context) -> Result<String, ToolError> {
    if !template.contains("{{") && !template.contains("{%") {
        return Ok(template.to_string());
    }
    Tera::one_off(template, context, false).map_err(|error| {
        let detail = std::error::Error::source(&error)
            .map(ToString::to_string)
            .unwrap_or_else(|| error.to_string());
        ToolError::Validation(format!("could not render `{field}`: {detail}"))
    })
}

/// Renders string leaves of a JSON body. A leaf that is exactly one placeholder keeps the
/// argument's JSON type instead of becoming text.
fn render_value(
    body: &Value,
    values: &Map<String, Value>,
    context: &Context,
) -> Result<Value, ToolError> {
    match body {
        Value::String(template) => {
            if let Some(raw) = sole_placeholder(template).and_then(|path| lookup(values, path)) {
                return Ok(raw.clone());
            }
            render_text("body", template, context).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, values, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => {
            let mut rendered = Map::with_capacity(fields.len());
            for (key, value) in fields {
                rendered.insert(key.clone(), render_value(value, values, context)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn sole_placeholder(template: &str) -> Option<&str> {
    let inner = template.trim().strip_prefix("{{")?.strip_suffix("}}")?.trim();
    let is_path = !inner.is_empty()
        && inner.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.');
    is_path.then_some(inner)
}

fn lookup<'a>(values: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = values.get(segments.next()?)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Names used as `secrets.NAME` anywhere in the request templates.
fn referenced_secrets(config: &HttpToolConfig) -> BTreeSet<String> {
    let mut templates: Vec<&str> = vec![config.method.as_str(), config.url.as_str()];
    templates.extend(config.query.values().map(String::as_str));
    templates.extend(config.headers.values().map(String::as_str));
    let mut body_strings = Vec::new();
    if let Some(body) = &config.body {
        collect_strings(body, &mut body_strings);
    }
    templates.extend(body_strings);

    let mut names = BTreeSet::new();
    for template in templates {
        let mut rest = template;
        while let Some(position) = rest.find("secrets.") {
            rest = &rest[position + "secrets.".len()..];
            let name: String =
                rest.chars().take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_').collect();
            if !name.is_empty() {
                names.insert(name);
            }
        }
    }
    names
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(text) => out.push(text),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(fields) => fields.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}
