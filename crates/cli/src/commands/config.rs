use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use shopkeep_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file_path = detect_config_path();
    let file_doc = load_config_file_doc(file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in effective_values(&config) {
        let source = field_source(key, &env_keys, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {key} = {value} (source: {source})"));
    }
    lines.join("\n")
}

/// Every reported setting with the environment variables that can override it.
fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, Vec<&'static str>)> {
    let optional = |value: Option<&str>| value.unwrap_or("<unset>").to_string();

    vec![
        ("database.url", config.database.url.clone(), vec!["SHOPKEEP_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            vec!["SHOPKEEP_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            vec!["SHOPKEEP_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "agent.max_tool_rounds",
            config.agent.max_tool_rounds.to_string(),
            vec!["SHOPKEEP_AGENT_MAX_TOOL_ROUNDS"],
        ),
        (
            "agent.system_prompt",
            if config.agent.system_prompt.is_some() { "<set>" } else { "<unset>" }.to_string(),
            vec!["SHOPKEEP_AGENT_SYSTEM_PROMPT"],
        ),
        (
            "tools.registry_ttl_secs",
            config.tools.registry_ttl_secs.to_string(),
            vec!["SHOPKEEP_TOOLS_REGISTRY_TTL_SECS"],
        ),
        ("tools.custom_prefix", config.tools.custom_prefix.clone(), vec!["SHOPKEEP_TOOLS_CUSTOM_PREFIX"]),
        (
            "tools.default_max_execution_ms",
            config.tools.default_max_execution_ms.to_string(),
            vec!["SHOPKEEP_TOOLS_DEFAULT_MAX_EXECUTION_MS"],
        ),
        (
            "tools.http_max_parallel",
            config.tools.http_max_parallel.to_string(),
            vec!["SHOPKEEP_TOOLS_HTTP_MAX_PARALLEL"],
        ),
        (
            "tools.http_item_delay_ms",
            config.tools.http_item_delay_ms.to_string(),
            vec!["SHOPKEEP_TOOLS_HTTP_ITEM_DELAY_MS"],
        ),
        (
            "tools.secret_env_prefix",
            config.tools.secret_env_prefix.clone(),
            vec!["SHOPKEEP_TOOLS_SECRET_ENV_PREFIX"],
        ),
        ("rpc.base_url", optional(config.rpc.base_url.as_deref()), vec!["SHOPKEEP_RPC_BASE_URL"]),
        (
            "rpc.api_key",
            redact_key(config.rpc.api_key.as_ref().map(|key| key.expose_secret())),
            vec!["SHOPKEEP_RPC_API_KEY"],
        ),
        ("rpc.timeout_secs", config.rpc.timeout_secs.to_string(), vec!["SHOPKEEP_RPC_TIMEOUT_SECS"]),
        (
            "logging.level",
            config.logging.level.clone(),
            vec!["SHOPKEEP_LOGGING_LEVEL", "SHOPKEEP_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            vec!["SHOPKEEP_LOGGING_FORMAT", "SHOPKEEP_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("shopkeep.toml"), PathBuf::from("config/shopkeep.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}

fn redact_key(key: Option<&str>) -> String {
    match key.map(str::trim) {
        None => "<unset>".to_string(),
        Some("") => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}
