use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub rpc: RpcConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_tool_rounds: u32,
    pub system_prompt: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ToolsConfig {
    pub registry_ttl_secs: u64,
    pub custom_prefix: String,
    pub default_max_execution_ms: u64,
    pub http_max_parallel: usize,
    pub http_item_delay_ms: u64,
    pub secret_env_prefix: String,
}

#[derive(Clone, Debug)]
pub struct RpcConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub max_tool_rounds: Option<u32>,
    pub registry_ttl_secs: Option<u64>,
    pub rpc_base_url: Option<String>,
    pub rpc_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://shopkeep.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            agent: AgentConfig { max_tool_rounds: 8, system_prompt: None },
            tools: ToolsConfig {
                registry_ttl_secs: 60,
                custom_prefix: "custom_".to_string(),
                default_max_execution_ms: 30_000,
                http_max_parallel: 4,
                http_item_delay_ms: 0,
                secret_env_prefix: "SHOPKEEP_SECRET_".to_string(),
            },
            rpc: RpcConfig { base_url: None, api_key: None, timeout_secs: 30 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("shopkeep.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_tool_rounds) = agent.max_tool_rounds {
                self.agent.max_tool_rounds = max_tool_rounds;
            }
            if let Some(system_prompt) = agent.system_prompt {
                self.agent.system_prompt = Some(system_prompt);
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(registry_ttl_secs) = tools.registry_ttl_secs {
                self.tools.registry_ttl_secs = registry_ttl_secs;
            }
            if let Some(custom_prefix) = tools.custom_prefix {
                self.tools.custom_prefix = custom_prefix;
            }
            if let Some(default_max_execution_ms) = tools.default_max_execution_ms {
                self.tools.default_max_execution_ms = default_max_execution_ms;
            }
            if let Some(http_max_parallel) = tools.http_max_parallel {
                self.tools.http_max_parallel = http_max_parallel;
            }
            if let Some(http_item_delay_ms) = tools.http_item_delay_ms {
                self.tools.http_item_delay_ms = http_item_delay_ms;
            }
            if let Some(secret_env_prefix) = tools.secret_env_prefix {
                self.tools.secret_env_prefix = secret_env_prefix;
            }
        }

        if let Some(rpc) = patch.rpc {
            if let Some(base_url) = rpc.base_url {
                self.rpc.base_url = Some(base_url);
            }
            if let Some(rpc_api_key_value) = rpc.api_key {
                self.rpc.api_key = Some(secret_value(rpc_api_key_value));
            }
            if let Some(timeout_secs) = rpc.timeout_secs {
                self.rpc.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SHOPKEEP_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SHOPKEEP_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("SHOPKEEP_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SHOPKEEP_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("SHOPKEEP_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SHOPKEEP_AGENT_MAX_TOOL_ROUNDS") {
            self.agent.max_tool_rounds = parse_u32("SHOPKEEP_AGENT_MAX_TOOL_ROUNDS", &value)?;
        }
        if let Some(value) = read_env("SHOPKEEP_AGENT_SYSTEM_PROMPT") {
            self.agent.system_prompt = Some(value);
        }

        if let Some(value) = read_env("SHOPKEEP_TOOLS_REGISTRY_TTL_SECS") {
            self.tools.registry_ttl_secs = parse_u64("SHOPKEEP_TOOLS_REGISTRY_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("SHOPKEEP_TOOLS_CUSTOM_PREFIX") {
            self.tools.custom_prefix = value;
        }
        if let Some(value) = read_env("SHOPKEEP_TOOLS_DEFAULT_MAX_EXECUTION_MS") {
            self.tools.default_max_execution_ms =
                parse_u64("SHOPKEEP_TOOLS_DEFAULT_MAX_EXECUTION_MS", &value)?;
        }
        if let Some(value) = read_env("SHOPKEEP_TOOLS_HTTP_MAX_PARALLEL") {
            self.tools.http_max_parallel =
                parse_u32("SHOPKEEP_TOOLS_HTTP_MAX_PARALLEL", &value)? as usize;
        }
        if let Some(value) = read_env("SHOPKEEP_TOOLS_HTTP_ITEM_DELAY_MS") {
            self.tools.http_item_delay_ms =
                parse_u64("SHOPKEEP_TOOLS_HTTP_ITEM_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SHOPKEEP_TOOLS_SECRET_ENV_PREFIX") {
            self.tools.secret_env_prefix = value;
        }

        if let Some(value) = read_env("SHOPKEEP_RPC_BASE_URL") {
            self.rpc.base_url = Some(value);
        }
        if let Some(value) = read_env("SHOPKEEP_RPC_API_KEY") {
            self.rpc.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SHOPKEEP_RPC_TIMEOUT_SECS") {
            self.rpc.timeout_secs = parse_u64("SHOPKEEP_RPC_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("SHOPKEEP_LOGGING_LEVEL").or_else(|| read_env("SHOPKEEP_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SHOPKEEP_LOGGING_FORMAT").or_else(|| read_env("SHOPKEEP_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(max_tool_rounds) = overrides.max_tool_rounds {
            self.agent.max_tool_rounds = max_tool_rounds;
        }
        if let Some(registry_ttl_secs) = overrides.registry_ttl_secs {
            self.tools.registry_ttl_secs = registry_ttl_secs;
        }
        if let Some(rpc_base_url) = overrides.rpc_base_url {
            self.rpc.base_url = Some(rpc_base_url);
        }
        if let Some(rpc_api_key) = overrides.rpc_api_key {
            self.rpc.api_key = Some(secret_value(rpc_api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_agent(&self.agent)?;
        validate_tools(&self.tools)?;
        validate_rpc(&self.rpc)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("shopkeep.toml"), PathBuf::from("config/shopkeep.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_tool_rounds == 0 || agent.max_tool_rounds > 32 {
        return Err(ConfigError::Validation(
            "agent.max_tool_rounds must be in range 1..=32".to_string(),
        ));
    }
    Ok(())
}

fn validate_tools(tools: &ToolsConfig) -> Result<(), ConfigError> {
    if tools.custom_prefix.trim().is_empty() {
        return Err(ConfigError::Validation(
            "tools.custom_prefix must not be empty; custom tools would collide with system tools"
                .to_string(),
        ));
    }

    if tools.default_max_execution_ms == 0 || tools.default_max_execution_ms > 600_000 {
        return Err(ConfigError::Validation(
            "tools.default_max_execution_ms must be in range 1..=600000".to_string(),
        ));
    }

    if tools.http_max_parallel == 0 || tools.http_max_parallel > 64 {
        return Err(ConfigError::Validation(
            "tools.http_max_parallel must be in range 1..=64".to_string(),
        ));
    }

    Ok(())
}

fn validate_rpc(rpc: &RpcConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &rpc.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "rpc.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    let has_blank_key =
        rpc.api_key.as_ref().map(|value| value.expose_secret().trim().is_empty()).unwrap_or(false);
    if has_blank_key {
        return Err(ConfigError::Validation("rpc.api_key must not be blank when set".to_string()));
    }

    if rpc.timeout_secs == 0 || rpc.timeout_secs > 300 {
        return Err(ConfigError::Validation("rpc.timeout_secs must be in range 1..=300".to_string()));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    agent: Option<AgentPatch>,
    tools: Option<ToolsPatch>,
    rpc: Option<RpcPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_tool_rounds: Option<u32>,
    system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    registry_ttl_secs: Option<u64>,
    custom_prefix: Option<String>,
    default_max_execution_ms: Option<u64>,
    http_max_parallel: Option<usize>,
    http_item_delay_ms: Option<u64>,
    secret_env_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RpcPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
