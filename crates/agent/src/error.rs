use shopkeep_db::repositories::RepositoryError;
use thiserror::Error;

/// Failure of a single tool call. Converted into a `ToolResult` at the dispatcher
/// boundary; callers of `ToolDispatcher::execute` never see it as an `Err`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    Validation(String),
    #[error("unknown tool `{name}`; available tools: {}", .available.join(", "))]
    UnknownTool { name: String, available: Vec<String> },
    #[error("unknown action `{action}` for `{tool}`; expected one of: {}", .allowed.join(", "))]
    UnknownAction { tool: String, action: String, allowed: Vec<String> },
    #[error("{0}")]
    Downstream(String),
    #[error("tool timed out after {0} ms")]
    Timeout(u64),
    #[error("tool is misconfigured: {0}")]
    Configuration(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::UnknownTool { .. } => "unknown_tool",
            Self::UnknownAction { .. } => "unknown_action",
            Self::Downstream(_) => "downstream",
            Self::Timeout(_) => "timeout",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<RepositoryError> for ToolError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(what) => Self::Downstream(format!("{what} was not found")),
            RepositoryError::Conflict(message) => Self::Downstream(message),
            other => Self::Downstream(other.to_string()),
        }
    }
}
