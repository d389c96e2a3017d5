use thiserror::Error;

#[derive(Debug, Error)]
pub enum AaflowError {
    // Structural flow errors
    #[error("Start node not defined")]
    StartNodeNotDefined,

    #[error("Node {0} not found")]
    NodeNotFound(String),

    #[error("Invalid flow definition: {0}")]
    FlowDefinition(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AaflowError>;

/// Failure of a single node execution.
///
/// Carried inside `NodeResult::Error`. Unlike [`AaflowError`] this never
/// aborts a flow walk by itself; the walk stops and reports it as a result.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[error("{message}")]
pub struct NodeError {
    pub message: String,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Normalize any displayable failure value into a `NodeError`.
    pub fn from_display(value: impl std::fmt::Display) -> Self {
        Self::new(value.to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for NodeError {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeError {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<AaflowError> for NodeError {
    fn from(e: AaflowError) -> Self {
        Self::from_display(e)
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::from_display(e)
    }
}
