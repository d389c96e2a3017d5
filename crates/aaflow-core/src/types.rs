use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeError;

/// Action label used when a node result carries no explicit action.
pub const DEFAULT_ACTION: &str = "default";

/// Output of a flow that halted because no transition matched.
pub const FLOW_COMPLETED: &str = "Flow completed";

/// Error message reported once a runner has exhausted its retries.
pub const MAX_RETRIES_REACHED: &str = "Max retries reached";

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A chat message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }
}

/// Mutable state threaded through one flow execution.
///
/// `data` is the scratch space nodes read from and write to. `metadata` is
/// kept for callers and stores; the engine itself never writes to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded with initial data.
    pub fn from_data(data: HashMap<String, Value>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Get a data value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a data value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Set a data value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Append a message to the conversation history.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.conversation_history.push(message);
    }
}

/// Outcome of executing a node, or of a whole flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeResult {
    Success {
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
    },
    Error {
        error: NodeError,
    },
}

impl NodeResult {
    pub fn success(output: impl Into<Value>) -> Self {
        Self::Success {
            output: output.into(),
            action: None,
        }
    }

    pub fn success_with_action(output: impl Into<Value>, action: impl Into<String>) -> Self {
        Self::Success {
            output: output.into(),
            action: Some(action.into()),
        }
    }

    pub fn error(error: impl Into<NodeError>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// The fixed marker a flow returns when its walk ends without error.
    pub fn flow_completed() -> Self {
        Self::success(FLOW_COMPLETED)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            Self::Success { output, .. } => Some(output),
            Self::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { error } => Some(error.message()),
            Self::Success { .. } => None,
        }
    }

    /// The action label used to select the next transition. A missing or
    /// empty label selects [`DEFAULT_ACTION`].
    pub fn action(&self) -> &str {
        match self {
            Self::Success {
                action: Some(action),
                ..
            } if !action.is_empty() => action,
            _ => DEFAULT_ACTION,
        }
    }
}

/// A directed edge from the owning node, keyed by action label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transition {
    pub action: String,
    pub to: String,
}

impl Transition {
    pub fn new(action: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            to: to.into(),
        }
    }

    /// Transition taken when a node reports no action.
    pub fn default_to(to: impl Into<String>) -> Self {
        Self::new(DEFAULT_ACTION, to)
    }
}

/// A streaming update emitted while a flow runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Update {
    Chunk { content: String },
}

impl Update {
    pub fn chunk(content: impl Into<String>) -> Self {
        Self::Chunk {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Chunk { content } => content,
        }
    }
}

pub type UpdateHandler = Arc<dyn Fn(Update) + Send + Sync>;

/// Execution-scoped channel for streaming updates.
///
/// Handed to every node alongside the context. An inactive sink drops
/// everything sent to it.
#[derive(Clone, Default)]
pub struct UpdateSink {
    handler: Option<UpdateHandler>,
}

impl UpdateSink {
    pub fn new(handler: UpdateHandler) -> Self {
        Self {
            handler: Some(handler),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_option(handler: Option<UpdateHandler>) -> Self {
        Self { handler }
    }

    pub fn is_active(&self) -> bool {
        self.handler.is_some()
    }

    pub fn emit(&self, update: Update) {
        if let Some(handler) = &self.handler {
            handler(update);
        }
    }

    pub fn chunk(&self, content: impl Into<String>) {
        if self.is_active() {
            self.emit(Update::chunk(content));
        }
    }
}

impl std::fmt::Debug for UpdateSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSink")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A streaming delta from a text generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// A chunk of generated text.
    Text(String),
    /// The response is complete.
    Stop,
}
