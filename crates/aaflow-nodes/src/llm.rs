use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tracing::{debug, warn};

use aaflow_core::config::ModelConfig;
use aaflow_core::error::NodeError;
use aaflow_core::traits::{LlmClient, Node};
use aaflow_core::types::{ChatMessage, Context, NodeResult, Role, StreamDelta, UpdateSink};

use crate::panic_error;

type PromptFn = Box<dyn Fn(&Context) -> String + Send + Sync>;

/// Streams a chat completion over the conversation history.
///
/// The rendered prompt is appended as a user message, every generated token is
/// forwarded to the update sink, and the full reply is appended as an
/// assistant message and returned as output. A panicking prompt function
/// fails the node without touching the history.
pub struct LlmNode {
    id: String,
    client: Arc<dyn LlmClient>,
    model: ModelConfig,
    system_prompt: Option<String>,
    prompt: PromptFn,
}

impl LlmNode {
    pub fn new<F>(
        id: impl Into<String>,
        client: Arc<dyn LlmClient>,
        model: ModelConfig,
        prompt: F,
    ) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            client,
            model,
            system_prompt: None,
            prompt: Box::new(prompt),
        }
    }

    /// Seed an empty-of-system-messages history with a system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    async fn complete(&self, ctx: &mut Context, updates: &UpdateSink) -> Result<String, NodeError> {
        let prompt = (self.prompt)(ctx);
        if prompt.trim().is_empty() {
            return Err(NodeError::new("Prompt must be a non-empty string"));
        }

        if let Some(system) = &self.system_prompt {
            let has_system = ctx
                .conversation_history
                .iter()
                .any(|m| m.role == Role::System);
            if !has_system {
                ctx.conversation_history.insert(0, ChatMessage::system(system.clone()));
            }
        }
        ctx.push_message(ChatMessage::user(prompt));

        debug!(
            node_id = %self.id,
            model = %self.model.model_id,
            history = ctx.conversation_history.len(),
            "Starting completion"
        );

        let mut stream = self
            .client
            .chat_stream(&self.model, ctx.conversation_history.clone())
            .await?;

        let mut content = String::new();
        while let Some(delta) = stream.next().await {
            match delta {
                Ok(StreamDelta::Text(token)) => {
                    content.push_str(&token);
                    updates.chunk(token);
                }
                Ok(StreamDelta::Stop) => break,
                Err(e) => {
                    warn!(node_id = %self.id, error = %e, "Completion stream failed");
                    return Err(e.into());
                }
            }
        }

        ctx.push_message(ChatMessage::assistant(content.clone()));
        Ok(content)
    }
}

impl Node for LlmNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "llm"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut Context,
        updates: &'a UpdateSink,
    ) -> BoxFuture<'a, NodeResult> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(self.complete(ctx, updates))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_error(payload)));
            match outcome {
                Ok(content) => NodeResult::success(content),
                Err(e) => NodeResult::error(e),
            }
        })
    }
}
