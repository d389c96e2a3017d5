use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// A single step of a flow.
///
/// Implementations report expected failures as `NodeResult::Error` and never
/// panic for them. Mutations made to the context are visible to every later
/// node and to the caller.
pub trait Node: Send + Sync + 'static {
    /// Identifier the node is registered under in a flow.
    fn id(&self) -> &str;

    /// Short name of the node variant, used when describing a flow.
    fn kind(&self) -> &'static str {
        "custom"
    }

    /// Execute the node against the given context.
    fn execute<'a>(
        &'a self,
        ctx: &'a mut Context,
        updates: &'a UpdateSink,
    ) -> BoxFuture<'a, NodeResult>;
}

/// Persistence backend for whole-flow context snapshots.
pub trait ContextStore: Send + Sync + 'static {
    /// Load the context saved under `id`. A miss is `Ok(None)`.
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Context>>>;

    /// Save a context under `id`, replacing whatever was there.
    fn save<'a>(&'a self, id: &'a str, ctx: &'a Context) -> BoxFuture<'a, Result<()>>;
}

/// Streaming chat completion client.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}
