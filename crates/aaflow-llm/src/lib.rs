pub mod openai;
pub mod retry;
pub mod streaming;

use std::sync::Arc;

use aaflow_core::config::ModelConfig;
use aaflow_core::traits::LlmClient;

pub use openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client for the configured model.
///
/// Every provider is reached through the OpenAI-compatible chat completions
/// API. A `[model.retry]` section wraps the client in a [`RetryingClient`].
pub fn create_client(config: &ModelConfig) -> Arc<dyn LlmClient> {
    let client = OpenAiClient::new();
    match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(Box::new(client), retry.clone())),
        None => Arc::new(client),
    }
}
