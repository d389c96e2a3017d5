use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use aaflow_core::config::ModelConfig;
use aaflow_core::error::{AaflowError, Result};
use aaflow_core::traits::LlmClient;
use aaflow_core::types::{ChatMessage, StreamDelta};

use crate::streaming::sse_events;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    /// Use an existing HTTP client (shared connection pool, custom timeouts).
    pub fn with_http(http: Client) -> Self {
        Self { http }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OaiMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct OaiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDeltaContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
}

/// Convert one SSE payload into zero or more deltas.
pub(crate) fn parse_chunk(data: &str) -> Vec<StreamDelta> {
    if data.trim() == "[DONE]" {
        return vec![StreamDelta::Stop];
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let mut deltas = Vec::new();
            if let Some(choice) = chunk.choices.into_iter().next() {
                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        deltas.push(StreamDelta::Text(text));
                    }
                }
                if choice.finish_reason.is_some() {
                    deltas.push(StreamDelta::Stop);
                }
            }
            deltas
        }
        Err(e) => {
            warn!(data = %data, error = %e, "Failed to parse chat completion chunk");
            vec![]
        }
    }
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();

        Box::pin(async move {
            let url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = ChatRequest {
                model: &config.model_id,
                messages: messages
                    .iter()
                    .map(|m| OaiMessage {
                        role: m.role.as_str(),
                        content: &m.content,
                    })
                    .collect(),
                max_tokens: config.max_tokens,
                temperature: (config.temperature > 0.0).then_some(config.temperature),
                stream: true,
            };

            let mut req = self.http.post(url).json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.bearer_auth(api_key);
            }

            debug!(model = %config.model_id, messages = messages.len(), "Sending chat completion request");

            let response = req
                .send()
                .await
                .map_err(|e| AaflowError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(AaflowError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let deltas = sse_events(Box::pin(response.bytes_stream()))
                .map(|event| {
                    let items: Vec<Result<StreamDelta>> = match event {
                        Ok(data) => parse_chunk(&data).into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(AaflowError::LlmStream(e.to_string()))],
                    };
                    stream::iter(items)
                })
                .flatten()
                // Nothing meaningful follows a stop marker.
                .take_while(|delta| futures::future::ready(!matches!(delta, Ok(StreamDelta::Stop))));

            Ok(Box::pin(deltas) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;

    #[test]
    fn test_parse_text_chunk() {
        let deltas = parse_chunk(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#);
        assert_eq!(deltas, vec![StreamDelta::Text("Hel".into())]);
    }

    #[test]
    fn test_parse_finish_and_done() {
        let deltas = parse_chunk(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert_eq!(deltas, vec![StreamDelta::Stop]);
        assert_eq!(parse_chunk("[DONE]"), vec![StreamDelta::Stop]);
    }

    #[test]
    fn test_parse_garbage_is_skipped() {
        assert!(parse_chunk("not json").is_empty());
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    #[tokio::test]
    async fn test_chat_stream_against_local_server() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let router = Router::new().route("/v1/chat/completions", post(move || async move { body }));
        let url = serve(router).await;

        let config = ModelConfig {
            base_url: Some(url),
            ..ModelConfig::default()
        };
        let client = OpenAiClient::new();
        let stream = client
            .chat_stream(&config, vec![ChatMessage::user("hi")])
            .await
            .unwrap();
        let text: Vec<StreamDelta> = stream.map(|d| d.unwrap()).collect().await;
        assert_eq!(
            text,
            vec![
                StreamDelta::Text("Hello".into()),
                StreamDelta::Text(" world".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_chat_stream_http_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let url = serve(router).await;

        let config = ModelConfig {
            base_url: Some(url),
            ..ModelConfig::default()
        };
        let err = match OpenAiClient::new()
            .chat_stream(&config, vec![ChatMessage::user("hi")])
            .await
        {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("429"));
    }
}
