use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::debug;

use aaflow_core::error::NodeError;
use aaflow_core::traits::Node;
use aaflow_core::types::{Context, NodeResult, UpdateSink};

use crate::panic_error;

pub type Headers = BTreeMap<String, String>;

/// A request part that is either fixed or computed from the context.
enum Source<T> {
    Static(T),
    Dynamic(Box<dyn Fn(&Context) -> T + Send + Sync>),
}

impl<T: Clone> Source<T> {
    fn resolve(&self, ctx: &Context) -> T {
        match self {
            Self::Static(value) => value.clone(),
            Self::Dynamic(f) => f(ctx),
        }
    }
}

/// Performs an HTTP request resolved against the context at execution time.
///
/// Any non-2xx status fails the node. A JSON response body is parsed,
/// anything else is returned as a string. A panic in a URL, header or body
/// function fails the node like any other error.
pub struct HttpNode {
    id: String,
    url: Source<String>,
    method: Method,
    headers: Source<Headers>,
    body: Option<Source<Value>>,
    client: Client,
}

impl HttpNode {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: Source::Static(url.into()),
            method: Method::GET,
            headers: Source::Static(Headers::new()),
            body: None,
            client: Client::new(),
        }
    }

    /// Compute the URL from the context.
    pub fn url_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        self.url = Source::Dynamic(Box::new(f));
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a static header. Replaces any header function set earlier.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut headers = match self.headers {
            Source::Static(headers) => headers,
            Source::Dynamic(_) => Headers::new(),
        };
        headers.insert(name.into(), value.into());
        self.headers = Source::Static(headers);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Source::Static(headers);
        self
    }

    pub fn headers_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> Headers + Send + Sync + 'static,
    {
        self.headers = Source::Dynamic(Box::new(f));
        self
    }

    /// Set a request body. Strings are sent as-is, any other value as JSON.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(Source::Static(body));
        self
    }

    pub fn body_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context) -> Value + Send + Sync + 'static,
    {
        self.body = Some(Source::Dynamic(Box::new(f)));
        self
    }

    /// Use a specific HTTP client (timeouts, proxies, shared pool).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    async fn send(&self, url: String, headers: Headers, body: Option<Value>) -> Result<Value, NodeError> {
        let has_content_type = headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));

        let mut req = self.client.request(self.method.clone(), &url);
        for (name, value) in &headers {
            req = req.header(name.as_str(), value.as_str());
        }
        match body {
            None => {}
            Some(Value::String(raw)) => req = req.body(raw),
            Some(json) => {
                if !has_content_type {
                    req = req.header(CONTENT_TYPE, "application/json");
                }
                req = req.body(json.to_string());
            }
        }

        debug!(node_id = %self.id, method = %self.method, url = %url, "Sending HTTP request");

        let resp = req.send().await.map_err(NodeError::from_display)?;
        let status = resp.status();
        let text = resp.text().await.map_err(NodeError::from_display)?;

        if !status.is_success() {
            return Err(NodeError::new(format!(
                "{} {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                text
            )));
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

impl Node for HttpNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "http"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut Context,
        _updates: &'a UpdateSink,
    ) -> BoxFuture<'a, NodeResult> {
        let ctx: &Context = ctx;
        Box::pin(async move {
            let outcome = AssertUnwindSafe(async {
                let url = self.url.resolve(ctx);
                let headers = self.headers.resolve(ctx);
                let body = self.body.as_ref().map(|b| b.resolve(ctx));
                self.send(url, headers, body).await
            })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_error(payload)));

            match outcome {
                Ok(output) => NodeResult::success(output),
                Err(e) => {
                    debug!(node_id = %self.id, error = %e, "HTTP request failed");
                    NodeResult::error(e)
                }
            }
        })
    }
}
