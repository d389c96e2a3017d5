use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use aaflow_core::error::NodeError;
use aaflow_core::traits::Node;
use aaflow_core::types::{Context, NodeResult, UpdateSink};

use crate::panic_error;

type ActionFn =
    Box<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Value, NodeError>> + Send + Sync>;

/// Runs an async function of the context and reports its return value.
pub struct ActionNode {
    id: String,
    action: ActionFn,
}

impl ActionNode {
    /// Create an action node from an async closure.
    ///
    /// ```ignore
    /// ActionNode::new("greet", |ctx| Box::pin(async move {
    ///     ctx.set("greeted", json!(true));
    ///     Ok(json!("hello"))
    /// }));
    /// ```
    pub fn new<F>(id: impl Into<String>, action: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Value, NodeError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            action: Box::new(action),
        }
    }

    /// Create an action node from a synchronous closure.
    pub fn from_fn<F>(id: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut Context) -> Result<Value, NodeError> + Send + Sync + 'static,
    {
        Self::new(id, move |ctx| {
            let result = action(ctx);
            Box::pin(async move { result })
        })
    }
}

impl Node for ActionNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "action"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut Context,
        _updates: &'a UpdateSink,
    ) -> BoxFuture<'a, NodeResult> {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(async { (self.action)(ctx).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_error(payload)));

            match outcome {
                Ok(output) => NodeResult::success(output),
                Err(e) => {
                    debug!(node_id = %self.id, error = %e, "Action failed");
                    NodeResult::error(e)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_returns_output() {
        let node = ActionNode::new("log", |_ctx| Box::pin(async { Ok(json!("ok")) }));
        let mut ctx = Context::new();
        let result = node.execute(&mut ctx, &UpdateSink::none()).await;
        assert_eq!(result, NodeResult::success("ok"));
        assert_eq!(node.id(), "log");
        assert_eq!(node.kind(), "action");
    }

    #[tokio::test]
    async fn test_mutates_context() {
        let node = ActionNode::new("inc", |ctx| {
            Box::pin(async move {
                let n = ctx.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
                ctx.set("n", json!(n + 1));
                Ok(json!(n + 1))
            })
        });
        let mut ctx = Context::new();
        node.execute(&mut ctx, &UpdateSink::none()).await;
        node.execute(&mut ctx, &UpdateSink::none()).await;
        assert_eq!(ctx.get("n"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_error_is_captured() {
        let node = ActionNode::new("fail-node", |_ctx| {
            Box::pin(async { Err(NodeError::new("boom")) })
        });
        let result = node.execute(&mut Context::new(), &UpdateSink::none()).await;
        assert_eq!(result.error_message(), Some("boom"));
    }

    #[tokio::test]
    async fn test_plain_string_failure_is_normalized() {
        let node = ActionNode::from_fn("throw-string", |_ctx| Err("some error".into()));
        let result = node.execute(&mut Context::new(), &UpdateSink::none()).await;
        assert_eq!(result, NodeResult::error(NodeError::new("some error")));
    }

    #[tokio::test]
    async fn test_panic_becomes_error_result() {
        let node = ActionNode::from_fn("panics", |_ctx| panic!("exploded"));
        let result = node.execute(&mut Context::new(), &UpdateSink::none()).await;
        assert_eq!(result.error_message(), Some("exploded"));
    }
}
