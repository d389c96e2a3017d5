use std::panic::AssertUnwindSafe;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use aaflow_core::error::NodeError;
use aaflow_core::traits::Node;
use aaflow_core::types::{Context, NodeResult, UpdateSink};

use crate::panic_error;

type ItemFn =
    Box<dyn for<'a> Fn(Value, &'a Context) -> BoxFuture<'a, Result<Value, NodeError>> + Send + Sync>;

/// Maps an async function over the array stored at `context.data[items_key]`.
///
/// All items run concurrently with no limit. Results keep the input order.
/// A missing source, or one holding `null`, `false`, `0` or `""`, yields an
/// empty array. Any other non-array value and the first item failure both
/// fail the whole node.
pub struct BatchNode {
    id: String,
    items_key: String,
    process: ItemFn,
}

impl BatchNode {
    pub fn new<F>(id: impl Into<String>, items_key: impl Into<String>, process: F) -> Self
    where
        F: for<'a> Fn(Value, &'a Context) -> BoxFuture<'a, Result<Value, NodeError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            items_key: items_key.into(),
            process: Box::new(process),
        }
    }

    pub fn items_key(&self) -> &str {
        &self.items_key
    }

    async fn run(&self, ctx: &Context) -> Result<Value, NodeError> {
        let items = match ctx.get(&self.items_key) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(value) if is_empty_source(value) => Vec::new(),
            Some(_) => {
                return Err(NodeError::new(format!(
                    "context.data.{} is not an array",
                    self.items_key
                )))
            }
        };

        debug!(node_id = %self.id, items = items.len(), "Dispatching batch");

        let results = try_join_all(items.into_iter().map(|item| (self.process)(item, ctx))).await?;
        Ok(Value::Array(results))
    }
}

fn is_empty_source(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

impl Node for BatchNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "batch"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut Context,
        _updates: &'a UpdateSink,
    ) -> BoxFuture<'a, NodeResult> {
        let ctx: &Context = ctx;
        Box::pin(async move {
            let outcome = AssertUnwindSafe(self.run(ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_error(payload)));

            match outcome {
                Ok(output) => NodeResult::success(output),
                Err(e) => NodeResult::error(e),
            }
        })
    }
}
