use futures::future::BoxFuture;

use aaflow_core::error::NodeError;
use aaflow_core::traits::Node;
use aaflow_core::types::{Context, NodeResult, UpdateSink};

use crate::panic_error;

type ConditionFn = Box<dyn Fn(&Context) -> Result<String, NodeError> + Send + Sync>;

/// Picks a branch. The chosen label is both the output and the action.
pub struct DecisionNode {
    id: String,
    condition: ConditionFn,
}

impl DecisionNode {
    pub fn new<F>(id: impl Into<String>, condition: F) -> Self
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        Self::try_new(id, move |ctx| Ok(condition(ctx)))
    }

    /// Create a decision node whose condition can fail.
    pub fn try_new<F>(id: impl Into<String>, condition: F) -> Self
    where
        F: Fn(&Context) -> Result<String, NodeError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            condition: Box::new(condition),
        }
    }
}

impl Node for DecisionNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "decision"
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut Context,
        _updates: &'a UpdateSink,
    ) -> BoxFuture<'a, NodeResult> {
        let ctx: &Context = ctx;
        let decided = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.condition)(ctx)))
            .unwrap_or_else(|payload| Err(panic_error(payload)));

        let result = match decided {
            Ok(action) => NodeResult::success_with_action(action.clone(), action),
            Err(e) => NodeResult::error(e),
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn role_check() -> DecisionNode {
        DecisionNode::new("check", |ctx| {
            if ctx.get_str("role") == Some("admin") {
                "admin".to_string()
            } else {
                "user".to_string()
            }
        })
    }

    #[tokio::test]
    async fn test_chooses_path_from_context() {
        let mut ctx = Context::new();
        ctx.set("role", json!("admin"));
        let result = role_check().execute(&mut ctx, &UpdateSink::none()).await;
        assert_eq!(result.output(), Some(&json!("admin")));
        assert_eq!(result.action(), "admin");

        ctx.set("role", json!("guest"));
        let result = role_check().execute(&mut ctx, &UpdateSink::none()).await;
        assert_eq!(result.action(), "user");
    }

    #[tokio::test]
    async fn test_failing_condition() {
        let node = DecisionNode::try_new("broken", |_ctx| Err(NodeError::new("bad decision")));
        let result = node.execute(&mut Context::new(), &UpdateSink::none()).await;
        assert_eq!(result.error_message(), Some("bad decision"));
    }
}
