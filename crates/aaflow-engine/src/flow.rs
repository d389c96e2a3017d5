use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use aaflow_core::error::{AaflowError, Result};
use aaflow_core::traits::Node;
use aaflow_core::types::{Context, NodeResult, Transition, UpdateSink};

/// A graph of nodes connected by action-labelled transitions.
///
/// Built once with the fluent methods and then run any number of times.
/// Running never mutates the flow, only the context passed in.
pub struct Flow {
    id: String,
    nodes: HashMap<String, Arc<dyn Node>>,
    transitions: HashMap<String, HashMap<String, String>>,
    start_node: Option<String>,
}

/// Serializable summary of a flow's shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlowDescription {
    pub id: String,
    pub start: Option<String>,
    pub nodes: Vec<NodeDescription>,
    pub transitions: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeDescription {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Flow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: HashMap::new(),
            transitions: HashMap::new(),
            start_node: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a node under its own id, replacing any node with the same id.
    pub fn add_node(self, node: impl Node) -> Self {
        self.add_shared_node(Arc::new(node))
    }

    /// Add a node that may also be used by other flows.
    pub fn add_shared_node(mut self, node: Arc<dyn Node>) -> Self {
        self.nodes.insert(node.id().to_string(), node);
        self
    }

    pub fn set_start_node(mut self, node_id: impl Into<String>) -> Self {
        self.start_node = Some(node_id.into());
        self
    }

    /// Add a transition out of `from`. Re-adding an action overwrites it.
    pub fn add_transition(mut self, from: impl Into<String>, transition: Transition) -> Self {
        self.transitions
            .entry(from.into())
            .or_default()
            .insert(transition.action, transition.to);
        self
    }

    pub fn start_node(&self) -> Option<&str> {
        self.start_node.as_deref()
    }

    pub fn node(&self, node_id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(node_id)
    }

    /// Ids of every registered node, sorted.
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// The action table out of `from`, if it has any transitions.
    pub fn transitions_from(&self, from: &str) -> Option<&HashMap<String, String>> {
        self.transitions.get(from)
    }

    /// Destination of the transition out of `from` for `action`, if any.
    pub fn next_node(&self, from: &str, action: &str) -> Option<&str> {
        self.transitions
            .get(from)
            .and_then(|t| t.get(action))
            .map(String::as_str)
    }

    pub fn describe(&self) -> FlowDescription {
        let mut nodes: Vec<NodeDescription> = self
            .nodes
            .values()
            .map(|n| NodeDescription {
                id: n.id().to_string(),
                kind: n.kind().to_string(),
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let transitions = self
            .transitions
            .iter()
            .map(|(from, table)| {
                let table = table.iter().map(|(a, to)| (a.clone(), to.clone())).collect();
                (from.clone(), table)
            })
            .collect();

        FlowDescription {
            id: self.id.clone(),
            start: self.start_node.clone(),
            nodes,
            transitions,
        }
    }

    /// Walk the flow once from its start node.
    pub async fn run(&self, ctx: &mut Context) -> Result<NodeResult> {
        self.run_with_updates(ctx, &UpdateSink::none()).await
    }

    /// Walk the flow once, handing `updates` to every node.
    ///
    /// A node error ends the walk and is returned as-is. Reaching a node with
    /// no transition for its action ends the walk with the fixed
    /// "Flow completed" result, whatever that node produced. A missing start
    /// node or a transition to an unknown node is an `Err`.
    ///
    /// There is no cycle detection; a looping graph runs until a node fails
    /// or picks an action without a transition.
    pub async fn run_with_updates(
        &self,
        ctx: &mut Context,
        updates: &UpdateSink,
    ) -> Result<NodeResult> {
        let mut current = self
            .start_node
            .clone()
            .ok_or(AaflowError::StartNodeNotDefined)?;

        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| AaflowError::NodeNotFound(current.clone()))?;

            debug!(flow_id = %self.id, node_id = %current, "Executing node");
            let result = node.execute(ctx, updates).await;

            if let NodeResult::Error { error } = &result {
                debug!(flow_id = %self.id, node_id = %current, error = %error, "Node failed, halting walk");
                return Ok(result);
            }

            match self.next_node(&current, result.action()) {
                Some(next) => current = next.to_string(),
                None => {
                    debug!(flow_id = %self.id, node_id = %current, action = result.action(), "No transition, flow complete");
                    break;
                }
            }
        }

        Ok(NodeResult::flow_completed())
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("start_node", &self.start_node)
            .field("nodes", &self.nodes.len())
            .field("transitions", &self.transitions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aaflow_core::error::NodeError;
    use aaflow_core::types::FLOW_COMPLETED;
    use aaflow_nodes::{ActionNode, DecisionNode};
    use serde_json::json;

    fn recording(id: &'static str, output: &'static str) -> ActionNode {
        ActionNode::from_fn(id, move |ctx| {
            let mut visited = ctx.get("visited").cloned().unwrap_or(json!([]));
            if let Some(list) = visited.as_array_mut() {
                list.push(json!(id));
            }
            ctx.set("visited", visited);
            Ok(json!(output))
        })
    }

    #[tokio::test]
    async fn test_linear_flow() {
        let flow = Flow::new("test")
            .add_node(recording("n1", "step1"))
            .add_node(recording("n2", "done"))
            .set_start_node("n1")
            .add_transition("n1", Transition::default_to("n2"));

        let mut ctx = Context::new();
        let result = flow.run(&mut ctx).await.unwrap();
        assert_eq!(result, NodeResult::flow_completed());
        assert_eq!(ctx.get("visited"), Some(&json!(["n1", "n2"])));
    }

    #[tokio::test]
    async fn test_terminal_result_hides_node_output() {
        let flow = Flow::new("single")
            .add_node(recording("only", "real output"))
            .set_start_node("only");

        let result = flow.run(&mut Context::new()).await.unwrap();
        assert_eq!(result.output(), Some(&json!(FLOW_COMPLETED)));
    }

    #[tokio::test]
    async fn test_branching_on_action() {
        let flow = Flow::new("branch")
            .add_node(DecisionNode::new("check", |ctx| {
                ctx.get_str("role").unwrap_or("user").to_string()
            }))
            .add_node(recording("admin_panel", "admin"))
            .add_node(recording("user_home", "user"))
            .set_start_node("check")
            .add_transition("check", Transition::new("admin", "admin_panel"))
            .add_transition("check", Transition::new("user", "user_home"));

        let mut ctx = Context::new();
        ctx.set("role", json!("admin"));
        flow.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.get("visited"), Some(&json!(["admin_panel"])));
    }

    #[tokio::test]
    async fn test_unmatched_action_completes() {
        let flow = Flow::new("unmatched")
            .add_node(DecisionNode::new("check", |_| "elsewhere".into()))
            .add_node(recording("never", "x"))
            .set_start_node("check")
            .add_transition("check", Transition::default_to("never"));

        let mut ctx = Context::new();
        let result = flow.run(&mut ctx).await.unwrap();
        assert!(result.is_success());
        assert!(ctx.get("visited").is_none());
    }

    #[tokio::test]
    async fn test_error_halts_walk() {
        let flow = Flow::new("failing")
            .add_node(ActionNode::from_fn("boom", |_| Err(NodeError::new("kaput"))))
            .add_node(recording("after", "x"))
            .set_start_node("boom")
            .add_transition("boom", Transition::default_to("after"));

        let mut ctx = Context::new();
        let result = flow.run(&mut ctx).await.unwrap();
        assert_eq!(result, NodeResult::error("kaput"));
        assert!(ctx.get("visited").is_none());
    }

    #[tokio::test]
    async fn test_missing_start_node() {
        let flow = Flow::new("empty").add_node(recording("a", "x"));
        let err = flow.run(&mut Context::new()).await.unwrap_err();
        assert!(matches!(err, AaflowError::StartNodeNotDefined));
    }

    #[tokio::test]
    async fn test_transition_to_unknown_node() {
        let flow = Flow::new("dangling")
            .add_node(recording("a", "x"))
            .set_start_node("a")
            .add_transition("a", Transition::default_to("ghost"));

        let err = flow.run(&mut Context::new()).await.unwrap_err();
        assert!(matches!(&err, AaflowError::NodeNotFound(id) if id == "ghost"));
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_transition_last_write_wins() {
        let flow = Flow::new("overwrite")
            .add_node(recording("a", "x"))
            .add_node(recording("b", "x"))
            .add_node(recording("c", "x"))
            .set_start_node("a")
            .add_transition("a", Transition::default_to("b"))
            .add_transition("a", Transition::default_to("c"));

        let mut ctx = Context::new();
        flow.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.get("visited"), Some(&json!(["a", "c"])));
    }

    #[tokio::test]
    async fn test_loop_until_exit_action() {
        let counter = ActionNode::from_fn("count", |ctx| {
            let n = ctx.get("n").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
            ctx.set("n", json!(n));
            Ok(json!(n))
        });
        let flow = Flow::new("loop")
            .add_node(counter)
            .add_node(DecisionNode::new("more", |ctx| {
                if ctx.get("n").and_then(|v| v.as_i64()).unwrap_or(0) < 3 {
                    "again".into()
                } else {
                    "stop".into()
                }
            }))
            .set_start_node("count")
            .add_transition("count", Transition::default_to("more"))
            .add_transition("more", Transition::new("again", "count"));

        let mut ctx = Context::new();
        flow.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.get("n"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_flow_reusable_across_runs() {
        let flow = Flow::new("reuse")
            .add_node(recording("a", "x"))
            .set_start_node("a");
        let mut first = Context::new();
        let mut second = Context::new();
        flow.run(&mut first).await.unwrap();
        flow.run(&mut second).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_describe() {
        let flow = Flow::new("described")
            .add_node(recording("b", "x"))
            .add_node(DecisionNode::new("a", |_| "go".into()))
            .set_start_node("a")
            .add_transition("a", Transition::new("go", "b"));

        let desc = flow.describe();
        assert_eq!(desc.start.as_deref(), Some("a"));
        assert_eq!(
            serde_json::to_value(&desc.nodes).unwrap(),
            json!([{ "id": "a", "type": "decision" }, { "id": "b", "type": "action" }])
        );
        assert_eq!(desc.transitions["a"]["go"], "b");
    }
}
