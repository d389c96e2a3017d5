//! Declarative flows loaded from TOML or JSON files.
//!
//! A definition names its nodes by type, wires them with transitions and may
//! carry a starting context. Strings may reference context data with
//! `{{key}}` placeholders, resolved each time the node runs.

pub mod rule;
pub mod template;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use aaflow_core::config::{expand_env_vars, ModelConfig};
use aaflow_core::error::{AaflowError, Result};
use aaflow_core::traits::{LlmClient, Node};
use aaflow_core::types::{ChatMessage, Context, NodeResult, Transition, UpdateSink, DEFAULT_ACTION};
use aaflow_nodes::{ActionNode, BatchNode, DecisionNode, HttpNode, LlmNode};

use crate::flow::Flow;
use rule::Condition;
use template::{render, render_text};

#[derive(Debug, Clone, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    pub start: String,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,
    #[serde(default)]
    pub context: Option<ContextDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    #[serde(flatten)]
    pub spec: NodeSpec,
}

/// Node variants available to declarative flows, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeSpec {
    /// HTTP request. `output_key` stores the response body in context data.
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        body: Option<Value>,
        #[serde(default)]
        output_key: Option<String>,
    },
    /// Streaming chat completion over the conversation history.
    Llm {
        prompt: String,
        #[serde(default)]
        system: Option<String>,
        #[serde(default)]
        output_key: Option<String>,
    },
    /// Write rendered values into context data.
    Set {
        #[serde(default)]
        values: BTreeMap<String, Value>,
        #[serde(default)]
        output: Option<Value>,
    },
    /// First matching rule picks the action, `otherwise` when none match.
    Decision {
        #[serde(default)]
        rules: Vec<RuleDefinition>,
        #[serde(default = "default_action")]
        otherwise: String,
    },
    /// Render `template` once per element of `context.data[items_key]`.
    Map {
        items_key: String,
        template: Value,
        #[serde(default)]
        output_key: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDefinition {
    pub when: String,
    pub action: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionDefinition {
    pub from: String,
    #[serde(default = "default_action")]
    pub action: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextDefinition {
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_action() -> String {
    DEFAULT_ACTION.to_string()
}

/// Shared resources handed to nodes built from a definition.
#[derive(Clone, Default)]
pub struct BuildEnv {
    pub llm: Option<Arc<dyn LlmClient>>,
    pub model: ModelConfig,
    pub http: reqwest::Client,
}

impl BuildEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_llm(mut self, client: Arc<dyn LlmClient>, model: ModelConfig) -> Self {
        self.llm = Some(client);
        self.model = model;
        self
    }

    pub fn with_http(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }
}

impl FlowDefinition {
    /// Load a definition, choosing the format from the file extension.
    ///
    /// `.json` files are parsed as JSON, anything else as TOML. `${ENV_VAR}`
    /// references are expanded before parsing.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        };
        parsed.map_err(|e| match e {
            AaflowError::FlowDefinition(msg) => {
                AaflowError::FlowDefinition(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(&expand_env_vars(content))
            .map_err(|e| AaflowError::FlowDefinition(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(&expand_env_vars(content))
            .map_err(|e| AaflowError::FlowDefinition(e.to_string()))
    }

    /// The context declared alongside the flow, or an empty one.
    pub fn initial_context(&self) -> Context {
        let declared = self.context.clone().unwrap_or_default();
        let mut ctx = Context::from_data(declared.data);
        ctx.conversation_history = declared.history;
        ctx
    }

    /// Build a runnable flow.
    ///
    /// Node specs are checked here: duplicate ids, unknown HTTP methods,
    /// unparseable decision rules and LLM nodes without a client are errors.
    /// Transitions are not checked against the node set; a dangling one
    /// surfaces when the walk reaches it.
    pub fn build(&self, env: &BuildEnv) -> Result<Flow> {
        let mut seen = HashSet::new();
        let mut flow = Flow::new(self.id.clone());

        for def in &self.nodes {
            if !seen.insert(def.id.as_str()) {
                return Err(AaflowError::FlowDefinition(format!(
                    "duplicate node id '{}'",
                    def.id
                )));
            }
            flow = flow.add_shared_node(build_node(def, env)?);
        }

        for t in &self.transitions {
            flow = flow.add_transition(t.from.clone(), Transition::new(t.action.clone(), t.to.clone()));
        }

        debug!(
            flow_id = %self.id,
            nodes = self.nodes.len(),
            transitions = self.transitions.len(),
            "Built flow from definition"
        );

        Ok(flow.set_start_node(self.start.clone()))
    }
}

fn build_node(def: &NodeDefinition, env: &BuildEnv) -> Result<Arc<dyn Node>> {
    let id = def.id.clone();

    let (node, output_key): (Arc<dyn Node>, Option<&String>) = match &def.spec {
        NodeSpec::Http {
            url,
            method,
            headers,
            body,
            output_key,
        } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
                AaflowError::FlowDefinition(format!("node '{}': invalid HTTP method '{}'", id, method))
            })?;
            let url = url.clone();
            let headers = headers.clone();
            let mut node = HttpNode::new(id, url.clone())
                .method(method)
                .url_fn(move |ctx| render_text(&url, ctx))
                .headers_fn(move |ctx| {
                    headers
                        .iter()
                        .map(|(k, v)| (k.clone(), render_text(v, ctx)))
                        .collect()
                })
                .with_client(env.http.clone());
            if let Some(body) = body.clone() {
                node = node.body_fn(move |ctx| render(&body, ctx, None));
            }
            (Arc::new(node), output_key.as_ref())
        }

        NodeSpec::Llm {
            prompt,
            system,
            output_key,
        } => {
            let client = env.llm.clone().ok_or_else(|| {
                AaflowError::FlowDefinition(format!("node '{}' needs an LLM client", id))
            })?;
            let prompt = prompt.clone();
            let mut node = LlmNode::new(id, client, env.model.clone(), move |ctx| {
                render_text(&prompt, ctx)
            });
            if let Some(system) = system {
                node = node.with_system_prompt(system.clone());
            }
            (Arc::new(node), output_key.as_ref())
        }

        NodeSpec::Set { values, output } => {
            let values = values.clone();
            let output = output.clone();
            let node = ActionNode::from_fn(id, move |ctx| {
                let rendered: serde_json::Map<String, Value> = values
                    .iter()
                    .map(|(k, v)| (k.clone(), render(v, ctx, None)))
                    .collect();
                let result = match &output {
                    Some(template) => render(template, ctx, None),
                    None => Value::Object(rendered.clone()),
                };
                for (k, v) in rendered {
                    ctx.set(k, v);
                }
                Ok(result)
            });
            (Arc::new(node), None)
        }

        NodeSpec::Decision { rules, otherwise } => {
            let rules = rules
                .iter()
                .map(|r| {
                    Condition::parse(&r.when)
                        .map(|c| (c, r.action.clone()))
                        .ok_or_else(|| {
                            AaflowError::FlowDefinition(format!(
                                "node '{}': cannot parse rule '{}'",
                                id, r.when
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let otherwise = otherwise.clone();
            let node = DecisionNode::new(id, move |ctx| {
                rules
                    .iter()
                    .find(|(condition, _)| condition.matches(ctx))
                    .map(|(_, action)| action.clone())
                    .unwrap_or_else(|| otherwise.clone())
            });
            (Arc::new(node), None)
        }

        NodeSpec::Map {
            items_key,
            template,
            output_key,
        } => {
            let template = template.clone();
            let node = BatchNode::new(id, items_key.clone(), move |item, ctx| {
                let rendered = render(&template, ctx, Some(&item));
                Box::pin(async move { Ok(rendered) })
            });
            (Arc::new(node), output_key.as_ref())
        }
    };

    Ok(match output_key {
        Some(key) => Arc::new(StoreOutput {
            inner: node,
            key: key.clone(),
        }),
        None => node,
    })
}

/// Copies a successful node's output into `context.data[key]`.
struct StoreOutput {
    inner: Arc<dyn Node>,
    key: String,
}

impl Node for StoreOutput {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a mut Context,
        updates: &'a UpdateSink,
    ) -> BoxFuture<'a, NodeResult> {
        Box::pin(async move {
            let result = self.inner.execute(ctx, updates).await;
            if let Some(output) = result.output() {
                ctx.set(self.key.clone(), output.clone());
            }
            result
        })
    }
}
