use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use aaflow_core::config::RunnerConfig;
use aaflow_core::error::Result;
use aaflow_core::traits::ContextStore;
use aaflow_core::types::{Context, NodeResult, Update, UpdateHandler, UpdateSink, MAX_RETRIES_REACHED};

use crate::flow::Flow;
use crate::plugin::Plugin;

/// Executes flows with whole-flow retry, optional persistence and streaming.
///
/// A failed attempt re-runs the flow from its start node against the same
/// context, so side effects of earlier attempts stay in place.
pub struct Runner {
    max_retries: u32,
    retry_delay: Duration,
    store: Option<Arc<dyn ContextStore>>,
    update_handler: Option<UpdateHandler>,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl Runner {
    /// A runner with 3 retries spaced one second apart.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retries(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            store: None,
            update_handler: None,
            plugins: Vec::new(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::with_retries(config.max_retries, Duration::from_millis(config.retry_delay_ms))
    }

    pub fn with_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.set_store(store);
        self
    }

    pub fn on_update<F>(mut self, handler: F) -> Self
    where
        F: Fn(Update) + Send + Sync + 'static,
    {
        self.set_update_handler(Arc::new(handler));
        self
    }

    pub fn with_plugin(mut self, plugin: impl Plugin) -> Self {
        self.register_plugin(Box::new(plugin));
        self
    }

    pub fn set_store(&mut self, store: Arc<dyn ContextStore>) {
        self.store = Some(store);
    }

    pub fn set_update_handler(&mut self, handler: UpdateHandler) {
        self.update_handler = Some(handler);
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn plugins(&self) -> &[Box<dyn Plugin>] {
        &self.plugins
    }

    /// Register a plugin and let it configure this runner.
    ///
    /// The plugin is kept even if its setup fails or panics.
    pub fn register_plugin(&mut self, plugin: Box<dyn Plugin>) {
        let name = plugin.name().to_string();
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| plugin.setup(self)));
        match outcome {
            Ok(Ok(())) => info!(plugin = %name, "Plugin registered"),
            Ok(Err(e)) => warn!(plugin = %name, error = %e, "Plugin setup failed, ignoring"),
            Err(_) => warn!(plugin = %name, "Plugin setup panicked, ignoring"),
        }
        self.plugins.push(plugin);
    }

    pub fn register_plugins(&mut self, plugins: impl IntoIterator<Item = Box<dyn Plugin>>) {
        for plugin in plugins {
            self.register_plugin(plugin);
        }
    }

    /// Run a flow until it succeeds or the retries run out.
    ///
    /// With a store and a `context_id`, a saved context replaces `ctx` before
    /// the first attempt and the final context is saved afterwards, on
    /// success and on exhaustion alike. Exhaustion reports
    /// "Max retries reached" in place of the last node error.
    pub async fn run_flow(
        &self,
        flow: &Flow,
        ctx: &mut Context,
        context_id: Option<&str>,
    ) -> Result<NodeResult> {
        let persistence = self.store.as_deref().zip(context_id);

        if let Some((store, id)) = persistence {
            if let Some(saved) = store.load(id).await? {
                debug!(flow_id = %flow.id(), context_id = %id, "Restored saved context");
                *ctx = saved;
            }
        }

        let updates = UpdateSink::from_option(self.update_handler.clone());

        for attempt in 0..=self.max_retries {
            let result = flow.run_with_updates(ctx, &updates).await?;

            match &result {
                NodeResult::Success { output, .. } => {
                    updates.chunk(output_text(output));
                    save(persistence, ctx).await?;
                    debug!(flow_id = %flow.id(), attempt, "Flow succeeded");
                    return Ok(result);
                }
                NodeResult::Error { error } => {
                    warn!(
                        flow_id = %flow.id(),
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        "Flow attempt failed"
                    );
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        error!(flow_id = %flow.id(), max_retries = self.max_retries, "Retries exhausted");
        save(persistence, ctx).await?;
        Ok(NodeResult::error(MAX_RETRIES_REACHED))
    }

    /// Run several flows, each under its own id as context id.
    ///
    /// Each flow takes its context out of `contexts` by flow id, or starts
    /// from an empty one. In parallel mode every flow runs to completion
    /// before the first structural error, in flow order, is returned.
    pub async fn run_agent_flows(
        &self,
        flows: &[Flow],
        mut contexts: HashMap<String, Context>,
        parallel: bool,
    ) -> Result<HashMap<String, NodeResult>> {
        let jobs: Vec<(&Flow, Context)> = flows
            .iter()
            .map(|flow| (flow, contexts.remove(flow.id()).unwrap_or_default()))
            .collect();

        info!(flows = jobs.len(), parallel, "Running agent flows");

        let mut results = HashMap::with_capacity(jobs.len());

        if parallel {
            let outcomes = join_all(jobs.into_iter().map(|(flow, mut ctx)| async move {
                let outcome = self.run_flow(flow, &mut ctx, Some(flow.id())).await;
                (flow.id(), outcome)
            }))
            .await;

            for (id, outcome) in outcomes {
                results.insert(id.to_string(), outcome?);
            }
        } else {
            for (flow, mut ctx) in jobs {
                let result = self.run_flow(flow, &mut ctx, Some(flow.id())).await?;
                results.insert(flow.id().to_string(), result);
            }
        }

        Ok(results)
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("store", &self.store.is_some())
            .field("update_handler", &self.update_handler.is_some())
            .field("plugins", &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

async fn save(persistence: Option<(&dyn ContextStore, &str)>, ctx: &Context) -> Result<()> {
    if let Some((store, id)) = persistence {
        store.save(id, ctx).await?;
        debug!(context_id = %id, "Saved context");
    }
    Ok(())
}

fn output_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
