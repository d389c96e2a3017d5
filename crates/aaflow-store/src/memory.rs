use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use aaflow_core::error::Result;
use aaflow_core::traits::ContextStore;
use aaflow_core::types::Context;

/// Process-local store. Contents are lost when the process exits.
///
/// Contexts are cloned in and out, so a caller mutating its context after a
/// save does not change what was stored.
#[derive(Default)]
pub struct InMemoryContextStore {
    contexts: RwLock<HashMap<String, Context>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }

    pub async fn remove(&self, id: &str) -> Option<Context> {
        self.contexts.write().await.remove(id)
    }
}

impl ContextStore for InMemoryContextStore {
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Context>>> {
        Box::pin(async move { Ok(self.contexts.read().await.get(id).cloned()) })
    }

    fn save<'a>(&'a self, id: &'a str, ctx: &'a Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.contexts.write().await.insert(id.to_string(), ctx.clone());
            Ok(())
        })
    }
}
