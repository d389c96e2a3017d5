//! Context store backends.
//!
//! Both stores keep one whole-context snapshot per id. Saving overwrites,
//! loading a missing id is `Ok(None)`.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryContextStore;
pub use sqlite::SqliteContextStore;

use std::sync::Arc;

use tracing::info;

use aaflow_core::config::{StoreConfig, StoreKind};
use aaflow_core::error::Result;
use aaflow_core::traits::ContextStore;

/// Open the store selected by the configuration.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ContextStore>> {
    match config.kind {
        StoreKind::Memory => {
            info!("Using in-memory context store");
            Ok(Arc::new(InMemoryContextStore::new()))
        }
        StoreKind::Sqlite => {
            let path = config.resolved_path();
            info!(path = %path.display(), "Opening SQLite context store");
            Ok(Arc::new(SqliteContextStore::open(&path)?))
        }
    }
}
