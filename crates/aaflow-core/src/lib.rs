pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{AaflowError, Result};
pub use event::MessageBus;
pub use traits::{ContextStore, LlmClient, Node};
pub use types::*;
