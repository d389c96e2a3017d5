//! Built-in node variants.
//!
//! Each node wraps one computation pattern and reports its outcome as a
//! `NodeResult`. None of them know anything about the flow they run in.

pub mod action;
pub mod batch;
pub mod decision;
pub mod http;
pub mod llm;

pub use action::ActionNode;
pub use batch::BatchNode;
pub use decision::DecisionNode;
pub use http::HttpNode;
pub use llm::LlmNode;

use std::any::Any;

use aaflow_core::error::NodeError;

/// Convert a caught panic payload into a node error.
pub(crate) fn panic_error(payload: Box<dyn Any + Send>) -> NodeError {
    if let Some(s) = payload.downcast_ref::<&str>() {
        NodeError::new(*s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        NodeError::new(s.clone())
    } else {
        NodeError::new("node panicked")
    }
}
