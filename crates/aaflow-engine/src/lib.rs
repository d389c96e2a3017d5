//! Flow execution engine.
//!
//! A [`Flow`] is a graph of nodes whose edges are keyed by the action label a
//! node returns. A [`Runner`] walks flows with whole-flow retry, optional
//! context persistence through a `ContextStore`, and streaming updates.

pub mod definition;
pub mod flow;
pub mod plugin;
pub mod runner;

pub use definition::{BuildEnv, FlowDefinition};
pub use flow::{Flow, FlowDescription};
pub use plugin::Plugin;
pub use runner::Runner;
