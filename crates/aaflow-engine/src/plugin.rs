use aaflow_core::error::Result;

use crate::runner::Runner;

/// An extension that configures a runner when it is registered.
///
/// Setup may install a store, an update handler, or anything else the runner
/// exposes. A failing setup is logged and otherwise ignored.
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn setup(&self, runner: &mut Runner) -> Result<()>;
}
