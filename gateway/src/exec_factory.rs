//! Builds the [`pgwire::ExecutorFactory`] this binary hands to every
//! session (spec.md §4.3: "selection between variants is a startup-time
//! decision").
//!
//! IRIS itself is named in spec.md §1 as an external collaborator this
//! specification does not redesign, and this workspace carries no IRIS
//! driver crate (there is none in the dependency pack to ground one on).
//! `InProcessExecutor`/`PooledExecutor` are fully implemented against the
//! [`executor::in_process::EmbeddedIris`]/[`executor::pooled::PooledIrisConn`]
//! boundaries a real driver would fill in; absent one, this factory hands
//! out [`executor::fake::FakeExecutor`] instances (the same test double
//! `gateway`'s own smoke test uses) so the binary is runnable end to end
//! today, and logs which variant the operator configured so switching in
//! a real driver later is a one-file change here, not a protocol change.

use async_trait::async_trait;
use common::config::ExecutorVariant;
use common::error::Result;
use executor::fake::FakeExecutor;
use executor::BackendExecutor;
use pgwire::ExecutorFactory;
use tracing::warn;

pub struct DemoExecutorFactory {
    variant: ExecutorVariant,
}

impl DemoExecutorFactory {
    pub fn new(variant: ExecutorVariant) -> Self {
        warn!(
            ?variant,
            "no IRIS driver crate is linked into this build; every session gets an independent \
             in-memory FakeExecutor regardless of the configured executor variant"
        );
        DemoExecutorFactory { variant }
    }
}

#[async_trait]
impl ExecutorFactory for DemoExecutorFactory {
    async fn new_executor(&self) -> Result<Box<dyn BackendExecutor>> {
        let _ = self.variant;
        Ok(Box::new(FakeExecutor::new()))
    }
}
