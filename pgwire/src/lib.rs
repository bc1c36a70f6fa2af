//! The PostgreSQL wire-protocol frontend (spec.md §4): frame codec,
//! startup/SSL-probe handling, authentication bridging, the translation-
//! aware query engine, the per-connection state machine, COPY, and the
//! TCP/TLS accept loop. Generalizes the teacher's `pgwire` crate, which
//! had the same module split (`codec`, `message`, `server`, `protocol`)
//! but every body left as `todo!()`.

pub mod auth_transport;
pub mod cancel;
pub mod codec;
pub mod copy_flow;
pub mod message;
pub mod protocol;
pub mod server;
pub mod session_machine;
pub mod startup;

use async_trait::async_trait;

/// Produces a fresh [`executor::BackendExecutor`] handle for one new
/// session (spec.md §4.3: in-process vs. pooled is a startup-time
/// decision made once, by whichever concrete type `gateway` builds this
/// from — the session machine only ever sees the trait).
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn new_executor(&self) -> common::error::Result<Box<dyn executor::BackendExecutor>>;
}
