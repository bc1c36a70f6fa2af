//! The `gateway` binary: wires the library crates in this workspace into
//! one running PostgreSQL wire-protocol gateway (spec.md §2). Thin by
//! design — everything it does is construct a [`pgwire::session_machine::GatewayContext`]
//! from [`common::config::Config`] and hand it to [`pgwire::server::run`].

mod auth_chain;
mod dev_store;
mod exec_factory;

use std::sync::Arc;

use common::config::Config;
use pgwire::cancel::CancelRegistry;
use pgwire::protocol::TranslatorShared;
use pgwire::session_machine::GatewayContext;
use tokio::net::TcpListener;
use tracing::info;
use translator::TranslationCache;

use exec_factory::DemoExecutorFactory;

#[tokio::main]
async fn main() -> common::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Arc::new(Config::from_env());
    info!(addr = config.listen_addr.as_str(), port = config.listen_port, "iris-pgwire gateway starting");

    let auth_chain = auth_chain::build_chain(&config.auth_chain);
    let translation_cache = TranslationCache::new(config.translation_cache_size, config.translation_cache_ttl);
    let translator = TranslatorShared::new(config.identifier_case_policy, translation_cache);
    let executor_factory = Arc::new(DemoExecutorFactory::new(config.executor_variant));

    let ctx = Arc::new(GatewayContext {
        config: config.clone(),
        cancel_registry: CancelRegistry::new(),
        translator,
        auth_chain,
        executor_factory,
    });

    let listener = TcpListener::bind((config.listen_addr.as_str(), config.listen_port)).await?;
    pgwire::server::run(ctx, listener, shutdown_signal()).await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received ctrl-c, shutting down");
}
