//! The gateway's configuration value type (spec.md §6's enumerated fields).
//!
//! Loading configuration from a file is out of scope (spec.md §1 names
//! "configuration file loading" as an external collaborator this
//! specification does not redesign). What is in scope is the shape of the
//! configuration every component takes as a constructor argument, plus a
//! minimal `from_env` convenience constructor in the style of
//! `deadpool_postgres::Config` (environment-variable overrides of a
//! `Default` baseline, no parser, no file-watcher).

use serde::Deserialize;
use std::time::Duration;

/// Authentication methods, tried in the configured order (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Trust,
    Scram,
    Oauth,
    Vault,
    Kerberos,
}

/// Which [`crate`] `executor` implementation backs this gateway process
/// (spec.md §4.3: a startup-time decision, never a runtime one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorVariant {
    InProcess,
    Pooled,
}

/// How client-supplied unquoted identifiers are folded before being sent to
/// IRIS (spec.md §4.4 stage 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierCasePolicy {
    Preserve,
    Upper,
    Lower,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub base_size: u32,
    pub overflow_size: u32,
    pub acquire_timeout: Duration,
    pub recycle_age: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            base_size: 8,
            overflow_size: 8,
            acquire_timeout: Duration::from_secs(5),
            recycle_age: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen_addr: String,
    pub listen_port: u16,
    pub tls: Option<TlsConfig>,
    pub auth_chain: Vec<AuthMethod>,
    pub executor_variant: ExecutorVariant,
    pub pool: PoolConfig,
    pub translation_cache_size: usize,
    pub translation_cache_ttl: Duration,
    pub statement_timeout: Option<Duration>,
    pub identifier_case_policy: IdentifierCasePolicy,
    pub copy_batch_size: usize,
    pub message_size_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 5432,
            tls: None,
            auth_chain: vec![AuthMethod::Scram],
            executor_variant: ExecutorVariant::Pooled,
            pool: PoolConfig::default(),
            translation_cache_size: 1024,
            translation_cache_ttl: Duration::from_secs(10 * 60),
            statement_timeout: None,
            identifier_case_policy: IdentifierCasePolicy::Upper,
            copy_batch_size: 100,
            message_size_cap: 1 << 30,
        }
    }
}

impl Config {
    /// Overrides a [`Default`] baseline with a handful of `PGWIRE_*`
    /// environment variables. Anything unset keeps its default.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(addr) = std::env::var("PGWIRE_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(port) = std::env::var("PGWIRE_LISTEN_PORT") {
            if let Ok(port) = port.parse() {
                config.listen_port = port;
            }
        }
        if let Ok(variant) = std::env::var("PGWIRE_EXECUTOR") {
            config.executor_variant = match variant.as_str() {
                "in-process" => ExecutorVariant::InProcess,
                _ => ExecutorVariant::Pooled,
            };
        }
        if let Ok(policy) = std::env::var("PGWIRE_IDENTIFIER_CASE") {
            config.identifier_case_policy = match policy.as_str() {
                "preserve" => IdentifierCasePolicy::Preserve,
                "lower" => IdentifierCasePolicy::Lower,
                _ => IdentifierCasePolicy::Upper,
            };
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_executor_is_pooled() {
        assert_eq!(Config::default().executor_variant, ExecutorVariant::Pooled);
    }
}
