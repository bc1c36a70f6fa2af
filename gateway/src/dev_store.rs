//! A minimal in-memory [`auth::VerifierStore`] used when this binary wires
//! up a `scram` entry in the authentication chain (spec.md §4.7).
//!
//! The real credential backend (an IRIS user catalog, a secret vault) is
//! named in spec.md §1 as an external collaborator this specification
//! does not redesign; this store exists so the gateway is runnable at all
//! without one, seeded from a single environment variable rather than a
//! real provisioning path. Production deployments replace this with a
//! [`auth::VerifierStore`] backed by whatever actually holds credentials.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use auth::{Verifier, VerifierStore};
use common::error::{GatewayError, Result};

pub struct DevVerifierStore {
    verifiers: RwLock<HashMap<String, Verifier>>,
}

impl DevVerifierStore {
    /// Seeds a single user from `PGWIRE_DEV_USER`/`PGWIRE_DEV_PASSWORD`
    /// (defaulting to `postgres`/`postgres`) so `scram` auth has someone
    /// to authenticate against out of the box.
    pub fn from_env() -> Self {
        let user = std::env::var("PGWIRE_DEV_USER").unwrap_or_else(|_| "postgres".to_string());
        let password = std::env::var("PGWIRE_DEV_PASSWORD").unwrap_or_else(|_| "postgres".to_string());

        let mut salt = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
        let verifier = Verifier::derive(&password, &salt, auth::scram::MIN_ITERATIONS);

        let mut verifiers = HashMap::new();
        verifiers.insert(user, verifier);
        DevVerifierStore { verifiers: RwLock::new(verifiers) }
    }
}

#[async_trait]
impl VerifierStore for DevVerifierStore {
    async fn verifier_for(&self, username: &str) -> Result<Verifier> {
        self.verifiers
            .read()
            .expect("dev verifier store lock poisoned")
            .get(username)
            .cloned()
            .ok_or_else(|| GatewayError::authentication_failed(format!("no stored credential for user \"{username}\"")))
    }
}
