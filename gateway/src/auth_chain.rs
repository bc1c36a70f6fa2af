//! Builds the ordered [`auth::CredentialProvider`] chain from
//! [`common::config::Config::auth_chain`] (spec.md §4.7: "Fallback order
//! is configurable").
//!
//! `oauth`, `vault`, and `kerberos` each need a real external collaborator
//! (an IdP, a secret store, a KDC) this workspace does not vendor — see
//! DESIGN.md. Configuring one of them without the corresponding binding
//! compiled in is a startup-time misconfiguration, logged and skipped
//! rather than a hard failure, matching spec.md §4.7's own "a provider
//! failure is logged and the next provider is tried" policy applied one
//! level earlier, at chain-construction time instead of per-connection.

use auth::CredentialProvider;
use common::config::AuthMethod;
use tracing::warn;

use crate::dev_store::DevVerifierStore;

pub fn build_chain(methods: &[AuthMethod]) -> Vec<Box<dyn CredentialProvider>> {
    let mut chain: Vec<Box<dyn CredentialProvider>> = Vec::new();
    for method in methods {
        match method {
            AuthMethod::Trust => chain.push(Box::new(auth::TrustProvider)),
            AuthMethod::Scram => {
                let store = DevVerifierStore::from_env();
                chain.push(Box::new(auth::ScramProvider::new(Box::new(store))));
            }
            AuthMethod::Oauth => {
                warn!("PGWIRE_AUTH_CHAIN names \"oauth\" but no TokenIntrospector is configured for this build; skipping");
            }
            AuthMethod::Vault => {
                warn!("PGWIRE_AUTH_CHAIN names \"vault\" but no SecretStore is configured for this build; skipping");
            }
            AuthMethod::Kerberos => {
                chain.push(Box::new(auth::KerberosProvider));
            }
        }
    }
    chain
}
