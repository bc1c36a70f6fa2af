//! `kerberos`: spec.md §4.7 asks only for "GSSAPI negotiation accepted,
//! principal mapped to an IRIS username by stripping realm and instance"
//! — not a full GSSAPI implementation, which needs a system krb5 library
//! this workspace has no business vendoring. [`KerberosProvider`]
//! documents the mapping rule and the one real step (principal parsing)
//! but stubs the handshake itself; wiring it to a real `libgssapi`
//! binding is future work, not something fakeable here.

use async_trait::async_trait;
use common::error::{GatewayError, Result};

use crate::{AuthOutcome, AuthTransport, CredentialProvider};

pub struct KerberosProvider;

/// Strips the `/instance` and `@REALM` parts of a Kerberos principal,
/// per spec.md §4.7's "mapped to an IRIS username by stripping realm and
/// instance" — `alice/admin@EXAMPLE.COM` maps to `alice`.
fn principal_to_username(principal: &str) -> &str {
    let without_realm = principal.split('@').next().unwrap_or(principal);
    without_realm.split('/').next().unwrap_or(without_realm)
}

#[async_trait]
impl CredentialProvider for KerberosProvider {
    fn name(&self) -> &'static str {
        "kerberos"
    }

    async fn authenticate(&self, _session_user: &str, _transport: &mut dyn AuthTransport) -> Result<AuthOutcome> {
        // TODO: negotiate GSSAPI via a system krb5 binding and recover the
        // authenticated principal from the security context instead of
        // refusing outright.
        Err(GatewayError::authentication_failed("GSSAPI/Kerberos negotiation is not implemented"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_mapping_strips_instance_and_realm() {
        assert_eq!(principal_to_username("alice/admin@EXAMPLE.COM"), "alice");
        assert_eq!(principal_to_username("bob@EXAMPLE.COM"), "bob");
        assert_eq!(principal_to_username("carol"), "carol");
    }

    #[tokio::test]
    async fn authenticate_is_a_documented_stub() {
        let mut transport = crate::tests::ScriptedTransport { responses: Default::default(), sent: Vec::new() };
        assert!(KerberosProvider.authenticate("alice", &mut transport).await.is_err());
    }
}
