//! The authentication bridge (spec.md §4.7): SCRAM-SHA-256 plus three
//! pluggable delegating providers behind one [`CredentialProvider`] trait,
//! and the `ParameterStatus` values emitted right after auth succeeds
//! (grounded in `sunng87-pgwire`'s `auth::DefaultServerParameterProvider`
//! from the pack — authentication-adjacent, since it fires at the same
//! point in the handshake).
//!
//! No teacher code exists for authentication (`ming535-floppy` has no
//! network listener at all); the SCRAM core is grounded instead in the
//! `sha2`/`hmac`/`pbkdf2` stack `Dicklesworthstone-sqlmodel_rust`'s
//! `sqlmodel-postgres` crate already depends on for the same purpose.

pub mod kerberos;
pub mod oauth;
pub mod params;
pub mod scram;
pub mod trust;
pub mod vault;

use async_trait::async_trait;
use common::error::{GatewayError, Result};

pub use kerberos::KerberosProvider;
pub use oauth::{OAuthProvider, TokenIntrospector};
pub use params::server_parameters;
pub use scram::{ScramProvider, Verifier, VerifierStore};
pub use trust::TrustProvider;
pub use vault::{SecretStore, VaultProvider};

/// The two ways a round trip with the client can go: the transport sends
/// a challenge (a SASL mechanism negotiation plus message, or a bare
/// cleartext-password request when `mechanism` is `None`) and receives
/// back whatever bytes the client answered with. Every provider in this
/// crate — SCRAM's multi-step exchange and the single-round-trip
/// password-as-token-carrier providers alike — is expressed against this
/// one abstraction so `CredentialProvider` has a single method.
#[async_trait]
pub trait AuthTransport: Send {
    /// Sends a challenge to the client. `mechanism` names the SASL
    /// mechanism on the first SCRAM message (`AuthenticationSASL`);
    /// subsequent SCRAM messages and cleartext-password requests pass
    /// `None` (`AuthenticationSASLContinue`/`AuthenticationCleartextPassword`
    /// respectively — the session state machine tracks which, this crate
    /// only needs the bytes).
    async fn send_challenge(&mut self, mechanism: Option<&str>, data: &[u8]) -> Result<()>;

    /// Blocks for the client's next response to a challenge.
    async fn receive_response(&mut self) -> Result<Vec<u8>>;
}

/// What a successful [`CredentialProvider::authenticate`] call produces:
/// the username IRIS should see, which may differ from what the client
/// presented (spec.md §4.7: OAuth maps to "the IRIS username from the
/// introspection response", Kerberos strips the realm and instance).
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub iris_username: String,
}

/// One entry in the configured authentication chain (spec.md §4.7:
/// "Fallback order is configurable ... A provider failure is logged and
/// the next provider is tried; only after all have failed is an auth
/// error sent").
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A short name used in logs (`"trust"`, `"scram"`, `"oauth"`,
    /// `"vault"`, `"kerberos"`).
    fn name(&self) -> &'static str;

    async fn authenticate(
        &self,
        session_user: &str,
        transport: &mut dyn AuthTransport,
    ) -> Result<AuthOutcome>;
}

/// Runs `session_user` through `chain` in order, trying the next provider
/// on failure and only surfacing an error once every provider has failed
/// (spec.md §4.7). Each provider's own failure is logged at the call
/// site, not here, since only the caller holds the connection's tracing
/// span.
pub async fn authenticate_with_chain(
    chain: &[Box<dyn CredentialProvider>],
    session_user: &str,
    transport: &mut dyn AuthTransport,
) -> Result<AuthOutcome> {
    let mut last_err = None;
    for provider in chain {
        match provider.authenticate(session_user, transport).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                tracing::warn!(provider = provider.name(), error = %e, "credential provider failed, trying next");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        GatewayError::authentication_failed("no authentication providers configured")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    pub(crate) struct ScriptedTransport {
        pub responses: VecDeque<Vec<u8>>,
        pub sent: Vec<(Option<String>, Vec<u8>)>,
    }

    #[async_trait]
    impl AuthTransport for ScriptedTransport {
        async fn send_challenge(&mut self, mechanism: Option<&str>, data: &[u8]) -> Result<()> {
            self.sent.push((mechanism.map(str::to_string), data.to_vec()));
            Ok(())
        }

        async fn receive_response(&mut self) -> Result<Vec<u8>> {
            self.responses.pop_front().ok_or_else(|| GatewayError::protocol_violation("no more scripted responses"))
        }
    }

    #[tokio::test]
    async fn chain_falls_through_to_next_provider_on_failure() {
        struct AlwaysFails;
        #[async_trait]
        impl CredentialProvider for AlwaysFails {
            fn name(&self) -> &'static str {
                "always-fails"
            }
            async fn authenticate(&self, _: &str, _: &mut dyn AuthTransport) -> Result<AuthOutcome> {
                Err(GatewayError::authentication_failed("nope"))
            }
        }

        let chain: Vec<Box<dyn CredentialProvider>> = vec![Box::new(AlwaysFails), Box::new(TrustProvider)];
        let mut transport = ScriptedTransport { responses: VecDeque::new(), sent: Vec::new() };
        let outcome = authenticate_with_chain(&chain, "alice", &mut transport).await.unwrap();
        assert_eq!(outcome.iris_username, "alice");
    }

    #[tokio::test]
    async fn chain_reports_last_error_when_everything_fails() {
        struct AlwaysFails;
        #[async_trait]
        impl CredentialProvider for AlwaysFails {
            fn name(&self) -> &'static str {
                "always-fails"
            }
            async fn authenticate(&self, _: &str, _: &mut dyn AuthTransport) -> Result<AuthOutcome> {
                Err(GatewayError::authentication_failed("nope"))
            }
        }
        let chain: Vec<Box<dyn CredentialProvider>> = vec![Box::new(AlwaysFails)];
        let mut transport = ScriptedTransport { responses: VecDeque::new(), sent: Vec::new() };
        assert!(authenticate_with_chain(&chain, "alice", &mut transport).await.is_err());
    }
}
