//! `scram`: server-side SCRAM-SHA-256 (RFC 5802, RFC 7677), the default
//! mechanism spec.md §4.7 calls for. Grounded in the `sha2`/`hmac`/`pbkdf2`/
//! `rand`/`base64` stack `Dicklesworthstone-sqlmodel_rust`'s
//! `sqlmodel-postgres` crate pulls in for the same purpose — no teacher
//! code to generalize here, since `ming535-floppy` has no authentication
//! at all.

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use common::error::{ErrorKind, GatewayError, Result};

use crate::{AuthOutcome, AuthTransport, CredentialProvider};

const NONCE_BYTES: usize = 18;
pub const MIN_ITERATIONS: u32 = 4096;

/// A single user's stored SCRAM verifier: the salt and iteration count
/// used to derive it, plus `StoredKey`/`ServerKey` (RFC 5802 §3) computed
/// once at provisioning time rather than re-derived from a plaintext
/// password on every connection.
#[derive(Debug, Clone)]
pub struct Verifier {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub stored_key: [u8; 32],
    pub server_key: [u8; 32],
}

impl Verifier {
    /// Derives a verifier from a plaintext password, for provisioning or
    /// for tests. `iterations` is clamped up to [`MIN_ITERATIONS`].
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Self {
        let iterations = iterations.max(MIN_ITERATIONS);
        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted_password);

        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        let server_key = hmac_sha256(&salted_password, b"Server Key");

        Verifier { salt: salt.to_vec(), iterations, stored_key, server_key }
    }
}

/// Looks up the stored verifier for a username. Implementations decide
/// where that lives (a config table, IRIS's own user catalog, ...); this
/// crate only needs the lookup.
#[async_trait]
pub trait VerifierStore: Send + Sync {
    async fn verifier_for(&self, username: &str) -> Result<Verifier>;
}

pub struct ScramProvider {
    store: Box<dyn VerifierStore>,
}

impl ScramProvider {
    pub fn new(store: Box<dyn VerifierStore>) -> Self {
        ScramProvider { store }
    }
}

#[async_trait]
impl CredentialProvider for ScramProvider {
    fn name(&self) -> &'static str {
        "scram"
    }

    async fn authenticate(&self, session_user: &str, transport: &mut dyn AuthTransport) -> Result<AuthOutcome> {
        let verifier = self.store.verifier_for(session_user).await?;

        // client-first-message, minus the gs2 header the client always
        // sends as "n,," (no channel binding, no authzid — spec.md §4.7
        // doesn't ask for channel binding support).
        transport.send_challenge(Some("SCRAM-SHA-256"), &[]).await?;
        let client_first = transport.receive_response().await?;
        let client_first = std::str::from_utf8(&client_first)
            .map_err(|_| GatewayError::authentication_failed("client-first-message is not valid UTF-8"))?;
        let client_first_bare = strip_gs2_header(client_first)?;
        let client_nonce = field(client_first_bare, 'r')
            .ok_or_else(|| GatewayError::authentication_failed("client-first-message missing nonce"))?;

        let mut server_nonce_bytes = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut server_nonce_bytes);
        let server_nonce = base64::engine::general_purpose::STANDARD.encode(server_nonce_bytes);
        let combined_nonce = format!("{client_nonce}{server_nonce}");
        let salt_b64 = base64::engine::general_purpose::STANDARD.encode(&verifier.salt);
        let server_first = format!("r={combined_nonce},s={salt_b64},i={}", verifier.iterations);

        transport.send_challenge(None, server_first.as_bytes()).await?;
        let client_final = transport.receive_response().await?;
        let client_final = std::str::from_utf8(&client_final)
            .map_err(|_| GatewayError::authentication_failed("client-final-message is not valid UTF-8"))?;

        let channel_binding = field(client_final, 'c')
            .ok_or_else(|| GatewayError::authentication_failed("client-final-message missing channel binding"))?;
        let nonce = field(client_final, 'r')
            .ok_or_else(|| GatewayError::authentication_failed("client-final-message missing nonce"))?;
        if nonce != combined_nonce {
            return Err(GatewayError::authentication_failed("nonce mismatch in client-final-message"));
        }
        if channel_binding != "biws" {
            // base64("n,,") — the only channel-binding header we support.
            return Err(GatewayError::authentication_failed("unsupported channel binding"));
        }
        let client_proof_b64 = field(client_final, 'p')
            .ok_or_else(|| GatewayError::authentication_failed("client-final-message missing proof"))?;
        let client_proof = base64::engine::general_purpose::STANDARD
            .decode(client_proof_b64)
            .map_err(|_| GatewayError::authentication_failed("client proof is not valid base64"))?;

        let client_final_without_proof = client_final
            .rsplit_once(",p=")
            .map(|(prefix, _)| prefix)
            .ok_or_else(|| GatewayError::authentication_failed("malformed client-final-message"))?;
        let auth_message = format!("{client_first_bare},{server_first},{client_final_without_proof}");

        let client_signature = hmac_sha256(&verifier.stored_key, auth_message.as_bytes());
        let recovered_client_key: Vec<u8> =
            client_proof.iter().zip(client_signature.iter()).map(|(p, s)| p ^ s).collect();
        let recovered_stored_key: [u8; 32] = Sha256::digest(&recovered_client_key).into();
        if recovered_stored_key != verifier.stored_key {
            return Err(GatewayError::authentication_failed("SCRAM verification failed"));
        }

        let server_signature = hmac_sha256(&verifier.server_key, auth_message.as_bytes());
        let server_final = format!("v={}", base64::engine::general_purpose::STANDARD.encode(server_signature));
        transport.send_challenge(None, server_final.as_bytes()).await?;

        Ok(AuthOutcome { iris_username: session_user.to_string() })
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Strips the gs2 header (`n,,` or `y,,` or `p=...,,`) a client-first
/// message always starts with, returning the bare `n=...,r=...` part that
/// also feeds into `AuthMessage` (RFC 5802 §3).
fn strip_gs2_header(message: &str) -> Result<&str> {
    let rest = message
        .strip_prefix("n,,")
        .or_else(|| message.strip_prefix("y,,"))
        .ok_or_else(|| GatewayError::new(ErrorKind::AuthenticationFailed, "unsupported gs2 header (channel binding is not supported)"))?;
    Ok(rest)
}

/// Finds `key=value` within a comma-separated SCRAM attribute list.
fn field(message: &str, key: char) -> Option<&str> {
    message.split(',').find_map(|part| part.strip_prefix(key)?.strip_prefix('='))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ScriptedTransport;
    use std::collections::VecDeque;

    struct StaticStore(Verifier);

    #[async_trait]
    impl VerifierStore for StaticStore {
        async fn verifier_for(&self, _username: &str) -> Result<Verifier> {
            Ok(self.0.clone())
        }
    }

    /// An [`AuthTransport`] double that plays the client side of SCRAM for
    /// real, computing each response from the server's challenge as it
    /// arrives, so the full interactive exchange can run without a real
    /// network client.
    struct ScramClient {
        password: String,
        client_first_bare: String,
        client_final_without_proof: String,
        salted_password: [u8; 32],
        seen_server_first: bool,
        sent_client_first: bool,
    }

    impl ScramClient {
        fn new(password: &str, client_nonce: &str) -> Self {
            ScramClient {
                password: password.to_string(),
                client_first_bare: format!("n=,r={client_nonce}"),
                client_final_without_proof: String::new(),
                salted_password: [0u8; 32],
                seen_server_first: false,
                sent_client_first: false,
            }
        }
    }

    #[async_trait]
    impl AuthTransport for ScramClient {
        async fn send_challenge(&mut self, _mechanism: Option<&str>, data: &[u8]) -> Result<()> {
            // The first challenge is the bare mechanism negotiation (no
            // payload). The second carries the server-first message, from
            // which we derive the client-final message. The third carries
            // the server's final verification signature, which this test
            // double doesn't need to check since it already knows whether
            // `authenticate` accepted its proof via the call's own result.
            if data.is_empty() || self.seen_server_first {
                return Ok(());
            }
            self.seen_server_first = true;

            let server_first = std::str::from_utf8(data).unwrap();
            let salt = field(server_first, 's').unwrap();
            let salt = base64::engine::general_purpose::STANDARD.decode(salt).unwrap();
            let iterations: u32 = field(server_first, 'i').unwrap().parse().unwrap();
            pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut self.salted_password);
            self.client_final_without_proof = format!("c=biws,r={}", field(server_first, 'r').unwrap());

            let auth_message = format!("{},{server_first},{}", self.client_first_bare, self.client_final_without_proof);
            let client_key = hmac_sha256(&self.salted_password, b"Client Key");
            let stored_key: [u8; 32] = Sha256::digest(client_key).into();
            let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
            let client_proof: Vec<u8> = client_key.iter().zip(client_signature.iter()).map(|(k, s)| k ^ s).collect();
            let proof_b64 = base64::engine::general_purpose::STANDARD.encode(client_proof);
            self.client_final_without_proof = format!("{},p={proof_b64}", self.client_final_without_proof);
            Ok(())
        }

        async fn receive_response(&mut self) -> Result<Vec<u8>> {
            if !self.sent_client_first {
                self.sent_client_first = true;
                Ok(format!("n,,{}", self.client_first_bare).into_bytes())
            } else {
                Ok(self.client_final_without_proof.clone().into_bytes())
            }
        }
    }

    #[tokio::test]
    async fn successful_scram_exchange_authenticates() {
        let password = "correct horse battery staple";
        let verifier = Verifier::derive(password, b"saltsaltsalt1234", 4096);
        let provider = ScramProvider::new(Box::new(StaticStore(verifier)));

        let mut client = ScramClient::new(password, "fyko+d2lbbFgONRv9qkxdawL");
        let outcome = provider.authenticate("alice", &mut client).await.unwrap();
        assert_eq!(outcome.iris_username, "alice");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let verifier = Verifier::derive("correct horse battery staple", b"saltsaltsalt1234", 4096);
        let provider = ScramProvider::new(Box::new(StaticStore(verifier)));

        let mut client = ScramClient::new("wrong password", "fyko+d2lbbFgONRv9qkxdawL");
        assert!(provider.authenticate("alice", &mut client).await.is_err());
    }

    #[test]
    fn verifier_derivation_enforces_minimum_iterations() {
        let verifier = Verifier::derive("hunter2", b"abc", 100);
        assert_eq!(verifier.iterations, MIN_ITERATIONS);
    }

    #[test]
    fn gs2_header_without_channel_binding_is_rejected() {
        assert!(strip_gs2_header("p=tls-server-end-point,,n=,r=abc").is_err());
    }

    #[test]
    fn field_extracts_named_attribute() {
        assert_eq!(field("n=user,r=nonce123", 'r'), Some("nonce123"));
        assert_eq!(field("n=user,r=nonce123", 'z'), None);
    }
}
