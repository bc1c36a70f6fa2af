//! `vault`: looks the session user's verifier up in an external secret
//! store under the `pgwire-user-{username}` key (spec.md §4.7) instead of
//! a local table, then runs the same cleartext-password check `trust`
//! would if the presented password matches. Negative lookups (no such
//! key) are cached briefly so a typo'd username doesn't hammer the vault
//! on every retry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use common::error::{GatewayError, Result};

use crate::{AuthOutcome, AuthTransport, CredentialProvider};

/// The external secret store. `lookup` returns `Ok(None)` for "no such
/// key", distinct from `Err` (the store itself is unreachable).
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<String>>;
}

enum NegativeCacheEntry {
    Miss { expires_at: Instant },
}

pub struct VaultProvider {
    store: Arc<dyn SecretStore>,
    negative_cache_ttl: Duration,
    negative_cache: Mutex<std::collections::HashMap<String, NegativeCacheEntry>>,
}

impl VaultProvider {
    pub fn new(store: Arc<dyn SecretStore>, negative_cache_ttl: Duration) -> Self {
        VaultProvider { store, negative_cache_ttl, negative_cache: Mutex::new(std::collections::HashMap::new()) }
    }

    fn secret_key(username: &str) -> String {
        format!("pgwire-user-{username}")
    }

    async fn is_negatively_cached(&self, key: &str) -> bool {
        let mut cache = self.negative_cache.lock().await;
        match cache.get(key) {
            Some(NegativeCacheEntry::Miss { expires_at }) if *expires_at > Instant::now() => true,
            Some(NegativeCacheEntry::Miss { .. }) => {
                cache.remove(key);
                false
            }
            None => false,
        }
    }

    async fn record_miss(&self, key: &str) {
        let mut cache = self.negative_cache.lock().await;
        cache.insert(key.to_string(), NegativeCacheEntry::Miss { expires_at: Instant::now() + self.negative_cache_ttl });
    }
}

#[async_trait]
impl CredentialProvider for VaultProvider {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn authenticate(&self, session_user: &str, transport: &mut dyn AuthTransport) -> Result<AuthOutcome> {
        let key = Self::secret_key(session_user);
        if self.is_negatively_cached(&key).await {
            return Err(GatewayError::authentication_failed("no vault secret for this user"));
        }

        let expected = match self.store.lookup(&key).await? {
            Some(secret) => secret,
            None => {
                self.record_miss(&key).await;
                return Err(GatewayError::authentication_failed("no vault secret for this user"));
            }
        };

        transport.send_challenge(None, &[]).await?;
        let presented = transport.receive_response().await?;
        let presented = String::from_utf8(presented)
            .map_err(|_| GatewayError::authentication_failed("password is not valid UTF-8"))?;

        if presented != expected {
            return Err(GatewayError::authentication_failed("password does not match vault secret"));
        }

        Ok(AuthOutcome { iris_username: session_user.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ScriptedTransport;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapStore {
        secrets: std::collections::HashMap<String, String>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl SecretStore for MapStore {
        async fn lookup(&self, key: &str) -> Result<Option<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.secrets.get(key).cloned())
        }
    }

    #[tokio::test]
    async fn matching_secret_authenticates() {
        let mut secrets = std::collections::HashMap::new();
        secrets.insert("pgwire-user-alice".to_string(), "s3cret".to_string());
        let store = Arc::new(MapStore { secrets, lookups: AtomicUsize::new(0) });
        let provider = VaultProvider::new(store, Duration::from_secs(30));

        let mut transport = ScriptedTransport { responses: VecDeque::from(vec![b"s3cret".to_vec()]), sent: Vec::new() };
        let outcome = provider.authenticate("alice", &mut transport).await.unwrap();
        assert_eq!(outcome.iris_username, "alice");
    }

    #[tokio::test]
    async fn mismatched_secret_is_rejected() {
        let mut secrets = std::collections::HashMap::new();
        secrets.insert("pgwire-user-alice".to_string(), "s3cret".to_string());
        let store = Arc::new(MapStore { secrets, lookups: AtomicUsize::new(0) });
        let provider = VaultProvider::new(store, Duration::from_secs(30));

        let mut transport = ScriptedTransport { responses: VecDeque::from(vec![b"wrong".to_vec()]), sent: Vec::new() };
        assert!(provider.authenticate("alice", &mut transport).await.is_err());
    }

    #[tokio::test]
    async fn missing_user_is_negatively_cached() {
        let store = Arc::new(MapStore { secrets: std::collections::HashMap::new(), lookups: AtomicUsize::new(0) });
        let provider = VaultProvider::new(store.clone(), Duration::from_secs(30));

        let mut transport = ScriptedTransport { responses: VecDeque::new(), sent: Vec::new() };
        assert!(provider.authenticate("ghost", &mut transport).await.is_err());
        let mut transport = ScriptedTransport { responses: VecDeque::new(), sent: Vec::new() };
        assert!(provider.authenticate("ghost", &mut transport).await.is_err());

        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }
}
