//! `oauth`: spec.md §4.7's bridge from PostgreSQL's cleartext-password
//! exchange to an OAuth access token. The client's "password" is actually
//! a bearer token (or a code exchangeable for one); this provider hands
//! it to an introspection endpoint and maps the response to an IRIS
//! username, caching the verdict briefly so every statement on a
//! long-lived connection doesn't round-trip to the IdP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use common::error::{GatewayError, Result};

use crate::{AuthOutcome, AuthTransport, CredentialProvider};

/// Talks to whatever introspection endpoint the IdP exposes (RFC 7662).
/// A real implementation wraps an HTTP client; this crate only needs the
/// outcome.
#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    /// Returns the IRIS username the token maps to, or an error if the
    /// token is invalid, expired, or introspection itself failed.
    async fn introspect(&self, token: &str) -> Result<String>;
}

struct CacheEntry {
    iris_username: String,
    expires_at: Instant,
}

/// Caches successful introspections for `ttl`, keyed by the raw token, so
/// a session that reconnects (or a pooled connection passing the same
/// token through repeated handshakes) doesn't re-hit the IdP every time.
struct TokenCache {
    ttl: Duration,
    entries: Mutex<std::collections::HashMap<String, CacheEntry>>,
}

impl TokenCache {
    fn new(ttl: Duration) -> Self {
        TokenCache { ttl, entries: Mutex::new(std::collections::HashMap::new()) }
    }

    async fn get(&self, token: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(token) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.iris_username.clone()),
            Some(_) => {
                entries.remove(token);
                None
            }
            None => None,
        }
    }

    async fn put(&self, token: &str, iris_username: &str) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            token.to_string(),
            CacheEntry { iris_username: iris_username.to_string(), expires_at: Instant::now() + self.ttl },
        );
    }
}

pub struct OAuthProvider {
    introspector: Arc<dyn TokenIntrospector>,
    cache: TokenCache,
}

impl OAuthProvider {
    pub fn new(introspector: Arc<dyn TokenIntrospector>, cache_ttl: Duration) -> Self {
        OAuthProvider { introspector, cache: TokenCache::new(cache_ttl) }
    }
}

#[async_trait]
impl CredentialProvider for OAuthProvider {
    fn name(&self) -> &'static str {
        "oauth"
    }

    async fn authenticate(&self, _session_user: &str, transport: &mut dyn AuthTransport) -> Result<AuthOutcome> {
        transport.send_challenge(None, &[]).await?;
        let token = transport.receive_response().await?;
        let token = String::from_utf8(token)
            .map_err(|_| GatewayError::authentication_failed("bearer token is not valid UTF-8"))?;
        if token.is_empty() {
            return Err(GatewayError::authentication_failed("empty bearer token"));
        }

        if let Some(iris_username) = self.cache.get(&token).await {
            return Ok(AuthOutcome { iris_username });
        }

        let iris_username = self.introspector.introspect(&token).await?;
        self.cache.put(&token, &iris_username).await;
        Ok(AuthOutcome { iris_username })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ScriptedTransport;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIntrospector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenIntrospector for CountingIntrospector {
        async fn introspect(&self, token: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if token == "valid-token" {
                Ok("alice".to_string())
            } else {
                Err(GatewayError::authentication_failed("token rejected by introspection endpoint"))
            }
        }
    }

    #[tokio::test]
    async fn valid_token_maps_to_iris_username() {
        let introspector = Arc::new(CountingIntrospector { calls: AtomicUsize::new(0) });
        let provider = OAuthProvider::new(introspector, Duration::from_secs(60));
        let mut transport =
            ScriptedTransport { responses: VecDeque::from(vec![b"valid-token".to_vec()]), sent: Vec::new() };
        let outcome = provider.authenticate("alice", &mut transport).await.unwrap();
        assert_eq!(outcome.iris_username, "alice");
    }

    #[tokio::test]
    async fn invalid_token_is_rejected() {
        let introspector = Arc::new(CountingIntrospector { calls: AtomicUsize::new(0) });
        let provider = OAuthProvider::new(introspector, Duration::from_secs(60));
        let mut transport =
            ScriptedTransport { responses: VecDeque::from(vec![b"bogus".to_vec()]), sent: Vec::new() };
        assert!(provider.authenticate("alice", &mut transport).await.is_err());
    }

    #[tokio::test]
    async fn repeated_token_hits_cache_not_introspector() {
        let introspector = Arc::new(CountingIntrospector { calls: AtomicUsize::new(0) });
        let provider = OAuthProvider::new(introspector.clone(), Duration::from_secs(60));

        for _ in 0..3 {
            let mut transport =
                ScriptedTransport { responses: VecDeque::from(vec![b"valid-token".to_vec()]), sent: Vec::new() };
            provider.authenticate("alice", &mut transport).await.unwrap();
        }
        assert_eq!(introspector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_cache_entry_is_re_introspected() {
        let introspector = Arc::new(CountingIntrospector { calls: AtomicUsize::new(0) });
        let provider = OAuthProvider::new(introspector.clone(), Duration::from_millis(1));

        let mut transport =
            ScriptedTransport { responses: VecDeque::from(vec![b"valid-token".to_vec()]), sent: Vec::new() };
        provider.authenticate("alice", &mut transport).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut transport =
            ScriptedTransport { responses: VecDeque::from(vec![b"valid-token".to_vec()]), sent: Vec::new() };
        provider.authenticate("alice", &mut transport).await.unwrap();

        assert_eq!(introspector.calls.load(Ordering::SeqCst), 2);
    }
}
