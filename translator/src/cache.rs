//! LRU + TTL translation cache, keyed on `(original_sql, identifier_policy)`
//! and never on parameter values (spec.md §4.4).

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use common::config::IdentifierCasePolicy;

use crate::TranslationResult;

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    sql: String,
    policy: CachePolicy,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum CachePolicy {
    Preserve,
    Upper,
    Lower,
}

impl From<IdentifierCasePolicy> for CachePolicy {
    fn from(p: IdentifierCasePolicy) -> Self {
        match p {
            IdentifierCasePolicy::Preserve => CachePolicy::Preserve,
            IdentifierCasePolicy::Upper => CachePolicy::Upper,
            IdentifierCasePolicy::Lower => CachePolicy::Lower,
        }
    }
}

struct Entry {
    result: TranslationResult,
    inserted_at: Instant,
}

/// Not internally synchronized; callers that share a cache across sessions
/// wrap it in their own lock, same as the pool in `executor`.
pub struct TranslationCache {
    ttl: Duration,
    inner: LruCache<CacheKey, Entry>,
}

impl TranslationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        TranslationCache { ttl, inner: LruCache::new(capacity) }
    }

    pub fn get(&mut self, sql: &str, policy: IdentifierCasePolicy, now: Instant) -> Option<TranslationResult> {
        let key = CacheKey { sql: sql.to_string(), policy: policy.into() };
        let expired = match self.inner.peek(&key) {
            Some(entry) => now.duration_since(entry.inserted_at) >= self.ttl,
            None => return None,
        };
        if expired {
            self.inner.pop(&key);
            return None;
        }
        self.inner.get(&key).map(|entry| entry.result.clone())
    }

    pub fn put(&mut self, sql: &str, policy: IdentifierCasePolicy, result: TranslationResult, now: Instant) {
        let key = CacheKey { sql: sql.to_string(), policy: policy.into() };
        self.inner.put(key, Entry { result, inserted_at: now });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate;

    #[test]
    fn caches_and_expires() {
        let mut cache = TranslationCache::new(4, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(cache.get("select 1", IdentifierCasePolicy::Upper, t0).is_none());

        let result = translate("select 1", IdentifierCasePolicy::Upper);
        cache.put("select 1", IdentifierCasePolicy::Upper, result.clone(), t0);
        assert!(cache.get("select 1", IdentifierCasePolicy::Upper, t0).is_some());

        let later = t0 + Duration::from_secs(61);
        assert!(cache.get("select 1", IdentifierCasePolicy::Upper, later).is_none());
    }
}
