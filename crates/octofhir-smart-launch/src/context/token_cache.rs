//! Short-lived access token cache for the context service.
//!
//! Tokens are cached per `(issuer, client_id, scopes)` until shortly before
//! they expire. Each key owns an async mutex that is held while a token is
//! fetched, so concurrent resolutions sharing a key issue one token request
//! and the rest reuse its result.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::config::ContextServiceConfig;
use crate::error::LaunchError;

/// Upper bound on how long a token stays cached, whatever the issuer reports.
pub const MAX_CACHED_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Identifies a cached token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    issuer: String,
    client_id: String,
    scopes: Vec<String>,
}

impl CacheKey {
    /// Builds the key for a context service configuration.
    #[must_use]
    pub fn for_config(config: &ContextServiceConfig) -> Self {
        Self {
            issuer: config.issuer_url.to_string(),
            client_id: config.client_id.clone(),
            scopes: config.scopes.clone(),
        }
    }
}

/// Access token returned by the token issuer.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Bearer token value.
    pub value: String,
    /// Lifetime reported by the issuer.
    pub expires_in: Option<Duration>,
}

impl AccessToken {
    /// Creates a token.
    #[must_use]
    pub fn new(value: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            value: value.into(),
            expires_in,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

type Slot = Arc<Mutex<Option<CachedToken>>>;

/// Cache of access tokens with per-key single-flight fetching.
pub struct AccessTokenCache {
    expiry_skew: Duration,
    slots: RwLock<HashMap<CacheKey, Slot>>,
}

impl AccessTokenCache {
    /// Creates an empty cache.
    ///
    /// `expiry_skew` is subtracted from each token's lifetime; tokens whose
    /// lifetime does not exceed it are never cached. Lifetimes are capped at
    /// [`MAX_CACHED_LIFETIME`].
    #[must_use]
    pub fn new(expiry_skew: Duration) -> Self {
        Self {
            expiry_skew,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a fresh cached token for `key`, or fetches one.
    ///
    /// The key's lock is held across `fetch`, so at most one fetch per key is
    /// in flight. Fetch errors are returned unchanged and nothing is cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<String, LaunchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, LaunchError>>,
    {
        let slot = self.slot(key).await;
        let mut cached = slot.lock().await;

        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh()) {
            tracing::debug!(client_id = %key.client_id, "Using cached context service token");
            return Ok(token.value.clone());
        }

        *cached = None;
        let token = fetch().await?;

        let expiry = token
            .expires_in
            .map(|expires_in| {
                expires_in
                    .saturating_sub(self.expiry_skew)
                    .min(MAX_CACHED_LIFETIME)
            })
            .filter(|lifetime| !lifetime.is_zero())
            .and_then(|lifetime| Some((lifetime, Instant::now().checked_add(lifetime)?)));

        if let Some((lifetime, expires_at)) = expiry {
            tracing::debug!(
                client_id = %key.client_id,
                ttl_secs = lifetime.as_secs(),
                "Cached context service token"
            );
            *cached = Some(CachedToken {
                value: token.value.clone(),
                expires_at,
            });
        }

        Ok(token.value)
    }

    /// Discards the token cached for `key`.
    ///
    /// The slot is emptied as well as unmapped, so callers that already hold
    /// it cannot read the discarded token. Waits for an in-flight fetch on the
    /// key and discards its result too.
    pub async fn invalidate(&self, key: &CacheKey) {
        let removed = self.slots.write().await.remove(key);
        if let Some(slot) = removed {
            slot.lock().await.take();
            tracing::debug!(client_id = %key.client_id, "Invalidated context service token");
        }
    }

    /// Removes every expired entry.
    pub async fn cleanup(&self) {
        let mut slots = self.slots.write().await;
        // Slots locked by an in-flight fetch are kept.
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(cached) => cached.as_ref().is_some_and(CachedToken::is_fresh),
            Err(_) => true,
        });
    }

    /// Removes all entries.
    pub async fn clear(&self) {
        let removed: Vec<Slot> = self.slots.write().await.drain().map(|(_, slot)| slot).collect();
        for slot in removed {
            slot.lock().await.take();
        }
    }

    /// Returns the number of keys holding a fresh token.
    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| {
                slot.try_lock()
                    .is_ok_and(|cached| cached.as_ref().is_some_and(CachedToken::is_fresh))
            })
            .count()
    }

    /// Returns true if no fresh token is cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn slot(&self, key: &CacheKey) -> Slot {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }

        self.slots
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }
}

impl fmt::Debug for AccessTokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenCache")
            .field("expiry_skew", &self.expiry_skew)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use url::Url;

    use super::*;
    use crate::config::ClientSecret;

    fn key(client_id: &str) -> CacheKey {
        CacheKey::for_config(
            &ContextServiceConfig::new(
                Url::parse("https://issuer.example.com/token").unwrap(),
                client_id,
                ClientSecret::new("secret"),
                Url::parse("https://ctx.example.com/context").unwrap(),
            )
            .with_scopes(["context.read"]),
        )
    }

    async fn fetch_counted(
        cache: &AccessTokenCache,
        key: &CacheKey,
        calls: &AtomicU32,
        expires_in: Option<u64>,
    ) -> String {
        cache
            .get_or_fetch(key, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(AccessToken::new(
                    format!("token-{n}"),
                    expires_in.map(Duration::from_secs),
                ))
            })
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_reused_until_expiry() {
        let cache = AccessTokenCache::new(Duration::from_secs(30));
        let key = key("app");
        let calls = AtomicU32::new(0);

        assert_eq!(fetch_counted(&cache, &key, &calls, Some(300)).await, "token-0");
        assert_eq!(fetch_counted(&cache, &key, &calls, Some(300)).await, "token-0");
        assert_eq!(cache.len().await, 1);

        // 300s lifetime minus 30s skew
        tokio::time::advance(Duration::from_secs(271)).await;
        assert_eq!(fetch_counted(&cache, &key, &calls, Some(300)).await, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tokens_without_lifetime_not_cached() {
        let cache = AccessTokenCache::new(Duration::from_secs(30));
        let key = key("app");
        let calls = AtomicU32::new(0);

        fetch_counted(&cache, &key, &calls, None).await;
        fetch_counted(&cache, &key, &calls, Some(10)).await;
        fetch_counted(&cache, &key, &calls, None).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cache = AccessTokenCache::new(Duration::ZERO);
        let calls = AtomicU32::new(0);

        let a = fetch_counted(&cache, &key("a"), &calls, Some(300)).await;
        let b = fetch_counted(&cache, &key("b"), &calls, Some(300)).await;

        assert_ne!(a, b);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = AccessTokenCache::new(Duration::ZERO);
        let key = key("app");
        let calls = AtomicU32::new(0);

        fetch_counted(&cache, &key, &calls, Some(300)).await;
        cache.invalidate(&key).await;
        assert!(cache.is_empty().await);

        assert_eq!(fetch_counted(&cache, &key, &calls, Some(300)).await, "token-1");
    }

    #[tokio::test]
    async fn test_invalidate_empties_held_slot() {
        let cache = AccessTokenCache::new(Duration::ZERO);
        let key = key("app");
        let calls = AtomicU32::new(0);

        fetch_counted(&cache, &key, &calls, Some(300)).await;
        let held = cache.slot(&key).await;
        assert!(held.lock().await.is_some());

        cache.invalidate(&key).await;
        assert!(held.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_discards_in_flight_fetch() {
        let cache = Arc::new(AccessTokenCache::new(Duration::ZERO));
        let key = key("app");
        let held = cache.slot(&key).await;

        let fetching = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(AccessToken::new("revoked", Some(Duration::from_secs(300))))
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate(&key).await;

        assert_eq!(fetching.await.unwrap().unwrap(), "revoked");
        assert!(held.lock().await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_lifetime_is_capped() {
        let cache = AccessTokenCache::new(Duration::from_secs(30));
        let key = key("app");
        let calls = AtomicU32::new(0);

        assert_eq!(
            fetch_counted(&cache, &key, &calls, Some(u64::MAX)).await,
            "token-0"
        );
        assert_eq!(
            fetch_counted(&cache, &key, &calls, Some(u64::MAX)).await,
            "token-0"
        );

        tokio::time::advance(MAX_CACHED_LIFETIME + Duration::from_secs(1)).await;
        assert_eq!(
            fetch_counted(&cache, &key, &calls, Some(u64::MAX)).await,
            "token-1"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_not_cached() {
        let cache = AccessTokenCache::new(Duration::ZERO);
        let key = key("app");

        let err = cache
            .get_or_fetch(&key, || async { Err(LaunchError::auth_failure("invalid_client")) })
            .await
            .unwrap_err();
        assert!(err.invalidates_token());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_are_single_flight() {
        let cache = Arc::new(AccessTokenCache::new(Duration::ZERO));
        let calls = Arc::new(AtomicU32::new(0));
        let key = key("app");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&key, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(AccessToken::new("shared", Some(Duration::from_secs(300))))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_expired() {
        let cache = AccessTokenCache::new(Duration::ZERO);
        let calls = AtomicU32::new(0);

        fetch_counted(&cache, &key("short"), &calls, Some(10)).await;
        fetch_counted(&cache, &key("long"), &calls, Some(600)).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.cleanup().await;
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_access_token_debug_redacted() {
        let token = AccessToken::new("very-secret", None);
        assert!(!format!("{token:?}").contains("very-secret"));
    }
}
