use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{EnvironmentContext, MIN_JWKS_REFRESH};
use crate::error::{AuthError, AuthResult};
use crate::jwks::JwksFetcher;

/// A decoding key plus the signature algorithms it may be used with.
#[derive(Clone)]
pub struct KeyEntry {
    key: DecodingKey,
    algorithms: Vec<Algorithm>,
}

impl KeyEntry {
    pub fn new(key: DecodingKey, algorithms: Vec<Algorithm>) -> Self {
        Self { key, algorithms }
    }

    pub fn key(&self) -> &DecodingKey {
        &self.key
    }

    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    pub fn allows(&self, algorithm: Algorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// Thread-safe store for decoding keys loaded from the JWKS endpoint.
#[derive(Clone, Default)]
pub struct InMemoryKeyStore {
    inner: Arc<RwLock<HashMap<String, KeyEntry>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, kid: impl Into<String>, entry: KeyEntry) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(kid.into(), entry);
    }

    pub fn get(&self, kid: &str) -> Option<KeyEntry> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(kid).cloned()
    }

    /// The only key in the store, if there is exactly one.
    pub fn sole(&self) -> Option<KeyEntry> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if guard.len() == 1 {
            guard.values().next().cloned()
        } else {
            None
        }
    }

    pub fn contains(&self, kid: &str) -> bool {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn replace_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, KeyEntry)>,
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.clear();
        for (kid, entry) in entries.into_iter() {
            guard.insert(kid, entry);
        }
    }
}

/// Lazily populated cache of the remote key set.
///
/// Nothing is fetched until the first lookup. Afterwards the cached keys are
/// served until they are older than `max_age`; an unknown kid or a failed
/// fetch allows another fetch at most once per `cooldown`. Concurrent first
/// lookups may each fetch; they all write the same keys.
pub struct RemoteKeySet {
    fetcher: JwksFetcher,
    store: InMemoryKeyStore,
    last_fetch: Mutex<Option<Instant>>,
    max_age: Duration,
    cooldown: Duration,
}

impl RemoteKeySet {
    pub fn new(fetcher: JwksFetcher, max_age: Duration, cooldown: Duration) -> Self {
        Self {
            fetcher,
            store: InMemoryKeyStore::new(),
            last_fetch: Mutex::new(None),
            max_age,
            cooldown,
        }
    }

    /// Present only when a key-set location is configured.
    pub fn from_context(ctx: &EnvironmentContext) -> Option<Arc<Self>> {
        ctx.jwks_url.as_ref().map(|url| {
            Arc::new(Self::new(
                JwksFetcher::new(url.clone()),
                ctx.jwks_max_age,
                ctx.jwks_cooldown,
            ))
        })
    }

    pub fn url(&self) -> &str {
        self.fetcher.url()
    }

    pub fn store(&self) -> &InMemoryKeyStore {
        &self.store
    }

    /// Resolve the key for `kid`; kid-less tokens only resolve against a single-key set.
    pub async fn resolve(&self, kid: Option<&str>) -> AuthResult<KeyEntry> {
        if !self.is_stale() {
            if let Some(entry) = self.lookup(kid) {
                return Ok(entry);
            }
        }

        if self.may_refetch() {
            if let Err(err) = self.refresh().await {
                if let Some(entry) = self.lookup(kid) {
                    warn!(error = %err, jwks_url = %self.url(), "JWKS refresh failed; using cached key");
                    return Ok(entry);
                }
                return Err(err);
            }
        } else if self.store.is_empty() {
            return Err(AuthError::JwksFetch(format!(
                "no keys loaded from {}; retrying after cooldown",
                self.url()
            )));
        }

        self.lookup(kid).ok_or_else(|| match kid {
            Some(kid) => AuthError::UnknownKeyId(kid.to_string()),
            None => AuthError::MissingKeyId,
        })
    }

    /// Fetch the key set and replace the cache. Returns the number of keys loaded.
    pub async fn refresh(&self) -> AuthResult<usize> {
        self.mark_fetched();
        let keys = self.fetcher.fetch().await?;
        let count = keys.len();
        self.store.replace_all(keys);
        info!(count, jwks_url = %self.url(), "loaded JWKS keys");
        Ok(count)
    }

    fn lookup(&self, kid: Option<&str>) -> Option<KeyEntry> {
        match kid {
            Some(kid) => self.store.get(kid),
            None => self.store.sole(),
        }
    }

    fn fetched_at(&self) -> Option<Instant> {
        *self.last_fetch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self) -> bool {
        self.fetched_at()
            .map_or(true, |at| at.elapsed() >= self.max_age)
    }

    /// Failed fetches start the cooldown too.
    fn may_refetch(&self) -> bool {
        self.fetched_at()
            .map_or(true, |at| at.elapsed() >= self.cooldown)
    }

    fn mark_fetched(&self) {
        let mut guard = self.last_fetch.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Instant::now());
    }
}

/// Periodically refresh the key set in the background. Must be called inside a tokio runtime.
pub fn spawn_jwks_refresh(keys: Arc<RemoteKeySet>, every: Duration) -> tokio::task::JoinHandle<()> {
    let period = every.max(MIN_JWKS_REFRESH);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; lookups populate the cache lazily.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match keys.refresh().await {
                Ok(count) => {
                    debug!(count, jwks_url = %keys.url(), "Refreshed JWKS keys");
                }
                Err(err) => {
                    warn!(error = %err, jwks_url = %keys.url(), "Failed to refresh JWKS keys");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn entry(secret: &[u8]) -> KeyEntry {
        KeyEntry::new(DecodingKey::from_secret(secret), vec![Algorithm::RS256])
    }

    fn jwks_body(kids: &[&str]) -> String {
        let keys: Vec<_> = kids
            .iter()
            .map(|kid| json!({ "kid": kid, "kty": "RSA", "alg": "RS256", "n": "sXchDaQebHnPiGvy", "e": "AQAB" }))
            .collect();
        json!({ "keys": keys }).to_string()
    }

    fn remote(server: &MockServer, cooldown: Duration) -> RemoteKeySet {
        RemoteKeySet::new(
            JwksFetcher::new(server.url("/jwks")),
            Duration::from_secs(300),
            cooldown,
        )
    }

    #[test]
    fn key_store_insert_replace_round_trip() {
        let store = InMemoryKeyStore::new();
        assert!(!store.contains("kid"));
        store.insert_key("kid", entry(b"secret"));
        assert!(store.contains("kid"));
        assert!(store.get("kid").is_some());

        store.replace_all(vec![("another".to_string(), entry(b"other"))]);
        assert!(!store.contains("kid"));
        assert!(store.contains("another"));
    }

    #[test]
    fn sole_requires_exactly_one_key() {
        let store = InMemoryKeyStore::new();
        assert!(store.sole().is_none());
        store.insert_key("a", entry(b"a"));
        assert!(store.sole().is_some());
        store.insert_key("b", entry(b"b"));
        assert!(store.sole().is_none());
    }

    #[test]
    fn handle_is_absent_without_location() {
        let ctx = EnvironmentContext::default();
        assert!(RemoteKeySet::from_context(&ctx).is_none());

        let ctx = EnvironmentContext {
            jwks_url: Some("https://id.example.com/jwks".into()),
            ..EnvironmentContext::default()
        };
        let keys = RemoteKeySet::from_context(&ctx).expect("handle");
        assert_eq!(keys.url(), "https://id.example.com/jwks");
        assert!(keys.store().is_empty());
    }

    #[tokio::test]
    async fn first_lookup_fetches_and_later_lookups_hit_cache() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/jwks");
            then.status(200)
                .header("content-type", "application/json")
                .body(jwks_body(&["k1"]));
        });

        let keys = remote(&server, Duration::from_secs(30));
        assert_eq!(mock.hits(), 0, "construction must not fetch");

        keys.resolve(Some("k1")).await.expect("first lookup");
        keys.resolve(Some("k1")).await.expect("cached lookup");
        keys.resolve(None).await.expect("single key serves kid-less tokens");
        assert_eq!(mock.hits(), 1);
    }

    #[tokio::test]
    async fn unknown_kid_refetches_only_after_cooldown() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/jwks");
            then.status(200)
                .header("content-type", "application/json")
                .body(jwks_body(&["k1"]));
        });

        let keys = remote(&server, Duration::from_secs(3600));
        keys.resolve(Some("k1")).await.expect("first lookup");

        let err = keys.resolve(Some("rotated")).await.expect_err("unknown kid");
        assert!(matches!(err, AuthError::UnknownKeyId(kid) if kid == "rotated"));
        assert_eq!(mock.hits(), 1, "cooldown suppresses the refetch");

        let keys = remote(&server, Duration::ZERO);
        keys.resolve(Some("k1")).await.expect("first lookup");
        let _ = keys.resolve(Some("rotated")).await;
        assert_eq!(mock.hits(), 3, "zero cooldown refetches for unknown kids");
    }

    #[tokio::test]
    async fn kid_less_lookup_against_many_keys_fails() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/jwks");
            then.status(200)
                .header("content-type", "application/json")
                .body(jwks_body(&["k1", "k2"]));
        });

        let keys = remote(&server, Duration::from_secs(30));
        let err = keys.resolve(None).await.expect_err("ambiguous key");
        assert!(matches!(err, AuthError::MissingKeyId));
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_when_nothing_is_cached() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/jwks");
            then.status(502);
        });

        let keys = remote(&server, Duration::from_secs(30));
        let err = keys.resolve(Some("k1")).await.expect_err("upstream down");
        assert!(matches!(err, AuthError::JwksFetch(_)));
        assert!(err.is_key_material());
    }

    #[tokio::test]
    async fn background_refresh_waits_for_first_period() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/jwks");
            then.status(200)
                .header("content-type", "application/json")
                .body(jwks_body(&["k1"]));
        });

        let keys = Arc::new(remote(&server, Duration::from_secs(30)));
        let handle = spawn_jwks_refresh(keys.clone(), Duration::ZERO);
        tokio::task::yield_now().await;

        assert!(!handle.is_finished());
        assert_eq!(mock.hits(), 0, "period is floored, no immediate fetch");
        handle.abort();
        assert!(keys.store().is_empty());
    }

    #[tokio::test]
    async fn failed_first_fetch_respects_cooldown() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/jwks");
            then.status(503);
        });

        let keys = remote(&server, Duration::from_secs(3600));
        for _ in 0..3 {
            let err = keys.resolve(Some("k1")).await.expect_err("upstream down");
            assert!(matches!(err, AuthError::JwksFetch(_)));
        }
        assert_eq!(mock.hits(), 1);

        let keys = remote(&server, Duration::ZERO);
        let _ = keys.resolve(Some("k1")).await;
        let _ = keys.resolve(Some("k1")).await;
        assert_eq!(mock.hits(), 3, "zero cooldown retries every time");
    }

    #[tokio::test]
    async fn stale_cache_survives_a_failed_refresh() {
        let server = MockServer::start();
        let mut ok = server.mock(|when, then| {
            when.method(GET).path("/jwks");
            then.status(200)
                .header("content-type", "application/json")
                .body(jwks_body(&["k1"]));
        });

        let keys = RemoteKeySet::new(
            JwksFetcher::new(server.url("/jwks")),
            Duration::ZERO,
            Duration::ZERO,
        );
        keys.resolve(Some("k1")).await.expect("initial fetch");

        ok.delete();
        server.mock(|when, then| {
            when.method(GET).path("/jwks");
            then.status(503);
        });

        keys.resolve(Some("k1"))
            .await
            .expect("cached key used when refresh fails");
    }
}
