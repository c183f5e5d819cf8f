//! Response cache: sharded LRU with per-entry TTL and single-flight fill.
//!
//! Entries live in `shards`, each an independently locked `LruCache`. Keys
//! being computed are tracked in `in_flight`; late arrivals for such a key
//! subscribe to the running computation instead of starting their own.
//! Computations run on detached tasks, so a caller that goes away never
//! cancels work other callers are waiting on.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use lru::LruCache;
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::CacheError;
use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";
const JSON_CONTENT_TYPE: &str = "application/json";

/// A fully rendered success response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self {
            status: StatusCode::OK.as_u16(),
            content_type: JSON_CONTENT_TYPE,
            body: Bytes::from(body),
        })
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        response
    }
}

/// A stored response together with its expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub response: CachedResponse,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

type Outcome<E> = Option<Result<CachedResponse, E>>;

struct Flight<E> {
    id: u64,
    outcome: watch::Receiver<Outcome<E>>,
}

struct CacheInner<E> {
    config: CacheConfig,
    shards: Box<[Mutex<LruCache<CacheKey, CacheEntry>>]>,
    in_flight: DashMap<CacheKey, Flight<E>>,
    next_flight: AtomicU64,
}

/// Clears the in-flight marker when the computation task ends, including by
/// panic or runtime shutdown.
struct FlightGuard<E> {
    inner: Arc<CacheInner<E>>,
    key: CacheKey,
    id: u64,
}

impl<E> Drop for FlightGuard<E> {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

pub struct ResponseCache<E> {
    inner: Arc<CacheInner<E>>,
}

impl<E> Clone for ResponseCache<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> ResponseCache<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        let capacity = config.shard_capacity();
        let shards = (0..config.shard_count())
            .map(|_| Mutex::new(LruCache::new(capacity)))
            .collect();
        Self {
            inner: Arc::new(CacheInner {
                config,
                shards,
                in_flight: DashMap::new(),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return the live entry for `key`, dropping it if it has expired.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if !self.inner.config.enabled {
            return None;
        }
        let mut shard = mutex_lock(self.shard(key), SOURCE, "get");
        let live = shard.get(key).map(|entry| entry.is_live(Instant::now()))?;
        if live {
            return shard.get(key).cloned();
        }
        shard.pop(key);
        counter!("catalog_cache_expired_total").increment(1);
        debug!(cache = "response", outcome = "expired", key = %key);
        None
    }

    /// Store a successful response, evicting the least recently used entry of
    /// the shard when it is full.
    pub fn put(&self, key: CacheKey, response: CachedResponse) {
        if !self.inner.config.enabled {
            return;
        }
        let entry = CacheEntry {
            key,
            response,
            created_at: Instant::now(),
            ttl: self.inner.config.ttl(),
        };
        let evicted = {
            let mut shard = mutex_lock(self.shard(&key), SOURCE, "put");
            shard
                .push(key, entry)
                .map(|(old_key, _)| old_key)
                .filter(|old_key| *old_key != key)
        };
        if let Some(evicted) = evicted {
            counter!("catalog_cache_evict_total").increment(1);
            debug!(cache = "response", outcome = "evict", key = %evicted);
        }
    }

    /// Serve `key` from the cache, or run `compute` at most once across all
    /// concurrent callers and hand every one of them the same outcome.
    ///
    /// Only successful outcomes are stored. A failure is delivered to the
    /// callers that were waiting and then forgotten.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<CachedResponse, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedResponse, E>> + Send + 'static,
    {
        if let Some(entry) = self.get(&key) {
            counter!("catalog_cache_hit_total").increment(1);
            debug!(cache = "response", outcome = "hit", key = %key);
            return Ok(entry.response);
        }

        let mut outcome = match self.inner.in_flight.entry(key) {
            Entry::Occupied(flight) => {
                counter!("catalog_cache_coalesced_total").increment(1);
                debug!(cache = "response", outcome = "coalesced", key = %key);
                flight.get().outcome.clone()
            }
            Entry::Vacant(slot) => {
                // A computation may have finished between the lookup above
                // and claiming the slot.
                if let Some(entry) = self.get(&key) {
                    counter!("catalog_cache_hit_total").increment(1);
                    return Ok(entry.response);
                }
                counter!("catalog_cache_miss_total").increment(1);
                debug!(cache = "response", outcome = "miss", key = %key);

                let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                let (sender, receiver) = watch::channel(None);
                drop(slot.insert(Flight {
                    id,
                    outcome: receiver.clone(),
                }));
                self.spawn_flight(key, id, sender, compute());
                receiver
            }
        };

        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        match settled {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(CacheError::Compute(error)),
            None => {
                warn!(cache = "response", key = %key, "Computation ended without an outcome");
                Err(CacheError::Abandoned { key })
            }
        }
    }

    fn spawn_flight<Fut>(
        &self,
        key: CacheKey,
        id: u64,
        sender: watch::Sender<Outcome<E>>,
        computation: Fut,
    ) where
        Fut: Future<Output = Result<CachedResponse, E>> + Send + 'static,
    {
        let cache = self.clone();
        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            key,
            id,
        };
        tokio::spawn(async move {
            let started = Instant::now();
            let result = computation.await;
            histogram!("catalog_cache_compute_ms")
                .record(started.elapsed().as_secs_f64() * 1000.0);

            match &result {
                Ok(response) => cache.put(key, response.clone()),
                Err(_) => {
                    counter!("catalog_cache_compute_failure_total").increment(1);
                    debug!(cache = "response", outcome = "compute_failure", key = %key);
                }
            }
            // The entry is stored before the marker goes away, so a new
            // caller finds either one or the other.
            drop(guard);
            sender.send_replace(Some(result));
        });
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        for lock in self.inner.shards.iter() {
            let mut shard = mutex_lock(lock, SOURCE, "purge_expired");
            let stale: Vec<CacheKey> = shard
                .iter()
                .filter(|(_, entry)| !entry.is_live(now))
                .map(|(key, _)| *key)
                .collect();
            for key in stale {
                shard.pop(&key);
                purged += 1;
            }
        }
        if purged > 0 {
            counter!("catalog_cache_expired_total").increment(purged as u64);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|lock| mutex_lock(lock, SOURCE, "len").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<LruCache<CacheKey, CacheEntry>> {
        &self.inner.shards[key.shard(self.inner.shards.len())]
    }
}

/// Spawns the periodic expiry sweep. The returned handle is aborted on
/// shutdown.
pub fn spawn_sweeper<E>(cache: ResponseCache<E>) -> tokio::task::JoinHandle<()>
where
    E: Clone + Send + Sync + 'static,
{
    let period = cache.config().sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(cache = "response", purged, "Swept expired entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn cache(config: CacheConfig) -> ResponseCache<Boom> {
        ResponseCache::new(config)
    }

    fn body(text: &'static str) -> CachedResponse {
        CachedResponse {
            status: 200,
            content_type: JSON_CONTENT_TYPE,
            body: Bytes::from_static(text.as_bytes()),
        }
    }

    fn key(n: u8) -> CacheKey {
        CacheKey::from_digest([n; 32])
    }

    #[tokio::test]
    async fn put_then_get_returns_entry() {
        let cache = cache(CacheConfig::default());
        cache.put(key(1), body("one"));
        let entry = cache.get(&key(1)).expect("stored");
        assert_eq!(entry.response.body, Bytes::from_static(b"one"));
        assert_eq!(entry.key, key(1));
        assert!(cache.get(&key(2)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = cache(CacheConfig {
            ttl_seconds: 5,
            ..Default::default()
        });
        cache.put(key(1), body("one"));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get(&key(1)).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let cache = cache(CacheConfig {
            ttl_seconds: 10,
            ..Default::default()
        });
        cache.put(key(1), body("old"));
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.put(key(2), body("new"));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key(2)).is_some());
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let cache = cache(CacheConfig {
            capacity: 2,
            shards: 1,
            ..Default::default()
        });
        cache.put(key(1), body("one"));
        cache.put(key(2), body("two"));
        assert!(cache.get(&key(1)).is_some());
        cache.put(key(3), body("three"));

        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(2)).is_none());
        assert!(cache.get(&key(3)).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn disabled_cache_stores_nothing() {
        let cache = cache(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let response = cache
                .get_or_compute(key(1), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(body("fresh"))
                })
                .await
                .expect("computes");
            assert_eq!(response.body, Bytes::from_static(b"fresh"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failures_are_not_stored() {
        let cache = cache(CacheConfig::default());
        let err = cache
            .get_or_compute(key(1), || async { Err(Boom) })
            .await
            .expect_err("fails");
        assert!(matches!(err, CacheError::Compute(Boom)));
        assert!(cache.get(&key(1)).is_none());
        assert_eq!(cache.in_flight(), 0);

        let ok = cache
            .get_or_compute(key(1), || async { Ok(body("recovered")) })
            .await
            .expect("recomputes");
        assert_eq!(ok.body, Bytes::from_static(b"recovered"));
    }

    #[tokio::test]
    async fn panicking_computation_is_abandoned() {
        let cache = cache(CacheConfig::default());
        let err = cache
            .get_or_compute(key(9), || async {
                if key(9).as_bytes()[0] == 9 {
                    panic!("compute exploded");
                }
                Ok(body("unreachable"))
            })
            .await
            .expect_err("abandoned");
        assert!(matches!(err, CacheError::Abandoned { .. }));
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn cached_response_renders_json() {
        let response = CachedResponse::json(&serde_json::json!({"ok": true}))
            .expect("serializes")
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static(JSON_CONTENT_TYPE))
        );
    }
}
