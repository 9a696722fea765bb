//! Request cache and in-flight deduplication
//!
//! This module handles:
//! - TTL caching of JSON responses, with expiry checked at read time
//! - Tag-based invalidation through a reverse tag -> keys index
//! - Collapsing concurrent identical requests into one network call
//! - Value observation that invalidates dependent tags on change
//!
//! A fetch runs in its own task, so a caller that stops waiting never
//! cancels it; the task stores the entry and clears the in-flight slot.

use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{GatewayError, Result};
use crate::transport::{HttpRequest, HttpTransport};

/// Per-call cache options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    /// Explicit key; defaults to method + url + body
    pub cache_key: Option<String>,
    /// Time to live; zero means "do not store"
    pub ttl_ms: u64,
    /// Tags to index the entry under
    pub tags: Vec<String>,
}

impl FetchOptions {
    /// Deduplicated but never stored
    pub fn uncached() -> Self {
        Self::default()
    }

    /// Stored for `ttl_ms`
    pub fn ttl(ttl_ms: u64) -> Self {
        Self { ttl_ms, ..Self::default() }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
    tags: Vec<String>,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tag_index: HashMap<String, HashSet<String>>,
    observed: HashMap<String, String>,
    in_flight: HashMap<String, SharedFetch>,
}

impl CacheState {
    fn store(&mut self, key: &str, value: Value, ttl_ms: u64, tags: &[String]) {
        let now = Instant::now();
        self.purge_expired(now);
        self.remove_entry(key);
        for tag in tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + Duration::from_millis(ttl_ms),
                tags: tags.to_vec(),
            },
        );
    }

    /// Remove an entry and unlink it from every tag it was indexed under
    fn remove_entry(&mut self, key: &str) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        for tag in entry.tags {
            if let Some(keys) = self.tag_index.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(&tag);
                }
            }
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove_entry(&key);
        }
    }
}

/// Shared request cache; one per registry
pub struct RequestCache {
    transport: Arc<dyn HttpTransport>,
    state: Arc<Mutex<CacheState>>,
}

impl RequestCache {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Underlying transport, for writes that must bypass the cache
    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::clone(&self.transport)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        lock_state(&self.state)
    }

    /// Fetch a JSON document through the cache
    pub async fn fetch_json(&self, request: HttpRequest, options: FetchOptions) -> Result<Value> {
        self.fetch_json_checked(request, options, |_| true).await
    }

    /// Like `fetch_json`, but a document is stored only when `cacheable`
    /// accepts it. Rejected documents still reach every waiting caller.
    pub async fn fetch_json_checked(
        &self,
        request: HttpRequest,
        options: FetchOptions,
        cacheable: fn(&Value) -> bool,
    ) -> Result<Value> {
        let key = options
            .cache_key
            .clone()
            .unwrap_or_else(|| request.cache_key());

        let pending = {
            let mut state = self.lock();

            let now = Instant::now();
            match state.entries.get(&key) {
                Some(entry) if entry.expires_at > now => {
                    debug!("Cache hit for {}", key);
                    return Ok(entry.value.clone());
                }
                Some(_) => state.remove_entry(&key),
                None => {}
            }

            match state.in_flight.get(&key) {
                Some(pending) => {
                    debug!("Joining in-flight request for {}", key);
                    pending.clone()
                }
                None => {
                    let pending = self.spawn_fetch(key.clone(), request, options, cacheable);
                    state.in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Start the network call in its own task. Called with the state lock held,
    /// so the task cannot clear its in-flight slot before it is registered.
    fn spawn_fetch(
        &self,
        key: String,
        request: HttpRequest,
        options: FetchOptions,
        cacheable: fn(&Value) -> bool,
    ) -> SharedFetch {
        let transport = Arc::clone(&self.transport);
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            debug!("Fetching {}", key);
            let result = match transport.send(&request).await {
                Ok(response) => response.into_json(&request.url),
                Err(err) => Err(err),
            };

            let mut guard = lock_state(&state);
            if let Ok(value) = &result {
                if options.ttl_ms > 0 && cacheable(value) {
                    guard.store(&key, value.clone(), options.ttl_ms, &options.tags);
                }
            }
            guard.in_flight.remove(&key);
            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(GatewayError::network(format!("Fetch task failed: {}", e))))
        }
        .boxed()
        .shared()
    }

    /// Drop every entry indexed under any of `tags`
    pub fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) {
        let mut state = self.lock();
        for tag in tags {
            if let Some(keys) = state.tag_index.remove(tag.as_ref()) {
                debug!("Invalidating {} entries for tag {}", keys.len(), tag.as_ref());
                for key in keys {
                    state.remove_entry(&key);
                }
            }
        }
    }

    /// Record `value` under `key`; if a different value was observed before,
    /// invalidate `tags`. Returns true when an invalidation happened.
    pub fn observe_value_and_invalidate<S: AsRef<str>>(&self, key: &str, value: &str, tags: &[S]) -> bool {
        let previous = self.lock().observed.insert(key.to_string(), value.to_string());
        match previous {
            Some(previous) if previous != value => {
                debug!("Observed change for {}: {} -> {}", key, previous, value);
                self.invalidate_tags(tags);
                true
            }
            _ => false,
        }
    }

    /// Drop all stored entries and observations
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.tag_index.clear();
        state.observed.clear();
    }

    /// Number of stored entries, expired ones included until read
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tags that still index at least one entry
    pub fn tag_count(&self) -> usize {
        self.lock().tag_index.len()
    }
}

fn lock_state(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn cache_with(mock: &Arc<MockTransport>) -> RequestCache {
        RequestCache::new(mock.clone())
    }

    #[tokio::test]
    async fn test_ttl_hit_skips_network() {
        let mock = Arc::new(MockTransport::new());
        mock.route_json("https://api/x", json!({"v": 1}));
        let cache = cache_with(&mock);

        let first = cache.fetch_json(HttpRequest::get("https://api/x"), FetchOptions::ttl(60_000)).await.unwrap();
        let second = cache.fetch_json(HttpRequest::get("https://api/x"), FetchOptions::ttl(60_000)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.calls("https://api/x"), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_stored() {
        let mock = Arc::new(MockTransport::new());
        mock.route_json("https://api/x", json!(1));
        let cache = cache_with(&mock);

        cache.fetch_json(HttpRequest::get("https://api/x"), FetchOptions::uncached()).await.unwrap();
        cache.fetch_json(HttpRequest::get("https://api/x"), FetchOptions::uncached()).await.unwrap();
        assert_eq!(mock.calls("https://api/x"), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_checked_on_read() {
        let mock = Arc::new(MockTransport::new());
        mock.route_json("https://api/x", json!(1));
        let cache = cache_with(&mock);

        cache.fetch_json(HttpRequest::get("https://api/x"), FetchOptions::ttl(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.fetch_json(HttpRequest::get("https://api/x"), FetchOptions::ttl(20)).await.unwrap();
        assert_eq!(mock.calls("https://api/x"), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mock = Arc::new(MockTransport::new());
        mock.route_status("https://api/x", 500, "boom");
        let cache = cache_with(&mock);

        assert!(cache.fetch_json(HttpRequest::get("https://api/x"), FetchOptions::ttl(60_000)).await.is_err());
        mock.route_json("https://api/x", json!("ok"));
        let value = cache.fetch_json(HttpRequest::get("https://api/x"), FetchOptions::ttl(60_000)).await.unwrap();
        assert_eq!(value, json!("ok"));
        assert_eq!(mock.calls("https://api/x"), 2);
    }

    #[tokio::test]
    async fn test_tag_invalidation_is_idempotent() {
        let mock = Arc::new(MockTransport::new());
        mock.route_json("https://api/a", json!(1));
        mock.route_json("https://api/b", json!(2));
        let cache = cache_with(&mock);

        let tagged = FetchOptions::ttl(60_000).with_tag("history:eth:0xabc");
        cache.fetch_json(HttpRequest::get("https://api/a"), tagged).await.unwrap();
        cache.fetch_json(HttpRequest::get("https://api/b"), FetchOptions::ttl(60_000)).await.unwrap();
        assert_eq!(cache.len(), 2);

        cache.invalidate_tags(&["history:eth:0xabc"]);
        assert_eq!(cache.len(), 1);
        cache.invalidate_tags(&["history:eth:0xabc"]);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_observe_invalidates_only_on_change() {
        let mock = Arc::new(MockTransport::new());
        mock.route_json("https://api/h", json!([]));
        let cache = cache_with(&mock);
        let tags = ["history:btc:addr"];

        cache
            .fetch_json(HttpRequest::get("https://api/h"), FetchOptions::ttl(60_000).with_tag(tags[0]))
            .await
            .unwrap();

        assert!(!cache.observe_value_and_invalidate("balance:btc:addr", "100", &tags));
        assert!(!cache.observe_value_and_invalidate("balance:btc:addr", "100", &tags));
        assert_eq!(cache.len(), 1);
        assert!(cache.observe_value_and_invalidate("balance:btc:addr", "90", &tags));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_call() {
        let mock = Arc::new(MockTransport::new().with_latency(Duration::from_millis(30)));
        mock.route_json("https://api/slow", json!({"n": 7}));
        let cache = Arc::new(cache_with(&mock));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    cache.fetch_json(HttpRequest::get("https://api/slow"), FetchOptions::uncached()).await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), json!({"n": 7}));
        }
        assert_eq!(mock.calls("https://api/slow"), 1);
    }

    #[tokio::test]
    async fn test_rejected_documents_are_not_stored() {
        let mock = Arc::new(MockTransport::new());
        mock.route_json("https://api/x", json!({"error": "busy"}));
        let cache = cache_with(&mock);
        let no_error = |value: &Value| value.get("error").is_none();

        let first = cache
            .fetch_json_checked(HttpRequest::get("https://api/x"), FetchOptions::ttl(60_000), no_error)
            .await
            .unwrap();
        assert_eq!(first, json!({"error": "busy"}));
        assert!(cache.is_empty());

        mock.route_json("https://api/x", json!({"ok": true}));
        let second = cache
            .fetch_json_checked(HttpRequest::get("https://api/x"), FetchOptions::ttl(60_000), no_error)
            .await
            .unwrap();
        assert_eq!(second, json!({"ok": true}));
        assert_eq!(cache.len(), 1);
        assert_eq!(mock.calls("https://api/x"), 2);
    }

    #[tokio::test]
    async fn test_tag_index_tracks_live_entries() {
        let mock = Arc::new(MockTransport::new());
        mock.route_json("https://api/*", json!(1));
        let cache = cache_with(&mock);

        for i in 0..20 {
            let options = FetchOptions::ttl(10).with_tag(format!("balance:btc:addr{}", i));
            cache.fetch_json(HttpRequest::get(format!("https://api/{}", i)), options).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // storing a fresh entry sweeps the expired ones and their tags
        let options = FetchOptions::ttl(60_000).with_tag("balance:btc:live");
        cache.fetch_json(HttpRequest::get("https://api/live"), options).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.tag_count(), 1);

        // re-storing the same key under a new tag drops the old link
        cache.clear();
        let first = FetchOptions::ttl(10).with_key("k").with_tag("history:btc:a");
        cache.fetch_json(HttpRequest::get("https://api/k"), first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = FetchOptions::ttl(60_000).with_key("k").with_tag("history:btc:b");
        cache.fetch_json(HttpRequest::get("https://api/k"), second).await.unwrap();
        assert_eq!(cache.tag_count(), 1);

        cache.invalidate_tags(&["history:btc:b"]);
        assert!(cache.is_empty());
        assert_eq!(cache.tag_count(), 0);
    }
}
