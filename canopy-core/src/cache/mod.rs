//! Content-addressed response cache
//!
//! Entries are keyed by a SHA-256 digest of the request shape, expire after
//! a TTL, and are evicted by a usage score when the entry-count or byte
//! ceiling would be exceeded. Image payloads never reach the key; only
//! whether a message carried an image does.

use crate::protocol::{ModelRequest, ModelResponse, ResponseFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Stable digest of a normalized request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyMessage<'a> {
    role: &'static str,
    text: &'a str,
    has_image: bool,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    messages: Vec<KeyMessage<'a>>,
    model: Option<&'a str>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    response_format: Option<ResponseFormat>,
}

impl CacheKey {
    /// Digest the fields that determine a response
    pub fn for_request(request: &ModelRequest) -> Result<Self, serde_json::Error> {
        let material = KeyMaterial {
            messages: request
                .messages
                .iter()
                .map(|m| KeyMessage {
                    role: m.role.as_str(),
                    text: &m.content,
                    has_image: m.has_image(),
                })
                .collect(),
            model: request.model.as_deref(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.response_format,
        };

        let canonical = serde_json::to_vec(&material)?;
        let digest = Sha256::digest(&canonical);
        Ok(Self(format!("{:x}", digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache ceilings
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
            max_bytes: 500 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: ModelResponse,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
    size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.created_at) >= ttl
    }

    /// Lower scores are evicted first
    fn score(&self, now: Instant) -> f64 {
        let age = now.duration_since(self.created_at).as_secs_f64();
        self.access_count as f64 / (age + 1.0)
    }
}

/// Point-in-time cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl CacheState {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.bytes -= entry.size_bytes;
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    fn evict_one(&mut self, now: Instant) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.score(now)
                    .total_cmp(&b.score(now))
                    .then(a.last_accessed.cmp(&b.last_accessed))
            })
            .map(|(key, _)| key.clone());

        match victim {
            Some(key) => {
                debug!("Evicting cache entry {}", key);
                self.remove(&key);
                self.evictions += 1;
                true
            }
            None => false,
        }
    }
}

/// In-memory response cache
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry, refreshing its access statistics
    pub fn get(&self, key: &CacheKey) -> Option<ModelResponse> {
        let now = Instant::now();
        let mut state = self.state();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now, self.config.ttl) => {
                entry.last_accessed = now;
                entry.access_count += 1;
                let response = entry.response.clone();
                state.hits += 1;
                return Some(response);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.remove(key);
            state.expirations += 1;
        }
        state.misses += 1;
        None
    }

    /// Store a response, evicting as needed; returns whether it was stored
    pub fn set(&self, key: CacheKey, response: ModelResponse) -> bool {
        let size_bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                warn!("Skipping cache insert for {}: {}", key, e);
                return false;
            }
        };
        if size_bytes > self.config.max_bytes {
            warn!(
                "Skipping cache insert for {}: {} bytes exceeds ceiling of {}",
                key, size_bytes, self.config.max_bytes
            );
            return false;
        }

        let now = Instant::now();
        let mut state = self.state();
        state.remove(&key);

        let over = |state: &CacheState| {
            state.entries.len() + 1 > self.config.max_entries
                || state.bytes + size_bytes > self.config.max_bytes
        };

        if over(&*state) {
            state.purge_expired(now, self.config.ttl);
        }
        while over(&*state) {
            if !state.evict_one(now) {
                break;
            }
        }

        state.bytes += size_bytes;
        state.entries.insert(
            key,
            CacheEntry {
                response,
                created_at: now,
                last_accessed: now,
                access_count: 0,
                size_bytes,
            },
        );
        true
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.state().remove(key).is_some()
    }

    /// Drop every entry; counters are kept
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.bytes = 0;
    }

    pub fn purge_expired(&self) -> usize {
        self.state().purge_expired(Instant::now(), self.config.ttl)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            entries: state.entries.len(),
            bytes: state.bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
        }
    }

    /// Periodically purge expired entries until `shutdown` fires
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!("Cache sweep removed {} expired entries", purged);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ImageAttachment, Message, TokenUsage};

    fn response(content: &str) -> ModelResponse {
        ModelResponse::new("fake", "model", content, TokenUsage::new(1, 1))
    }

    fn key(text: &str) -> CacheKey {
        CacheKey::for_request(&ModelRequest::new(vec![Message::user(text)])).unwrap()
    }

    fn small_cache(max_entries: usize) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            max_entries,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn test_key_ignores_image_payload_but_not_presence() {
        let with_a = ModelRequest::new(vec![
            Message::user("what is this").with_image(ImageAttachment::new("image/png", "AAAA")),
        ]);
        let with_b = ModelRequest::new(vec![
            Message::user("what is this").with_image(ImageAttachment::new("image/png", "BBBB")),
        ]);
        let without = ModelRequest::new(vec![Message::user("what is this")]);

        let a = CacheKey::for_request(&with_a).unwrap();
        assert_eq!(a, CacheKey::for_request(&with_b).unwrap());
        assert_ne!(a, CacheKey::for_request(&without).unwrap());
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_key_covers_sampling_fields() {
        let base = ModelRequest::new(vec![Message::user("hi")]);
        let k = CacheKey::for_request(&base).unwrap();
        assert_ne!(k, CacheKey::for_request(&base.clone().with_temperature(0.3)).unwrap());
        assert_ne!(k, CacheKey::for_request(&base.clone().with_max_tokens(10)).unwrap());
        assert_ne!(k, CacheKey::for_request(&base.clone().with_model("m")).unwrap());
        assert_ne!(
            k,
            CacheKey::for_request(&base.clone().with_response_format(ResponseFormat::Json)).unwrap()
        );
        // Correlation ids do not change the content
        assert_eq!(k, CacheKey::for_request(&base.with_correlation_id("abc")).unwrap());
    }

    #[test]
    fn test_get_and_stats() {
        let cache = ResponseCache::default();
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.set(key("a"), response("A")));
        assert_eq!(cache.get(&key("a")).map(|r| r.content), Some("A".to_string()));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.bytes > 0);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = ResponseCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            ..CacheConfig::default()
        });
        cache.set(key("a"), response("A"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(&key("a")).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_lowest_score() {
        let cache = small_cache(3);
        cache.set(key("a"), response("A"));
        cache.set(key("b"), response("B"));
        cache.set(key("c"), response("C"));

        tokio::time::advance(Duration::from_secs(10)).await;
        // a and c are used, b never is
        cache.get(&key("a"));
        cache.get(&key("a"));
        cache.get(&key("c"));

        cache.set(key("d"), response("D"));
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());
        assert!(cache.get(&key("d")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_score_tie_evicts_least_recently_accessed() {
        let cache = small_cache(2);
        cache.set(key("a"), response("A"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set(key("b"), response("B"));

        tokio::time::advance(Duration::from_secs(1)).await;
        cache.set(key("c"), response("C"));
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.get(&key("b")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_go_before_live_ones() {
        let cache = ResponseCache::new(CacheConfig {
            ttl: Duration::from_secs(30),
            max_entries: 2,
            ..CacheConfig::default()
        });
        cache.set(key("old"), response("old"));
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.set(key("live"), response("live"));
        tokio::time::advance(Duration::from_secs(15)).await;

        cache.set(key("new"), response("new"));
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.get(&key("live")).is_some());
    }

    #[test]
    fn test_oversize_entry_is_not_cached() {
        let cache = ResponseCache::new(CacheConfig {
            max_bytes: 64,
            ..CacheConfig::default()
        });
        assert!(!cache.set(key("big"), response(&"x".repeat(200))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_byte_ceiling_triggers_eviction() {
        let probe = serde_json::to_vec(&response("A")).unwrap().len();
        let cache = ResponseCache::new(CacheConfig {
            max_bytes: probe * 2,
            ..CacheConfig::default()
        });
        cache.set(key("a"), response("A"));
        cache.set(key("b"), response("B"));
        cache.set(key("c"), response("C"));
        assert_eq!(cache.len(), 2);
        assert!(cache.stats().bytes <= probe * 2);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = ResponseCache::default();
        cache.set(key("a"), response("A"));
        cache.set(key("b"), response("B"));
        assert!(cache.invalidate(&key("a")));
        assert!(!cache.invalidate(&key("a")));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().bytes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_until_shutdown() {
        let cache = Arc::new(ResponseCache::new(CacheConfig {
            ttl: Duration::from_secs(5),
            ..CacheConfig::default()
        }));
        cache.set(key("a"), response("A"));

        let shutdown = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(10), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
