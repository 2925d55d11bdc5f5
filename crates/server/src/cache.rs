//! The per-IRI request cache.
//!
//! Maps a request fingerprint (method + IRI + canonicalized query + caller
//! identity) to the serialized response. Any write affecting an IRI
//! invalidates every entry whose fingerprint IRI equals or is prefixed by
//! the mutated IRI. Process-local, bounded, LRU-evicted.

use lru::LruCache;
use parking_lot::Mutex;
use postbox_core::Iri;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Bounded capacity; eviction is LRU.
const CACHE_CAPACITY: usize = 4096;

/// A request fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: String,
    pub iri: String,
    pub query: String,
    pub caller: String,
}

impl CacheKey {
    pub fn get(iri: &Iri, query: &str, caller: &str) -> Self {
        let mut query: Vec<&str> = query.split('&').filter(|s| !s.is_empty()).collect();
        query.sort_unstable();
        CacheKey {
            method: "GET".to_string(),
            iri: iri.to_string(),
            query: query.join("&"),
            caller: caller.to_string(),
        }
    }
}

/// A cached serialized response.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub content_type: String,
    pub status: u16,
    pub body: Vec<u8>,
}

/// The cache itself. The read path takes the lock only long enough to
/// clone the entry; the write path is single-writer by construction.
pub struct RequestCache {
    entries: Mutex<LruCache<CacheKey, CachedResponse>>,
    enabled: AtomicBool,
}

impl RequestCache {
    pub fn new(enabled: bool) -> Self {
        RequestCache {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Flip the cache on or off; turning it off drops all entries.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.clear();
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        if !self.is_enabled() {
            return None;
        }
        self.entries.lock().get(key).cloned()
    }

    pub fn put(&self, key: CacheKey, response: CachedResponse) {
        if !self.is_enabled() {
            return;
        }
        self.entries.lock().put(key, response);
    }

    /// Drop every entry whose IRI equals or is prefixed by the mutated IRI.
    pub fn invalidate(&self, iri: &Iri) {
        if !self.is_enabled() {
            return;
        }
        let prefix = format!("{}/", iri.as_str().trim_end_matches('/'));
        let mut entries = self.entries.lock();
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.iri == iri.as_str() || key.iri.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    /// Drop everything, e.g. on configuration reload.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &str) -> CachedResponse {
        CachedResponse {
            content_type: "application/activity+json".to_string(),
            status: 200,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn hit_and_miss() {
        let cache = RequestCache::new(true);
        let key = CacheKey::get(&Iri::new("https://postbox.test/objects/1"), "", "anon");
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), response("{}"));
        assert_eq!(cache.get(&key).unwrap().body, b"{}");
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache = RequestCache::new(false);
        let key = CacheKey::get(&Iri::new("https://postbox.test/objects/1"), "", "anon");
        cache.put(key.clone(), response("{}"));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn query_is_canonicalized() {
        let a = CacheKey::get(&Iri::new("https://postbox.test/x"), "b=2&a=1", "anon");
        let b = CacheKey::get(&Iri::new("https://postbox.test/x"), "a=1&b=2", "anon");
        assert_eq!(a, b);
    }

    #[test]
    fn invalidation_covers_prefixes() {
        let cache = RequestCache::new(true);
        let actor = CacheKey::get(&Iri::new("https://postbox.test/actors/alice"), "", "anon");
        let inbox = CacheKey::get(&Iri::new("https://postbox.test/actors/alice/inbox"), "", "anon");
        let other = CacheKey::get(&Iri::new("https://postbox.test/actors/bob"), "", "anon");
        cache.put(actor.clone(), response("a"));
        cache.put(inbox.clone(), response("b"));
        cache.put(other.clone(), response("c"));

        cache.invalidate(&Iri::new("https://postbox.test/actors/alice"));
        assert!(cache.get(&actor).is_none());
        assert!(cache.get(&inbox).is_none());
        assert!(cache.get(&other).is_some());
    }

    #[test]
    fn caller_identity_partitions_entries() {
        let cache = RequestCache::new(true);
        let anon = CacheKey::get(&Iri::new("https://postbox.test/x"), "", "anon");
        let alice = CacheKey::get(&Iri::new("https://postbox.test/x"), "", "alice");
        cache.put(anon, response("public"));
        assert!(cache.get(&alice).is_none());
    }
}
