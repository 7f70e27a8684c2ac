//! Snippet cache + coalescer (§4.F): a TTL'd, signature-checked cache with
//! LRU-batch eviction and leader/follower coalescing for concurrent builds
//! of the same key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::types::{FileSig, Snippet};

/// `(file_rel, line_start, line_end, query)` — the unit a built snippet is
/// keyed by.
pub type CacheKey = (String, usize, usize, String);

struct Entry {
    stored_at_ms: u64,
    sig: FileSig,
    value: Snippet,
    last_touched: Instant,
}

/// Shared, cheap-clone cache handle.
#[derive(Clone)]
pub struct SnippetCache {
    inner: Arc<Inner>,
}

struct Inner {
    ttl: Duration,
    max_entries: usize,
    coalesce_wait: Duration,
    entries: Mutex<HashMap<CacheKey, Entry>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<Notify>>>,
    start: Instant,
}

impl SnippetCache {
    pub fn new(ttl: Duration, max_entries: usize, coalesce_wait_ms: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                max_entries,
                coalesce_wait: Duration::from_millis(coalesce_wait_ms),
                entries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                start: Instant::now(),
            }),
        }
    }

    fn now_ms(&self) -> u64 {
        self.inner.start.elapsed().as_millis() as u64
    }

    /// Fresh read: present, within TTL (TTL 0 disables caching entirely),
    /// and the file's current signature matches the one recorded at store
    /// time.
    pub fn get(&self, key: &CacheKey, current_sig: FileSig) -> Option<Snippet> {
        if self.inner.ttl.is_zero() {
            return None;
        }
        let mut entries = self.inner.entries.lock().unwrap();
        let entry = entries.get_mut(key)?;
        let age = self.now_ms().saturating_sub(entry.stored_at_ms);
        if age > self.inner.ttl.as_millis() as u64 || entry.sig != current_sig {
            return None;
        }
        entry.last_touched = Instant::now();
        Some(entry.value.clone())
    }

    pub fn put(&self, key: CacheKey, sig: FileSig, value: Snippet) {
        if self.inner.ttl.is_zero() {
            return;
        }
        let mut entries = self.inner.entries.lock().unwrap();
        if entries.len() >= self.inner.max_entries {
            evict_oldest_batch(&mut entries, self.inner.max_entries / 16);
        }
        entries.insert(
            key,
            Entry { stored_at_ms: self.now_ms(), sig, value, last_touched: Instant::now() },
        );
    }

    /// Drop every cached entry whose file path starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut entries = self.inner.entries.lock().unwrap();
        entries.retain(|(file_rel, ..), _| !file_rel.starts_with(prefix));
    }

    pub fn clear(&self) {
        self.inner.entries.lock().unwrap().clear();
    }

    /// Coalesced build: the first caller for `key` becomes the leader and
    /// runs `build`; concurrent followers wait on a `Notify` up to
    /// `coalesce_wait_ms`, then re-check the cache; if still absent they
    /// compute independently (without re-entering coalescing, avoiding
    /// leader starvation under pathological contention).
    pub async fn get_or_build<F>(&self, key: CacheKey, current_sig: FileSig, build: F) -> Snippet
    where
        F: FnOnce() -> Snippet,
    {
        if let Some(hit) = self.get(&key, current_sig) {
            return hit;
        }

        let notify = {
            let mut in_flight = self.inner.in_flight.lock().unwrap();
            if let Some(existing) = in_flight.get(&key) {
                Some(existing.clone())
            } else {
                in_flight.insert(key.clone(), Arc::new(Notify::new()));
                None
            }
        };

        if let Some(notify) = notify {
            let _ = tokio::time::timeout(self.inner.coalesce_wait, notify.notified()).await;
            if let Some(hit) = self.get(&key, current_sig) {
                return hit;
            }
            let value = build();
            self.put(key, current_sig, value.clone());
            return value;
        }

        let value = build();
        self.put(key.clone(), current_sig, value.clone());
        let mut in_flight = self.inner.in_flight.lock().unwrap();
        if let Some(n) = in_flight.remove(&key) {
            n.notify_waiters();
        }
        value
    }
}

fn evict_oldest_batch(entries: &mut HashMap<CacheKey, Entry>, batch: usize) {
    let batch = batch.max(1);
    let mut keys: Vec<CacheKey> = entries.keys().cloned().collect();
    keys.sort_by_key(|k| entries[k].last_touched);
    for k in keys.into_iter().take(batch) {
        entries.remove(&k);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snip() -> Snippet {
        Snippet { header: "h".into(), code_block: "c".into(), line_start: 1, line_end: 2, is_full_scope: false }
    }

    #[test]
    fn stale_signature_misses_cache() {
        let cache = SnippetCache::new(Duration::from_secs(10), 100, 50);
        let key = ("a.py".to_string(), 1, 2, "q".to_string());
        let sig = FileSig { mtime_ms: 1, size: 10 };
        cache.put(key.clone(), sig, snip());
        assert!(cache.get(&key, sig).is_some());
        let changed = FileSig { mtime_ms: 2, size: 10 };
        assert!(cache.get(&key, changed).is_none());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = SnippetCache::new(Duration::ZERO, 100, 50);
        let key = ("a.py".to_string(), 1, 2, "q".to_string());
        let sig = FileSig { mtime_ms: 1, size: 10 };
        cache.put(key.clone(), sig, snip());
        assert!(cache.get(&key, sig).is_none());
    }

    #[test]
    fn eviction_keeps_size_bounded() {
        let cache = SnippetCache::new(Duration::from_secs(10), 4, 50);
        for i in 0..10 {
            let key = (format!("f{i}.py"), 1, 2, "q".to_string());
            cache.put(key, FileSig { mtime_ms: i, size: 1 }, snip());
        }
        assert!(cache.inner.entries.lock().unwrap().len() <= 4);
    }

    #[tokio::test]
    async fn get_or_build_coalesces_concurrent_builds() {
        let cache = SnippetCache::new(Duration::from_secs(10), 100, 200);
        let key = ("a.py".to_string(), 1, 2, "q".to_string());
        let sig = FileSig { mtime_ms: 1, size: 10 };
        let v = cache.get_or_build(key.clone(), sig, snip).await;
        assert_eq!(v.header, "h");
    }
}
