use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use http::uri::Authority;

/// A cached per-host upstream target, keyed by host. Caching the parsed
/// `Authority` (and the raw target string it was built from) avoids
/// re-parsing the target URL on every request; the entry is replaced
/// whenever the route table's target for that host changes.
#[derive(Clone)]
struct CachedProxy {
    target: String,
    authority: Authority,
    used_at: u64,
}

/// Process-wide monotonically increasing usage-tick source, read/written
/// without a mutex (§5).
static TICK: AtomicU64 = AtomicU64::new(0);

fn next_tick() -> u64 {
    TICK.fetch_add(1, Ordering::Relaxed) + 1
}

/// LRU cache of per-host reverse-proxy entries. `cap <= 0` disables
/// eviction entirely.
pub struct ProxyCache {
    entries: DashMap<String, CachedProxy>,
    cap: usize,
}

impl ProxyCache {
    pub fn new(cap: usize) -> Self {
        Self { entries: DashMap::new(), cap }
    }

    /// Returns the cached authority for `host` if it still matches
    /// `target`; otherwise builds, stores, and returns a fresh one,
    /// evicting the least-recently-used entry if the cache is at
    /// capacity.
    pub fn get_or_build(&self, host: &str, target: &str) -> Result<Authority, http::uri::InvalidUri> {
        if let Some(mut entry) = self.entries.get_mut(host) {
            if entry.target == target {
                entry.used_at = next_tick();
                return Ok(entry.authority.clone());
            }
        }

        let authority: Authority = authority_of(target)?;
        self.entries.insert(
            host.to_string(),
            CachedProxy { target: target.to_string(), authority: authority.clone(), used_at: next_tick() },
        );
        self.evict_if_over_capacity();
        Ok(authority)
    }

    /// Removes the cached entry for `host`, if any.
    pub fn drop_host(&self, host: &str) {
        self.entries.remove(host);
    }

    fn evict_if_over_capacity(&self) {
        if self.cap == 0 {
            return;
        }
        while self.entries.len() > self.cap {
            let lru_key = self
                .entries
                .iter()
                .min_by_key(|entry| entry.used_at)
                .map(|entry| entry.key().clone());

            match lru_key {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, host: &str) -> bool {
        self.entries.contains_key(host)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn authority_of(target: &str) -> Result<Authority, http::uri::InvalidUri> {
    let uri: http::Uri = target.parse()?;
    match uri.authority() {
        Some(authority) => Ok(authority.clone()),
        // No authority in the target URL: fail the same way an invalid
        // URI would, since callers only care that parsing failed.
        None => "".parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_evicts_the_least_recently_used_entry() {
        let cache = ProxyCache::new(2);
        cache.get_or_build("a", "http://10.0.0.1:4200").unwrap();
        cache.get_or_build("b", "http://10.0.0.2:4200").unwrap();
        cache.get_or_build("a", "http://10.0.0.1:4200").unwrap(); // touch a
        cache.get_or_build("c", "http://10.0.0.3:4200").unwrap(); // evicts b

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn target_mismatch_rebuilds_entry() {
        let cache = ProxyCache::new(8);
        let first = cache.get_or_build("a", "http://10.0.0.1:4200").unwrap();
        let second = cache.get_or_build("a", "http://10.0.0.2:4200").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn cap_zero_disables_eviction() {
        let cache = ProxyCache::new(0);
        for i in 0..10 {
            cache.get_or_build(&format!("host{i}"), "http://10.0.0.1:4200").unwrap();
        }
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn drop_host_removes_entry() {
        let cache = ProxyCache::new(8);
        cache.get_or_build("a", "http://10.0.0.1:4200").unwrap();
        cache.drop_host("a");
        assert!(!cache.contains("a"));
    }
}
