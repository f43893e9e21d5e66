use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

/// Generate a unique request ID
pub fn generate_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    format!("{:x}-{:x}", timestamp, counter)
}

/// Wall-clock milliseconds since the epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Concurrent cache with time-based eviction and a size cap.
///
/// Backs the filter chain cache, the rate limiter cache and the circuit
/// breaker cache. Entries expire `ttl` after insertion; expired entries are
/// dropped on access and swept when the cap is reached.
pub struct TtlCache<V> {
    entries: DashMap<String, TtlEntry<V>>,
    ttl: Duration,
    max_entries: usize,
}

struct TtlEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
        }
    }

    /// Get the live entry for `key`, or insert the value produced by `init`.
    pub fn get_with(&self, key: &str, init: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(key) {
            return value;
        }

        if self.entries.len() >= self.max_entries {
            self.sweep_expired();
            // Still full after the sweep: drop the oldest entry.
            if self.entries.len() >= self.max_entries {
                if let Some(oldest) = self
                    .entries
                    .iter()
                    .min_by_key(|e| e.value().inserted_at)
                    .map(|e| e.key().clone())
                {
                    tracing::debug!("TtlCache full, evicting oldest entry: {}", oldest);
                    self.entries.remove(&oldest);
                }
            }
        }

        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| TtlEntry {
                value: init(),
                inserted_at: Instant::now(),
            });
        entry.value.clone()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
        }
        // Expired (or absent): make sure a stale entry does not linger.
        self.entries
            .remove_if(key, |_, e| e.inserted_at.elapsed() >= self.ttl);
        None
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visit every live entry
    pub fn for_each(&self, mut f: impl FnMut(&str, &V)) {
        for entry in self.entries.iter() {
            if entry.value().inserted_at.elapsed() < self.ttl {
                f(entry.key(), &entry.value().value);
            }
        }
    }

    fn sweep_expired(&self) {
        self.entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
    }
}
