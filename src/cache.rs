//! Time-bounded cache with an injected clock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

struct Entry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// Key-value cache whose entries expire `ttl` after insertion.
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: HashMap::new(),
        }
    }

    /// Live entry for `key`; an expired entry is evicted and `None` returned.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) => now - entry.inserted_at >= self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn put(&mut self, key: K, value: V) {
        let inserted_at = self.clock.now();
        self.entries.insert(key, Entry { value, inserted_at });
    }

    pub fn invalidate(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    #[test]
    fn test_entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let mut cache: TtlCache<&str, u32> = TtlCache::new(Duration::minutes(5), clock.clone());

        cache.put("AAPL", 1);
        clock.advance(Duration::minutes(4));
        assert_eq!(cache.get(&"AAPL"), Some(&1));

        clock.advance(Duration::minutes(1));
        assert_eq!(cache.get(&"AAPL"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let mut cache = TtlCache::new(Duration::hours(1), clock);
        cache.put(("SPY", "1d"), 0.5);
        assert_eq!(cache.invalidate(&("SPY", "1d")), Some(0.5));
        assert_eq!(cache.get(&("SPY", "1d")), None);
    }
}
