use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};

use super::validate::CandidateRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: String,
    pub page: usize,
}

impl CacheKey {
    pub fn new(query: impl Into<String>, page: usize) -> Self {
        Self {
            query: query.into(),
            page,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub results: Vec<CandidateRecord>,
    pub created_at: DateTime<Utc>,
}

/// Process-lifetime search cache. Entries older than the TTL read as misses
/// and are overwritten by the next `put`.
pub struct SearchCache {
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl fmt::Debug for SearchCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500)),
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at < self.ttl
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<CandidateRecord>> {
        let now = self.clock.now();
        self.entries()
            .get(key)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.results.clone())
    }

    pub fn put(&self, key: CacheKey, results: Vec<CandidateRecord>) {
        let entry = CacheEntry {
            results,
            created_at: self.clock.now(),
        };
        self.entries().insert(key, entry);
    }

    /// Drops stale entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| now - entry.created_at < self.ttl);
        before - entries.len()
    }

    pub fn expire(&self, key: &CacheKey) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn record(id: &str) -> CandidateRecord {
        CandidateRecord {
            id: id.into(),
            title: "t".into(),
            url: format!("https://youtu.be/{id}"),
            thumbnail_url: "https://i.ytimg.com/x.jpg".into(),
            channel: "c".into(),
        }
    }

    #[test]
    fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let cache = SearchCache::with_clock(Duration::from_secs(300), clock.clone());
        let key = CacheKey::new("lofi", 1);
        cache.put(key.clone(), vec![record("aaaaaaaaaaa")]);

        clock.advance(chrono::Duration::seconds(299));
        assert_eq!(cache.get(&key).map(|r| r.len()), Some(1));

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn pages_are_cached_separately() {
        let cache = SearchCache::new(Duration::from_secs(300));
        cache.put(CacheKey::new("lofi", 1), vec![record("aaaaaaaaaaa")]);
        assert!(cache.get(&CacheKey::new("lofi", 2)).is_none());
        assert!(cache.expire(&CacheKey::new("lofi", 1)));
        assert!(cache.get(&CacheKey::new("lofi", 1)).is_none());
    }
}
