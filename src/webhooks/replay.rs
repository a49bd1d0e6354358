//! Nonce replay cache.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Remembers every accepted nonce for `ttl`. Insertion is atomic per nonce,
/// so two concurrent deliveries of the same nonce cannot both be accepted.
#[derive(Debug)]
pub struct NonceCache {
    seen: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
}

impl NonceCache {
    pub fn new(ttl: Duration) -> Self {
        Self { seen: DashMap::new(), ttl }
    }

    /// Record `nonce`; false if it was already seen inside the TTL.
    pub fn insert(&self, nonce: &str, now: DateTime<Utc>) -> bool {
        match self.seen.entry(nonce.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return false;
                }
                entry.insert(now + self.ttl);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(now + self.ttl);
                true
            }
        }
    }

    /// Forget a nonce claimed by a delivery that was then turned away.
    pub fn release(&self, nonce: &str) -> bool {
        self.seen.remove(nonce).is_some()
    }

    pub fn contains(&self, nonce: &str, now: DateTime<Utc>) -> bool {
        self.seen.get(nonce).is_some_and(|expires| *expires > now)
    }

    /// Drop expired nonces. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, expires| *expires > now);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_accepted_once_within_ttl() {
        let cache = NonceCache::new(Duration::minutes(10));
        let now = Utc::now();
        assert!(cache.insert("n-1", now));
        assert!(!cache.insert("n-1", now + Duration::minutes(9)));
        assert!(cache.contains("n-1", now));
        assert!(cache.insert("n-2", now));
    }

    #[test]
    fn test_released_nonce_can_be_used_again() {
        let cache = NonceCache::new(Duration::minutes(10));
        let now = Utc::now();
        assert!(cache.insert("n-1", now));
        assert!(cache.release("n-1"));
        assert!(!cache.contains("n-1", now));
        assert!(cache.insert("n-1", now));
    }

    #[test]
    fn test_expired_nonce_is_forgotten() {
        let cache = NonceCache::new(Duration::minutes(10));
        let now = Utc::now();
        cache.insert("n-1", now);
        cache.insert("n-2", now + Duration::minutes(5));

        assert_eq!(cache.purge_expired(now + Duration::minutes(11)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.insert("n-1", now + Duration::minutes(11)));
    }
}
