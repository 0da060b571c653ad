//! Replay suppression cache
//!
//! A bounded TTL set of request fingerprints. An exact resubmission of
//! a signed request within the TTL is refused; absent fingerprints are
//! always admitted.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Fingerprint for a header-signed request.
#[must_use]
pub fn header_fingerprint(authorization: &str, amz_date: &str, method: &str, path: &str) -> String {
    format!("h:{authorization}|{amz_date}|{method}|{path}")
}

/// Fingerprint for a presigned request.
#[must_use]
pub fn presigned_fingerprint(signature: &str, method: &str, path: &str, raw_query: &str) -> String {
    format!("q:{signature}|{method}|{path}|{raw_query}")
}

struct ReplayInner {
    seen: HashMap<String, Instant>,
    /// Insertion order, for TTL and LRU eviction from the front
    order: VecDeque<(String, Instant)>,
}

/// Bounded TTL fingerprint cache.
pub struct ReplayCache {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<ReplayInner>,
}

impl ReplayCache {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            inner: Mutex::new(ReplayInner {
                seen: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Admit or refuse a fingerprint at time `now`. Expired entries are
    /// evicted from the front first; a hit within TTL refuses.
    pub fn allow(&self, fingerprint: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock();

        while let Some((key, first_seen)) = inner.order.front() {
            let expired = now.duration_since(*first_seen) > self.ttl;
            let over_capacity = inner.order.len() > self.max_entries;
            if !expired && !over_capacity {
                break;
            }
            let key = key.clone();
            let first_seen = *first_seen;
            inner.order.pop_front();
            // Only drop the map entry if it still belongs to this
            // queue slot (the key may have been re-admitted later).
            if inner.seen.get(&key) == Some(&first_seen) {
                inner.seen.remove(&key);
            }
        }

        if let Some(first_seen) = inner.seen.get(fingerprint)
            && now.duration_since(*first_seen) <= self.ttl
        {
            return false;
        }

        inner.seen.insert(fingerprint.to_string(), now);
        inner.order.push_back((fingerprint.to_string(), now));
        true
    }

    /// Current number of tracked fingerprints.
    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
