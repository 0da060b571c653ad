//! Auth-failure rate limiting
//!
//! Two token-bucket maps, per source IP and per access key. A request
//! is admitted only when both buckets hold a token; every credential
//! failure consumes one from each. Idle buckets are swept periodically.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::time::{Duration, Instant};

const REFILL_PER_SEC: f64 = 5.0;
const BURST: f64 = 5.0;
const IDLE_EXPIRY: Duration = Duration::from_secs(600);

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(now: Instant) -> Self {
        Self {
            tokens: BURST,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * REFILL_PER_SEC).min(BURST);
        self.last_refill = now;
    }
}

struct BucketMap<K> {
    buckets: HashMap<K, TokenBucket>,
}

impl<K: Eq + Hash + Clone> BucketMap<K> {
    fn new() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }

    fn has_token(&mut self, key: &K, now: Instant) -> bool {
        let bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| TokenBucket::new(now));
        bucket.refill(now);
        bucket.tokens >= 1.0
    }

    fn consume(&mut self, key: &K, now: Instant) {
        let bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| TokenBucket::new(now));
        bucket.refill(now);
        bucket.tokens = (bucket.tokens - 1.0).max(0.0);
    }

    fn sweep(&mut self, now: Instant) {
        self.buckets
            .retain(|_, b| now.duration_since(b.last_refill) < IDLE_EXPIRY);
    }
}

/// Per-IP / per-access-key auth failure limiter.
pub struct AuthRateLimiter {
    per_ip: Mutex<BucketMap<IpAddr>>,
    per_key: Mutex<BucketMap<String>>,
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            per_ip: Mutex::new(BucketMap::new()),
            per_key: Mutex::new(BucketMap::new()),
        }
    }

    /// True iff both dimensions currently hold at least one token.
    pub fn allow(&self, ip: Option<IpAddr>, access_key: Option<&str>, now: Instant) -> bool {
        let ip_ok = ip.is_none_or(|ip| self.per_ip.lock().has_token(&ip, now));
        let key_ok = access_key
            .is_none_or(|key| self.per_key.lock().has_token(&key.to_string(), now));
        ip_ok && key_ok
    }

    /// Consume a token from each dimension. Invoked on every
    /// AccessDenied / SignatureDoesNotMatch response.
    pub fn observe_failure(&self, ip: Option<IpAddr>, access_key: Option<&str>, now: Instant) {
        if let Some(ip) = ip {
            self.per_ip.lock().consume(&ip, now);
        }
        if let Some(key) = access_key {
            self.per_key.lock().consume(&key.to_string(), now);
        }
    }

    /// Drop buckets idle longer than ten minutes.
    pub fn cleanup(&self, now: Instant) {
        self.per_ip.lock().sweep(now);
        self.per_key.lock().sweep(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "192.0.2.7".parse().unwrap()
    }

    #[test]
    fn test_burst_then_deny() {
        let limiter = AuthRateLimiter::new();
        let t0 = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow(Some(ip()), Some("AK"), t0));
            limiter.observe_failure(Some(ip()), Some("AK"), t0);
        }
        assert!(!limiter.allow(Some(ip()), Some("AK"), t0));
    }

    #[test]
    fn test_refill_restores_tokens() {
        let limiter = AuthRateLimiter::new();
        let t0 = Instant::now();
        for _ in 0..5 {
            limiter.observe_failure(Some(ip()), Some("AK"), t0);
        }
        assert!(!limiter.allow(Some(ip()), Some("AK"), t0));
        // 5 tokens/sec: one token back after 200ms
        assert!(limiter.allow(Some(ip()), Some("AK"), t0 + Duration::from_millis(250)));
    }

    #[test]
    fn test_dimensions_are_independent() {
        let limiter = AuthRateLimiter::new();
        let t0 = Instant::now();
        for _ in 0..5 {
            limiter.observe_failure(Some(ip()), Some("AK"), t0);
        }
        // Different key, same IP: the IP bucket is drained
        assert!(!limiter.allow(Some(ip()), Some("OTHER"), t0));
        // Different IP, same key: the key bucket is drained
        let other: IpAddr = "198.51.100.1".parse().unwrap();
        assert!(!limiter.allow(Some(other), Some("AK"), t0));
        // Both fresh
        assert!(limiter.allow(Some(other), Some("OTHER"), t0));
    }

    #[test]
    fn test_cleanup_drops_idle() {
        let limiter = AuthRateLimiter::new();
        let t0 = Instant::now();
        limiter.observe_failure(Some(ip()), Some("AK"), t0);
        limiter.cleanup(t0 + Duration::from_secs(601));
        // Fresh bucket again after the sweep
        assert!(limiter.allow(Some(ip()), Some("AK"), t0 + Duration::from_secs(601)));
    }
}
