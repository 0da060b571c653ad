//! Request metrics
//!
//! Counts every request exit by operation and HTTP status class, with
//! bounded per-bucket and per-key dimensions. Label maps are capped and
//! never evicted: once full, new label values fold into an overflow
//! slot so cardinality cannot grow without bound.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const MAX_BUCKET_LABELS: usize = 100;
const MAX_KEY_LABELS: usize = 1000;

/// One `operation x status-class` counter cell.
#[derive(Default)]
struct OpCounters {
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
}

impl OpCounters {
    fn record(&self, status: u16) {
        let cell = match status {
            200..=299 => &self.status_2xx,
            300..=399 => &self.status_3xx,
            400..=499 => &self.status_4xx,
            _ => &self.status_5xx,
        };
        cell.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status_2xx: self.status_2xx.load(Ordering::Relaxed),
            status_3xx: self.status_3xx.load(Ordering::Relaxed),
            status_4xx: self.status_4xx.load(Ordering::Relaxed),
            status_5xx: self.status_5xx.load(Ordering::Relaxed),
        }
    }
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    #[serde(rename = "2xx")]
    pub status_2xx: u64,
    #[serde(rename = "3xx")]
    pub status_3xx: u64,
    #[serde(rename = "4xx")]
    pub status_4xx: u64,
    #[serde(rename = "5xx")]
    pub status_5xx: u64,
}

/// Full metrics snapshot, served as JSON at `/v1/meta/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests_total: u64,
    pub replay_detected: u64,
    pub by_operation: HashMap<String, StatusSnapshot>,
    pub by_bucket: HashMap<String, u64>,
    pub by_bucket_key: HashMap<String, u64>,
}

/// Process-wide request metrics recorder.
pub struct MetricsRecorder {
    started: Instant,
    requests_total: AtomicU64,
    replay_detected: AtomicU64,
    by_operation: RwLock<HashMap<&'static str, OpCounters>>,
    by_bucket: RwLock<HashMap<String, AtomicU64>>,
    by_bucket_key: RwLock<HashMap<String, AtomicU64>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests_total: AtomicU64::new(0),
            replay_detected: AtomicU64::new(0),
            by_operation: RwLock::new(HashMap::new()),
            by_bucket: RwLock::new(HashMap::new()),
            by_bucket_key: RwLock::new(HashMap::new()),
        }
    }

    /// Record one request exit.
    pub fn record(&self, op: &'static str, status: u16, bucket: Option<&str>, key: Option<&str>) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        {
            let ops = self.by_operation.read();
            if let Some(counters) = ops.get(op) {
                counters.record(status);
            } else {
                drop(ops);
                self.by_operation
                    .write()
                    .entry(op)
                    .or_default()
                    .record(status);
            }
        }

        if let Some(bucket) = bucket {
            Self::bump_label(&self.by_bucket, bucket, MAX_BUCKET_LABELS);
            if let Some(key) = key {
                Self::bump_label(
                    &self.by_bucket_key,
                    &format!("{bucket}/{key}"),
                    MAX_KEY_LABELS,
                );
            }
        }
    }

    /// Count a suppressed replay.
    pub fn replay_detected(&self) {
        self.replay_detected.fetch_add(1, Ordering::Relaxed);
    }

    fn bump_label(map: &RwLock<HashMap<String, AtomicU64>>, label: &str, cap: usize) {
        {
            let read = map.read();
            if let Some(cell) = read.get(label) {
                cell.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut write = map.write();
        if write.len() >= cap {
            // Cap reached: no eviction, fold into the overflow slot
            write
                .entry("_other".to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        write
            .entry(label.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot for `/v1/meta/stats`.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let by_operation = self
            .by_operation
            .read()
            .iter()
            .map(|(op, counters)| ((*op).to_string(), counters.snapshot()))
            .collect();
        let by_bucket = self
            .by_bucket
            .read()
            .iter()
            .map(|(label, cell)| (label.clone(), cell.load(Ordering::Relaxed)))
            .collect();
        let by_bucket_key = self
            .by_bucket_key
            .read()
            .iter()
            .map(|(label, cell)| (label.clone(), cell.load(Ordering::Relaxed)))
            .collect();
        MetricsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            replay_detected: self.replay_detected.load(Ordering::Relaxed),
            by_operation,
            by_bucket,
            by_bucket_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = MetricsRecorder::new();
        metrics.record("put", 200, Some("b"), Some("k"));
        metrics.record("put", 503, Some("b"), Some("k"));
        metrics.record("get", 404, Some("b"), None);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 3);
        assert_eq!(snap.by_operation["put"].status_2xx, 1);
        assert_eq!(snap.by_operation["put"].status_5xx, 1);
        assert_eq!(snap.by_operation["get"].status_4xx, 1);
        assert_eq!(snap.by_bucket["b"], 3);
        assert_eq!(snap.by_bucket_key["b/k"], 2);
    }

    #[test]
    fn test_bucket_dimension_caps_without_eviction() {
        let metrics = MetricsRecorder::new();
        for i in 0..150 {
            metrics.record("put", 200, Some(&format!("bucket-{i}")), None);
        }
        let snap = metrics.snapshot();
        // 100 real labels plus the overflow slot
        assert_eq!(snap.by_bucket.len(), MAX_BUCKET_LABELS + 1);
        assert_eq!(snap.by_bucket["_other"], 50);
        // Early labels were never evicted
        assert_eq!(snap.by_bucket["bucket-0"], 1);
    }

    #[test]
    fn test_replay_counter() {
        let metrics = MetricsRecorder::new();
        metrics.replay_detected();
        metrics.replay_detected();
        assert_eq!(metrics.snapshot().replay_detected, 2);
    }
}
