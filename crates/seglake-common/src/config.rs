//! Configuration types for Seglake
//!
//! The gateway binary deserializes this from a TOML file and overlays
//! CLI flags; every limit the request plane enforces lives here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Authentication configuration
    pub auth: AuthSection,
    /// Request-plane limits
    pub limits: LimitsSection,
    /// Replay-suppression cache
    pub replay: ReplaySection,
    /// Maintenance-mode loop
    pub maintenance: MaintenanceSection,
    /// Addressing style
    #[serde(default)]
    pub virtual_hosted: bool,
}

/// Authentication configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthSection {
    /// Static root credentials
    pub root_access_key: String,
    pub root_secret_key: String,
    /// Region required in credential scopes (exact match after
    /// normalization); empty accepts any region.
    pub region: String,
    /// Maximum clock skew for header-form SigV4, seconds
    pub max_clock_skew_secs: u64,
    /// Accept `UNSIGNED-PAYLOAD` on signed requests
    pub allow_unsigned_payload: bool,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            root_access_key: "seglake".to_string(),
            root_secret_key: String::new(),
            region: "us-east-1".to_string(),
            max_clock_skew_secs: 300,
            allow_unsigned_payload: true,
        }
    }
}

impl AuthSection {
    #[must_use]
    pub const fn max_clock_skew(&self) -> Duration {
        Duration::from_secs(self.max_clock_skew_secs)
    }
}

/// Request-plane limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsSection {
    /// Reject request URLs longer than this (0 = unlimited)
    pub max_url_length: usize,
    /// Reject object bodies larger than this (0 = unlimited)
    pub max_object_size: u64,
    /// Concurrent write-plane requests before 503 SlowDown
    pub max_in_flight_writes: usize,
    /// Concurrent multipart-complete assemblies before 503 SlowDown
    pub mpu_complete_concurrency: usize,
    /// Buckets that require `If-Match` on overwriting PUTs
    #[serde(default)]
    pub require_if_match_buckets: Vec<String>,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_url_length: 8 * 1024,
            max_object_size: 0,
            max_in_flight_writes: 256,
            mpu_complete_concurrency: 4,
            require_if_match_buckets: Vec::new(),
        }
    }
}

/// Replay-suppression cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplaySection {
    /// How long a fingerprint blocks resubmission, seconds
    pub ttl_secs: u64,
    /// Cache capacity before LRU eviction
    pub max_entries: usize,
    /// Reject replays with 403 rather than only counting them
    pub hard_block: bool,
}

impl Default for ReplaySection {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 10_000,
            hard_block: false,
        }
    }
}

impl ReplaySection {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Maintenance-mode loop configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaintenanceSection {
    /// Poll interval of the background state-machine loop, seconds
    pub poll_secs: u64,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self { poll_secs: 2 }
    }
}

impl MaintenanceSection {
    #[must_use]
    pub const fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.auth.max_clock_skew_secs, 300);
        assert_eq!(cfg.replay.max_entries, 10_000);
        assert!(!cfg.virtual_hosted);
    }

    #[test]
    fn test_roundtrip_json() {
        let cfg = GatewayConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.limits.max_in_flight_writes, cfg.limits.max_in_flight_writes);
    }
}
