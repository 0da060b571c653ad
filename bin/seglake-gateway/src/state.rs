//! Shared gateway state

use crate::metrics::MetricsRecorder;
use async_trait::async_trait;
use seglake_auth::sigv4::{AuthConfig, SecretEntry, SecretLookup, SigV4Verifier};
use seglake_auth::{AuthError, AuthRateLimiter, ReplayCache};
use seglake_common::{ApiError, GatewayConfig, HlcClock};
use seglake_engine::{EngineError, StorageEngine};
use seglake_meta::{MetaError, MetaStore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Process-wide state shared across requests.
pub struct Gateway {
    pub config: GatewayConfig,
    pub clock: Arc<HlcClock>,
    pub engine: Arc<dyn StorageEngine>,
    pub meta: Arc<dyn MetaStore>,
    pub verifier: SigV4Verifier,
    pub replay: ReplayCache,
    pub failure_limiter: AuthRateLimiter,
    /// Write-plane concurrency cap
    pub write_permits: Arc<Semaphore>,
    /// Multipart-complete concurrency cap
    pub mpu_complete_permits: Arc<Semaphore>,
    pub metrics: MetricsRecorder,
    /// First 8 bytes of SHA-256 of the hostname, hex
    pub host_id: String,
    pub region: String,
    max_write_permits: usize,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        clock: Arc<HlcClock>,
        engine: Arc<dyn StorageEngine>,
        meta: Arc<dyn MetaStore>,
    ) -> Arc<Self> {
        let auth_config = AuthConfig {
            region: (!config.auth.region.is_empty()).then(|| config.auth.region.clone()),
            max_clock_skew: config.auth.max_clock_skew(),
            allow_unsigned_payload: config.auth.allow_unsigned_payload,
        };
        let lookup = Arc::new(MetaSecretLookup {
            meta: meta.clone(),
            root_access_key: config.auth.root_access_key.clone(),
            root_secret_key: config.auth.root_secret_key.clone(),
        });
        let verifier = SigV4Verifier::new(auth_config, lookup);
        let max_write_permits = config.limits.max_in_flight_writes;
        let region = if config.auth.region.is_empty() {
            "us-east-1".to_string()
        } else {
            config.auth.region.clone()
        };
        Arc::new(Self {
            replay: ReplayCache::new(config.replay.ttl(), config.replay.max_entries),
            failure_limiter: AuthRateLimiter::new(),
            write_permits: Arc::new(Semaphore::new(max_write_permits)),
            mpu_complete_permits: Arc::new(Semaphore::new(config.limits.mpu_complete_concurrency)),
            metrics: MetricsRecorder::new(),
            host_id: host_id(),
            region,
            verifier,
            config,
            clock,
            engine,
            meta,
            max_write_permits,
        })
    }

    /// Writes currently executing, for the maintenance quiesce check.
    pub fn in_flight_writes(&self) -> usize {
        self.max_write_permits - self.write_permits.available_permits()
    }
}

fn host_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "seglake".to_string());
    hex::encode(&Sha256::digest(hostname.as_bytes())[..8])
}

/// Secret resolution over the API-key table, with the static root
/// credentials checked first.
struct MetaSecretLookup {
    meta: Arc<dyn MetaStore>,
    root_access_key: String,
    root_secret_key: String,
}

#[async_trait]
impl SecretLookup for MetaSecretLookup {
    async fn secret_for(&self, access_key: &str) -> Result<Option<SecretEntry>, AuthError> {
        if !self.root_secret_key.is_empty() && access_key == self.root_access_key {
            return Ok(Some(SecretEntry {
                secret: self.root_secret_key.clone(),
                enabled: true,
            }));
        }
        let record = self
            .meta
            .lookup_api_secret(access_key)
            .await
            .map_err(|e| AuthError::Lookup(e.to_string()))?;
        Ok(record.map(|r| SecretEntry {
            secret: r.secret_key,
            enabled: r.enabled,
        }))
    }
}

/// Map an authentication failure onto the error taxonomy.
#[must_use]
pub fn map_auth_error(err: &AuthError) -> ApiError {
    match err {
        AuthError::UnknownAccessKey(_) | AuthError::DisabledAccessKey(_) | AuthError::MissingAuth => {
            ApiError::AccessDenied
        }
        AuthError::RequestTimeTooSkewed => ApiError::RequestTimeTooSkewed,
        AuthError::Lookup(msg) => ApiError::Internal(msg.clone()),
        _ => ApiError::SignatureDoesNotMatch,
    }
}

/// Map a metadata failure onto the error taxonomy.
#[must_use]
pub fn map_meta_error(err: MetaError) -> ApiError {
    match err {
        MetaError::BucketNotFound(b) => ApiError::NoSuchBucket(b),
        MetaError::BucketExists(b) => ApiError::BucketAlreadyExists(b),
        MetaError::BucketNotEmpty(b) => ApiError::BucketNotEmpty(b),
        MetaError::ObjectNotFound { key, .. } => ApiError::NoSuchKey(key),
        MetaError::UploadNotFound(u) => ApiError::NoSuchUpload(u),
        MetaError::Internal(msg) => ApiError::Internal(msg),
    }
}

/// Map an engine failure onto the error taxonomy, digging body-wrapper
/// errors out of I/O error chains.
#[must_use]
pub fn map_engine_error(err: EngineError) -> ApiError {
    match err {
        EngineError::VersionNotFound(v) => ApiError::NoSuchKey(v),
        EngineError::RangeOutOfBounds { .. } => ApiError::InvalidRange,
        EngineError::Io(io) => crate::body::map_body_io_error(io),
        EngineError::CommitFailed(msg) | EngineError::Internal(msg) => ApiError::Internal(msg),
        EngineError::SegmentNotFound(id) => ApiError::Internal(format!("segment {id} missing")),
    }
}
