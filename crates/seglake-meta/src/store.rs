//! Metadata store capability surface
//!
//! The request plane only ever talks to this trait. Compound `commit_*`
//! operations are transactional: the row mutation and its oplog entry
//! land together or not at all.

use crate::types::{
    ApiKeyRecord, BucketRecord, MaintenanceState, MutationOutcome, OplogEntry, PartRecord,
    UploadRecord, VersionRecord,
};
use async_trait::async_trait;
use seglake_common::VersioningState;
use thiserror::Error;

/// Metadata store errors
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("bucket already exists: {0}")]
    BucketExists(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("upload not found: {0}")]
    UploadNotFound(String),

    #[error("internal meta error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MetaError>;

/// The metadata capability surface consumed by the gateway.
#[async_trait]
pub trait MetaStore: Send + Sync {
    // Buckets
    async fn create_bucket(&self, name: &str, versioning: VersioningState) -> Result<()>;
    async fn delete_bucket(&self, name: &str) -> Result<()>;
    async fn get_bucket(&self, name: &str) -> Result<BucketRecord>;
    async fn list_buckets(&self) -> Result<Vec<BucketRecord>>;
    async fn get_bucket_versioning(&self, name: &str) -> Result<VersioningState>;
    async fn set_bucket_versioning(&self, name: &str, state: VersioningState) -> Result<()>;
    async fn get_bucket_policy(&self, name: &str) -> Result<Option<String>>;
    async fn set_bucket_policy(&self, name: &str, policy: &str) -> Result<()>;
    async fn delete_bucket_policy(&self, name: &str) -> Result<()>;

    // API keys
    async fn lookup_api_secret(&self, access_key: &str) -> Result<Option<ApiKeyRecord>>;
    async fn put_api_key(&self, record: ApiKeyRecord) -> Result<()>;
    /// Bucket allow-list check; `true` when the bucket has no list.
    async fn key_allowed_for_bucket(&self, access_key: &str, bucket: &str) -> Result<bool>;
    /// Replace the bucket's allow-list; `None` admits every key.
    async fn set_bucket_allow_list(&self, bucket: &str, keys: Option<Vec<String>>) -> Result<()>;

    // Object versions
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<VersionRecord>>;
    /// Latest live (non-marker) version per key, sorted by key.
    async fn list_latest(&self, bucket: &str) -> Result<Vec<(String, VersionRecord)>>;
    /// Every row, sorted by key then newest-first within a key.
    async fn list_versions(&self, bucket: &str) -> Result<Vec<(String, VersionRecord)>>;
    /// Versioning-aware PUT commit; appends the oplog entry.
    async fn commit_put_version(
        &self,
        bucket: &str,
        key: &str,
        record: VersionRecord,
    ) -> Result<MutationOutcome>;
    /// Versioning-aware DELETE commit; appends the oplog entry.
    async fn commit_delete(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<MutationOutcome>;

    // Multipart uploads
    async fn create_upload(&self, record: UploadRecord) -> Result<()>;
    async fn get_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>>;
    async fn put_part(&self, upload_id: &str, part: PartRecord) -> Result<()>;
    /// Parts sorted by part number.
    async fn list_parts(&self, upload_id: &str) -> Result<Vec<PartRecord>>;
    /// Open uploads for a bucket, sorted by (key, upload id).
    async fn list_uploads(&self, bucket: &str) -> Result<Vec<UploadRecord>>;
    /// Completion commit: new version row, upload + part rows destroyed,
    /// oplog entry appended. Returns staged part version ids for reclaim.
    async fn commit_complete_upload(
        &self,
        upload_id: &str,
        record: VersionRecord,
    ) -> Result<(MutationOutcome, Vec<String>)>;
    /// Abort: upload + part rows destroyed. Returns staged version ids.
    async fn abort_upload(&self, upload_id: &str) -> Result<Vec<String>>;

    // Oplog
    async fn list_oplog_since(&self, since: &str, limit: usize) -> Result<Vec<OplogEntry>>;
    /// Apply entries pulled from a peer; returns the count applied.
    async fn apply_oplog_entries(&self, entries: Vec<OplogEntry>) -> Result<u64>;

    // Maintenance
    async fn maintenance_state(&self) -> Result<MaintenanceState>;
    async fn set_maintenance_state(&self, state: MaintenanceState) -> Result<()>;
}
