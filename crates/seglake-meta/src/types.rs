//! Metadata record types
//!
//! One row per committed object version; uploads and parts live in their
//! own tables until complete/abort. Oplog entries are appended in the
//! same commit as the mutation they describe.

use chrono::{DateTime, Utc};
use seglake_common::{ObjectState, VersioningState};
use serde::{Deserialize, Serialize};

/// A bucket row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub versioning: VersioningState,
    /// Bucket policy document (any accepted dialect), if set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Allow-list of access keys; `None` admits every key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_keys: Option<Vec<String>>,
}

/// One object version row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Engine-assigned version id (HLC wire form). Rows occupying the
    /// `null` slot of a suspended bucket keep their engine id here and
    /// set `is_null`.
    pub version_id: String,
    /// Unquoted hex ETag
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub content_type: String,
    pub state: ObjectState,
    /// Occupies the `null` latest-version slot (suspended buckets)
    #[serde(default)]
    pub is_null: bool,
    /// Delete marker placeholder row
    #[serde(default)]
    pub delete_marker: bool,
}

impl VersionRecord {
    /// The version id exposed over the API for this row.
    #[must_use]
    pub fn exposed_version_id(&self) -> &str {
        if self.is_null {
            seglake_common::NULL_VERSION_ID
        } else {
            &self.version_id
        }
    }
}

/// An in-progress multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub initiated_at: DateTime<Utc>,
}

/// One staged part of a multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRecord {
    /// 1..=10000
    pub part_number: u32,
    /// Engine version id of the staged body
    pub version_id: String,
    /// Unquoted hex ETag of the part body
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// An API key row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub access_key: String,
    pub secret_key: String,
    /// Bound policy: `"rw"`, `"ro"`, or a policy document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    pub enabled: bool,
    /// Server keys are used by replication peers
    #[serde(default)]
    pub server: bool,
}

/// Oplog operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpType {
    Put,
    Delete,
    CreateBucket,
    DeleteBucket,
    CompleteMultipart,
}

/// One ordered operation-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Monotonic HLC timestamp in wire form; the replay cursor
    pub ts: String,
    pub op: OpType,
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub etag: String,
    pub size: u64,
    pub content_type: String,
    #[serde(default)]
    pub delete_marker: bool,
}

/// Maintenance-mode state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceState {
    #[default]
    Off,
    Entering,
    Quiesced,
    Exiting,
}

impl MaintenanceState {
    /// Write-plane requests are refused while entering or quiesced.
    #[must_use]
    pub const fn gates_writes(self) -> bool {
        matches!(self, Self::Entering | Self::Quiesced)
    }
}

/// Outcome of a versioning-aware mutation, shaping response headers.
#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    /// Value for `x-amz-version-id`, when the bucket state exposes one
    pub version_id: Option<String>,
    /// Whether a delete marker was created
    pub delete_marker: bool,
}
