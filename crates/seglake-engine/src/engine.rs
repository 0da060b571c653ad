//! Storage engine capability surface

use crate::manifest::{ChunkRef, Manifest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("version not found: {0}")]
    VersionNotFound(String),

    #[error("segment not found: {0}")]
    SegmentNotFound(u64),

    #[error("range out of bounds: {start}+{length} over {size}")]
    RangeOutOfBounds { start: u64, length: u64, size: u64 },

    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("internal engine error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Result of a committed write.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub version_id: String,
    /// Unquoted hex ETag
    pub etag: String,
    pub size: u64,
    pub committed_at: DateTime<Utc>,
}

/// Streaming reader borrowed from the engine for one response.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Meta-commit closure run inside the engine's commit section, so the
/// manifest write and the metadata upsert land together. Failure rolls
/// the manifest back.
pub type CommitFn = Box<
    dyn FnOnce(PutResult, Manifest) -> BoxFuture<'static, std::result::Result<(), String>> + Send,
>;

/// Summary of the engine's layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub segment_count: u64,
    pub live_bytes: u64,
    pub manifest_count: u64,
}

/// The storage capability surface consumed by the gateway.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Stream a new immutable version from `reader`.
    async fn put_object(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<PutResult>;

    /// Same, with a meta-commit closure run inside the commit section.
    async fn put_object_with_commit(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        commit: CommitFn,
    ) -> Result<PutResult>;

    /// Compose a new version from existing chunk references (multipart
    /// completion); no data bytes move.
    async fn put_manifest_with_commit(
        &self,
        size: u64,
        etag: String,
        chunks: Vec<ChunkRef>,
        commit: CommitFn,
    ) -> Result<PutResult>;

    async fn get(&self, version_id: &str) -> Result<ObjectReader>;
    async fn get_range(&self, version_id: &str, start: u64, length: u64) -> Result<ObjectReader>;

    async fn get_manifest(&self, version_id: &str) -> Result<Manifest>;
    /// Opaque serialized manifest, for replication transfer.
    async fn manifest_bytes(&self, version_id: &str) -> Result<Vec<u8>>;

    /// Drop the manifest of a staged or abandoned version so it can no
    /// longer be addressed. Segment bytes stay until gc finds them
    /// unreferenced. Absent versions are a no-op.
    async fn delete_version(&self, version_id: &str) -> Result<()>;

    /// Raw segment bytes, for replication chunk transfer.
    async fn read_segment_range(&self, segment_id: u64, offset: u64, length: u64)
    -> Result<Vec<u8>>;

    /// Chunk refs of `manifest` that this engine does not hold.
    fn missing_chunks(&self, manifest: &Manifest) -> Vec<ChunkRef>;

    fn layout(&self) -> LayoutInfo;

    /// Run `f` inside the engine's commit section without writing data.
    async fn commit_meta(
        &self,
        f: BoxFuture<'static, std::result::Result<(), String>>,
    ) -> Result<()>;
}
