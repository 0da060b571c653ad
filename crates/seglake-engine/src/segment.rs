//! In-process segment engine
//!
//! Objects are chunked into bounded writes appended to the active
//! segment; a manifest of chunk refs is committed per version. Versions
//! are immutable after commit, so readers and writers never conflict.
//! Commits are serialized by an async lock so a meta-commit closure can
//! await inside the commit section; segment and manifest tables sit
//! behind a short-held sync lock.

use crate::engine::{
    CommitFn, EngineError, LayoutInfo, ObjectReader, PutResult, Result, StorageEngine,
};
use crate::manifest::{ChunkRef, Manifest};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use seglake_common::HlcClock;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Maximum chunk size. Segment blocks are 4MB with ~96 bytes of frame
/// overhead, so stay 4KB under for safety margin.
const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024 - 4096;

/// Roll to a new segment once the active one crosses this size.
const SEGMENT_TARGET_SIZE: usize = 64 * 1024 * 1024;

#[derive(Default)]
struct EngineState {
    segments: BTreeMap<u64, Vec<u8>>,
    active_segment: u64,
    manifests: HashMap<String, Manifest>,
}

/// In-process [`StorageEngine`] implementation over append-only
/// segments.
pub struct SegmentEngine {
    clock: Arc<HlcClock>,
    state: Mutex<EngineState>,
    commit_lock: tokio::sync::Mutex<()>,
}

impl SegmentEngine {
    #[must_use]
    pub fn new(clock: Arc<HlcClock>) -> Self {
        let mut state = EngineState::default();
        state.segments.insert(0, Vec::new());
        Self {
            clock,
            state: Mutex::new(state),
            commit_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Stream `reader` into segments, returning the chunk list and the
    /// MD5 accumulated along the way.
    async fn write_chunks(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(Vec<ChunkRef>, u64, md5::Digest)> {
        let mut chunks = Vec::new();
        let mut total = 0u64;
        let mut hasher = md5::Context::new();
        let mut buf = vec![0u8; MAX_CHUNK_SIZE];
        let mut index = 0u32;

        loop {
            // Fill up to a full chunk before cutting it, so short reads
            // from the transport do not fragment the manifest.
            let mut filled = 0usize;
            while filled < buf.len() {
                let n = reader.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            hasher.consume(&buf[..filled]);
            total += filled as u64;

            let mut state = self.state.lock();
            let segment_id = state.active_segment;
            let segment = state.segments.entry(segment_id).or_default();
            let offset = segment.len() as u64;
            segment.extend_from_slice(&buf[..filled]);
            if segment.len() >= SEGMENT_TARGET_SIZE {
                state.active_segment += 1;
                let next = state.active_segment;
                state.segments.entry(next).or_default();
            }
            chunks.push(ChunkRef {
                segment_id,
                offset,
                length: filled as u64,
                index,
            });
            index += 1;
        }

        Ok((chunks, total, hasher.compute()))
    }

    async fn commit(
        &self,
        manifest: Manifest,
        result: &PutResult,
        commit: Option<CommitFn>,
    ) -> Result<()> {
        let _section = self.commit_lock.lock().await;
        self.state
            .lock()
            .manifests
            .insert(result.version_id.clone(), manifest.clone());
        if let Some(commit) = commit
            && let Err(e) = commit(result.clone(), manifest).await
        {
            self.state.lock().manifests.remove(&result.version_id);
            return Err(EngineError::CommitFailed(e));
        }
        Ok(())
    }

    fn assemble(&self, version_id: &str, start: u64, length: u64) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let manifest = state
            .manifests
            .get(version_id)
            .ok_or_else(|| EngineError::VersionNotFound(version_id.to_string()))?;
        if start.saturating_add(length) > manifest.size {
            return Err(EngineError::RangeOutOfBounds {
                start,
                length,
                size: manifest.size,
            });
        }
        let end = start + length;
        let mut out = Vec::with_capacity(usize::try_from(length).unwrap_or(0));
        for (chunk, object_offset) in manifest.chunks_in_range(start, length) {
            let segment = state
                .segments
                .get(&chunk.segment_id)
                .ok_or(EngineError::SegmentNotFound(chunk.segment_id))?;
            let copy_from = start.max(object_offset);
            let copy_to = end.min(object_offset + chunk.length);
            let seg_start = chunk.offset + (copy_from - object_offset);
            let seg_end = seg_start + (copy_to - copy_from);
            out.extend_from_slice(&segment[seg_start as usize..seg_end as usize]);
        }
        Ok(out)
    }
}

#[async_trait]
impl StorageEngine for SegmentEngine {
    async fn put_object(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<PutResult> {
        let (chunks, size, digest) = self.write_chunks(reader).await?;
        let result = PutResult {
            version_id: self.clock.next_id(),
            etag: format!("{digest:x}"),
            size,
            committed_at: Utc::now(),
        };
        debug!(version_id = %result.version_id, size, "put object");
        self.commit(Manifest { size, chunks }, &result, None).await?;
        Ok(result)
    }

    async fn put_object_with_commit(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        commit: CommitFn,
    ) -> Result<PutResult> {
        let (chunks, size, digest) = self.write_chunks(reader).await?;
        let result = PutResult {
            version_id: self.clock.next_id(),
            etag: format!("{digest:x}"),
            size,
            committed_at: Utc::now(),
        };
        self.commit(Manifest { size, chunks }, &result, Some(commit))
            .await?;
        Ok(result)
    }

    async fn put_manifest_with_commit(
        &self,
        size: u64,
        etag: String,
        chunks: Vec<ChunkRef>,
        commit: CommitFn,
    ) -> Result<PutResult> {
        let result = PutResult {
            version_id: self.clock.next_id(),
            etag,
            size,
            committed_at: Utc::now(),
        };
        self.commit(Manifest { size, chunks }, &result, Some(commit))
            .await?;
        Ok(result)
    }

    async fn get(&self, version_id: &str) -> Result<ObjectReader> {
        let size = self.get_manifest(version_id).await?.size;
        let bytes = self.assemble(version_id, 0, size)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn get_range(&self, version_id: &str, start: u64, length: u64) -> Result<ObjectReader> {
        let bytes = self.assemble(version_id, start, length)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn get_manifest(&self, version_id: &str) -> Result<Manifest> {
        self.state
            .lock()
            .manifests
            .get(version_id)
            .cloned()
            .ok_or_else(|| EngineError::VersionNotFound(version_id.to_string()))
    }

    async fn manifest_bytes(&self, version_id: &str) -> Result<Vec<u8>> {
        let manifest = self.get_manifest(version_id).await?;
        serde_json::to_vec(&manifest).map_err(|e| EngineError::Internal(e.to_string()))
    }

    async fn delete_version(&self, version_id: &str) -> Result<()> {
        self.state.lock().manifests.remove(version_id);
        Ok(())
    }

    async fn read_segment_range(
        &self,
        segment_id: u64,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let segment = state
            .segments
            .get(&segment_id)
            .ok_or(EngineError::SegmentNotFound(segment_id))?;
        let end = offset.saturating_add(length);
        if end > segment.len() as u64 {
            return Err(EngineError::RangeOutOfBounds {
                start: offset,
                length,
                size: segment.len() as u64,
            });
        }
        Ok(segment[offset as usize..end as usize].to_vec())
    }

    fn missing_chunks(&self, manifest: &Manifest) -> Vec<ChunkRef> {
        let state = self.state.lock();
        manifest
            .chunks
            .iter()
            .filter(|chunk| {
                state
                    .segments
                    .get(&chunk.segment_id)
                    .is_none_or(|seg| chunk.offset + chunk.length > seg.len() as u64)
            })
            .copied()
            .collect()
    }

    fn layout(&self) -> LayoutInfo {
        let state = self.state.lock();
        LayoutInfo {
            segment_count: state.segments.len() as u64,
            live_bytes: state.segments.values().map(|s| s.len() as u64).sum(),
            manifest_count: state.manifests.len() as u64,
        }
    }

    async fn commit_meta(
        &self,
        f: BoxFuture<'static, std::result::Result<(), String>>,
    ) -> Result<()> {
        let _section = self.commit_lock.lock().await;
        f.await.map_err(EngineError::CommitFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SegmentEngine {
        SegmentEngine::new(Arc::new(HlcClock::new()))
    }

    async fn read_all(mut reader: ObjectReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let engine = engine();
        let body = b"hello world".to_vec();
        let result = engine.put_object(&mut body.as_slice()).await.unwrap();
        assert_eq!(result.size, 11);
        assert_eq!(result.etag, format!("{:x}", md5::compute(&body)));

        let got = read_all(engine.get(&result.version_id).await.unwrap()).await;
        assert_eq!(got, body);
    }

    #[tokio::test]
    async fn test_get_range() {
        let engine = engine();
        let body = b"0123456789".to_vec();
        let result = engine.put_object(&mut body.as_slice()).await.unwrap();

        let mid = read_all(engine.get_range(&result.version_id, 3, 4).await.unwrap()).await;
        assert_eq!(mid, b"3456");

        assert!(matches!(
            engine.get_range(&result.version_id, 8, 5).await,
            Err(EngineError::RangeOutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn test_versions_are_distinct_and_immutable() {
        let engine = engine();
        let first = engine.put_object(&mut &b"one"[..]).await.unwrap();
        let second = engine.put_object(&mut &b"two"[..]).await.unwrap();
        assert_ne!(first.version_id, second.version_id);
        assert_eq!(
            read_all(engine.get(&first.version_id).await.unwrap()).await,
            b"one"
        );
        assert_eq!(
            read_all(engine.get(&second.version_id).await.unwrap()).await,
            b"two"
        );
    }

    #[tokio::test]
    async fn test_manifest_compose_reads_back() {
        let engine = engine();
        let a = engine.put_object(&mut &b"aaaa"[..]).await.unwrap();
        let b = engine.put_object(&mut &b"bb"[..]).await.unwrap();

        let mut combined = engine.get_manifest(&a.version_id).await.unwrap();
        combined.append(&engine.get_manifest(&b.version_id).await.unwrap());
        let result = engine
            .put_manifest_with_commit(
                combined.size,
                "etag-2".to_string(),
                combined.chunks,
                Box::new(|_, _| Box::pin(async { Ok(()) })),
            )
            .await
            .unwrap();

        let got = read_all(engine.get(&result.version_id).await.unwrap()).await;
        assert_eq!(got, b"aaaabb");
    }

    #[tokio::test]
    async fn test_commit_closure_sees_result() {
        let engine = engine();
        let (tx, rx) = std::sync::mpsc::channel();
        engine
            .put_object_with_commit(
                &mut &b"abc"[..],
                Box::new(move |result, manifest| {
                    Box::pin(async move {
                        tx.send((result.size, manifest.chunks.len())).ok();
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), (3, 1));
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back_manifest() {
        let engine = engine();
        let err = engine
            .put_object_with_commit(
                &mut &b"data"[..],
                Box::new(|_, _| Box::pin(async { Err("meta refused".to_string()) })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CommitFailed(_)));
        assert_eq!(engine.layout().manifest_count, 0);
    }

    #[tokio::test]
    async fn test_delete_version_unaddresses_manifest() {
        let engine = engine();
        let result = engine.put_object(&mut &b"staged part"[..]).await.unwrap();
        assert_eq!(engine.layout().manifest_count, 1);

        engine.delete_version(&result.version_id).await.unwrap();
        assert_eq!(engine.layout().manifest_count, 0);
        assert!(matches!(
            engine.get(&result.version_id).await,
            Err(EngineError::VersionNotFound(_))
        ));
        // Idempotent on absent versions
        engine.delete_version(&result.version_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_chunks() {
        let engine = engine();
        let manifest = Manifest {
            size: 10,
            chunks: vec![ChunkRef {
                segment_id: 999,
                offset: 0,
                length: 10,
                index: 0,
            }],
        };
        assert_eq!(engine.missing_chunks(&manifest).len(), 1);
    }
}
