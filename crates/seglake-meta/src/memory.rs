//! In-process metadata store
//!
//! A single mutex over all tables. Compound commits mutate the row and
//! append the oplog entry under one lock acquisition, which is what
//! makes them transactional.

use crate::store::{MetaError, MetaStore, Result};
use crate::types::{
    ApiKeyRecord, BucketRecord, MaintenanceState, MutationOutcome, OpType, OplogEntry, PartRecord,
    UploadRecord, VersionRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use seglake_common::{HlcClock, HlcTimestamp, ObjectState, VersioningState};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    buckets: BTreeMap<String, BucketRecord>,
    /// (bucket, key) -> version rows, oldest first
    objects: BTreeMap<(String, String), Vec<VersionRecord>>,
    uploads: BTreeMap<String, UploadRecord>,
    parts: BTreeMap<String, BTreeMap<u32, PartRecord>>,
    api_keys: HashMap<String, ApiKeyRecord>,
    oplog: Vec<OplogEntry>,
    maintenance: MaintenanceState,
}

/// In-memory [`MetaStore`] implementation.
pub struct MemMetaStore {
    clock: Arc<HlcClock>,
    tables: Mutex<Tables>,
}

impl MemMetaStore {
    #[must_use]
    pub fn new(clock: Arc<HlcClock>) -> Self {
        Self {
            clock,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn append_oplog(
        clock: &HlcClock,
        tables: &mut Tables,
        op: OpType,
        bucket: &str,
        key: &str,
        record: &VersionRecord,
    ) {
        tables.oplog.push(OplogEntry {
            ts: clock.next_id(),
            op,
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: record.version_id.clone(),
            etag: record.etag.clone(),
            size: record.size,
            content_type: record.content_type.clone(),
            delete_marker: record.delete_marker,
        });
    }

    fn apply_put(
        tables: &mut Tables,
        bucket: &str,
        key: &str,
        mut record: VersionRecord,
        versioning: VersioningState,
    ) -> MutationOutcome {
        let rows = tables
            .objects
            .entry((bucket.to_string(), key.to_string()))
            .or_default();
        match versioning {
            VersioningState::Enabled => {
                record.is_null = false;
                let version_id = record.version_id.clone();
                rows.push(record);
                MutationOutcome {
                    version_id: Some(version_id),
                    delete_marker: false,
                }
            }
            VersioningState::Suspended => {
                rows.retain(|r| !r.is_null);
                record.is_null = true;
                rows.push(record);
                MutationOutcome {
                    version_id: Some(seglake_common::NULL_VERSION_ID.to_string()),
                    delete_marker: false,
                }
            }
            VersioningState::Disabled => {
                rows.clear();
                record.is_null = false;
                rows.push(record);
                MutationOutcome {
                    version_id: None,
                    delete_marker: false,
                }
            }
        }
    }
}

#[async_trait]
impl MetaStore for MemMetaStore {
    async fn create_bucket(&self, name: &str, versioning: VersioningState) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.buckets.contains_key(name) {
            return Err(MetaError::BucketExists(name.to_string()));
        }
        tables.buckets.insert(
            name.to_string(),
            BucketRecord {
                name: name.to_string(),
                created_at: Utc::now(),
                versioning,
                policy: None,
                allowed_keys: None,
            },
        );
        let ts = self.clock.next_id();
        tables.oplog.push(OplogEntry {
            ts,
            op: OpType::CreateBucket,
            bucket: name.to_string(),
            key: String::new(),
            version_id: String::new(),
            etag: String::new(),
            size: 0,
            content_type: String::new(),
            delete_marker: false,
        });
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        if !tables.buckets.contains_key(name) {
            return Err(MetaError::BucketNotFound(name.to_string()));
        }
        let occupied = tables
            .objects
            .range((name.to_string(), String::new())..)
            .take_while(|((b, _), _)| b.as_str() == name)
            .any(|(_, rows)| !rows.is_empty());
        if occupied {
            return Err(MetaError::BucketNotEmpty(name.to_string()));
        }
        tables.buckets.remove(name);
        tables
            .objects
            .retain(|(b, _), _| b.as_str() != name);
        let ts = self.clock.next_id();
        tables.oplog.push(OplogEntry {
            ts,
            op: OpType::DeleteBucket,
            bucket: name.to_string(),
            key: String::new(),
            version_id: String::new(),
            etag: String::new(),
            size: 0,
            content_type: String::new(),
            delete_marker: false,
        });
        Ok(())
    }

    async fn get_bucket(&self, name: &str) -> Result<BucketRecord> {
        self.tables
            .lock()
            .buckets
            .get(name)
            .cloned()
            .ok_or_else(|| MetaError::BucketNotFound(name.to_string()))
    }

    async fn list_buckets(&self) -> Result<Vec<BucketRecord>> {
        Ok(self.tables.lock().buckets.values().cloned().collect())
    }

    async fn get_bucket_versioning(&self, name: &str) -> Result<VersioningState> {
        Ok(self.get_bucket(name).await?.versioning)
    }

    async fn set_bucket_versioning(&self, name: &str, state: VersioningState) -> Result<()> {
        let mut tables = self.tables.lock();
        let bucket = tables
            .buckets
            .get_mut(name)
            .ok_or_else(|| MetaError::BucketNotFound(name.to_string()))?;
        bucket.versioning = state;
        Ok(())
    }

    async fn get_bucket_policy(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get_bucket(name).await?.policy)
    }

    async fn set_bucket_policy(&self, name: &str, policy: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let bucket = tables
            .buckets
            .get_mut(name)
            .ok_or_else(|| MetaError::BucketNotFound(name.to_string()))?;
        bucket.policy = Some(policy.to_string());
        Ok(())
    }

    async fn delete_bucket_policy(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let bucket = tables
            .buckets
            .get_mut(name)
            .ok_or_else(|| MetaError::BucketNotFound(name.to_string()))?;
        bucket.policy = None;
        Ok(())
    }

    async fn lookup_api_secret(&self, access_key: &str) -> Result<Option<ApiKeyRecord>> {
        Ok(self.tables.lock().api_keys.get(access_key).cloned())
    }

    async fn put_api_key(&self, record: ApiKeyRecord) -> Result<()> {
        self.tables
            .lock()
            .api_keys
            .insert(record.access_key.clone(), record);
        Ok(())
    }

    async fn key_allowed_for_bucket(&self, access_key: &str, bucket: &str) -> Result<bool> {
        let tables = self.tables.lock();
        match tables.buckets.get(bucket) {
            Some(BucketRecord {
                allowed_keys: Some(keys),
                ..
            }) => Ok(keys.iter().any(|k| k == access_key)),
            Some(_) => Ok(true),
            None => Err(MetaError::BucketNotFound(bucket.to_string())),
        }
    }

    async fn set_bucket_allow_list(&self, bucket: &str, keys: Option<Vec<String>>) -> Result<()> {
        let mut tables = self.tables.lock();
        let record = tables
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| MetaError::BucketNotFound(bucket.to_string()))?;
        record.allowed_keys = keys;
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<VersionRecord>> {
        let tables = self.tables.lock();
        let Some(rows) = tables.objects.get(&(bucket.to_string(), key.to_string())) else {
            return Ok(None);
        };
        let found = match version_id {
            None => rows.last(),
            Some(seglake_common::NULL_VERSION_ID) => rows.iter().find(|r| r.is_null),
            Some(v) => rows.iter().find(|r| r.version_id == v),
        };
        Ok(found.cloned())
    }

    async fn list_latest(&self, bucket: &str) -> Result<Vec<(String, VersionRecord)>> {
        let tables = self.tables.lock();
        let mut out = Vec::new();
        for ((b, key), rows) in &tables.objects {
            if b.as_str() != bucket {
                continue;
            }
            if let Some(latest) = rows.last()
                && !latest.delete_marker
                && latest.state == ObjectState::Live
            {
                out.push((key.clone(), latest.clone()));
            }
        }
        Ok(out)
    }

    async fn list_versions(&self, bucket: &str) -> Result<Vec<(String, VersionRecord)>> {
        let tables = self.tables.lock();
        let mut out = Vec::new();
        for ((b, key), rows) in &tables.objects {
            if b.as_str() != bucket {
                continue;
            }
            for row in rows.iter().rev() {
                out.push((key.clone(), row.clone()));
            }
        }
        Ok(out)
    }

    async fn commit_put_version(
        &self,
        bucket: &str,
        key: &str,
        record: VersionRecord,
    ) -> Result<MutationOutcome> {
        let mut tables = self.tables.lock();
        let versioning = tables
            .buckets
            .get(bucket)
            .ok_or_else(|| MetaError::BucketNotFound(bucket.to_string()))?
            .versioning;
        Self::append_oplog(&self.clock, &mut tables, OpType::Put, bucket, key, &record);
        Ok(Self::apply_put(&mut tables, bucket, key, record, versioning))
    }

    async fn commit_delete(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<MutationOutcome> {
        let mut tables = self.tables.lock();
        let versioning = tables
            .buckets
            .get(bucket)
            .ok_or_else(|| MetaError::BucketNotFound(bucket.to_string()))?
            .versioning;

        let entry_key = (bucket.to_string(), key.to_string());

        // Targeted physical removal
        if let Some(v) = version_id {
            let Some(rows) = tables.objects.get_mut(&entry_key) else {
                return Err(MetaError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            };
            let before = rows.len();
            if v == seglake_common::NULL_VERSION_ID {
                rows.retain(|r| !r.is_null);
            } else {
                rows.retain(|r| r.version_id != v);
            }
            if rows.len() == before {
                return Err(MetaError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            if rows.is_empty() {
                tables.objects.remove(&entry_key);
            }
            let removed = VersionRecord {
                version_id: v.to_string(),
                etag: String::new(),
                size: 0,
                last_modified: Utc::now(),
                content_type: String::new(),
                state: ObjectState::Live,
                is_null: v == seglake_common::NULL_VERSION_ID,
                delete_marker: false,
            };
            Self::append_oplog(&self.clock, &mut tables, OpType::Delete, bucket, key, &removed);
            let exposed = match versioning {
                VersioningState::Disabled => None,
                _ => Some(v.to_string()),
            };
            return Ok(MutationOutcome {
                version_id: exposed,
                delete_marker: false,
            });
        }

        match versioning {
            VersioningState::Enabled | VersioningState::Suspended => {
                let marker = VersionRecord {
                    version_id: self.clock.next_id(),
                    etag: String::new(),
                    size: 0,
                    last_modified: Utc::now(),
                    content_type: String::new(),
                    state: ObjectState::Live,
                    is_null: versioning == VersioningState::Suspended,
                    delete_marker: true,
                };
                Self::append_oplog(&self.clock, &mut tables, OpType::Delete, bucket, key, &marker);
                let outcome =
                    Self::apply_put(&mut tables, bucket, key, marker, versioning);
                Ok(MutationOutcome {
                    version_id: outcome.version_id,
                    delete_marker: true,
                })
            }
            VersioningState::Disabled => {
                let existed = tables.objects.remove(&entry_key).is_some();
                if existed {
                    let removed = VersionRecord {
                        version_id: String::new(),
                        etag: String::new(),
                        size: 0,
                        last_modified: Utc::now(),
                        content_type: String::new(),
                        state: ObjectState::Live,
                        is_null: false,
                        delete_marker: false,
                    };
                    Self::append_oplog(
                        &self.clock,
                        &mut tables,
                        OpType::Delete,
                        bucket,
                        key,
                        &removed,
                    );
                }
                Ok(MutationOutcome::default())
            }
        }
    }

    async fn create_upload(&self, record: UploadRecord) -> Result<()> {
        let mut tables = self.tables.lock();
        if !tables.buckets.contains_key(&record.bucket) {
            return Err(MetaError::BucketNotFound(record.bucket));
        }
        tables.parts.insert(record.upload_id.clone(), BTreeMap::new());
        tables.uploads.insert(record.upload_id.clone(), record);
        Ok(())
    }

    async fn get_upload(&self, upload_id: &str) -> Result<Option<UploadRecord>> {
        Ok(self.tables.lock().uploads.get(upload_id).cloned())
    }

    async fn put_part(&self, upload_id: &str, part: PartRecord) -> Result<()> {
        let mut tables = self.tables.lock();
        if !tables.uploads.contains_key(upload_id) {
            return Err(MetaError::UploadNotFound(upload_id.to_string()));
        }
        tables
            .parts
            .entry(upload_id.to_string())
            .or_default()
            .insert(part.part_number, part);
        Ok(())
    }

    async fn list_parts(&self, upload_id: &str) -> Result<Vec<PartRecord>> {
        let tables = self.tables.lock();
        if !tables.uploads.contains_key(upload_id) {
            return Err(MetaError::UploadNotFound(upload_id.to_string()));
        }
        Ok(tables
            .parts
            .get(upload_id)
            .map(|parts| parts.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_uploads(&self, bucket: &str) -> Result<Vec<UploadRecord>> {
        let tables = self.tables.lock();
        let mut out: Vec<UploadRecord> = tables
            .uploads
            .values()
            .filter(|u| u.bucket == bucket)
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.key, &a.upload_id).cmp(&(&b.key, &b.upload_id)));
        Ok(out)
    }

    async fn commit_complete_upload(
        &self,
        upload_id: &str,
        record: VersionRecord,
    ) -> Result<(MutationOutcome, Vec<String>)> {
        let mut tables = self.tables.lock();
        let upload = tables
            .uploads
            .remove(upload_id)
            .ok_or_else(|| MetaError::UploadNotFound(upload_id.to_string()))?;
        let staged = tables
            .parts
            .remove(upload_id)
            .map(|parts| parts.into_values().map(|p| p.version_id).collect())
            .unwrap_or_default();
        let versioning = tables
            .buckets
            .get(&upload.bucket)
            .ok_or_else(|| MetaError::BucketNotFound(upload.bucket.clone()))?
            .versioning;
        Self::append_oplog(
            &self.clock,
            &mut tables,
            OpType::CompleteMultipart,
            &upload.bucket,
            &upload.key,
            &record,
        );
        let outcome = Self::apply_put(&mut tables, &upload.bucket, &upload.key, record, versioning);
        Ok((outcome, staged))
    }

    async fn abort_upload(&self, upload_id: &str) -> Result<Vec<String>> {
        let mut tables = self.tables.lock();
        tables
            .uploads
            .remove(upload_id)
            .ok_or_else(|| MetaError::UploadNotFound(upload_id.to_string()))?;
        Ok(tables
            .parts
            .remove(upload_id)
            .map(|parts| parts.into_values().map(|p| p.version_id).collect())
            .unwrap_or_default())
    }

    async fn list_oplog_since(&self, since: &str, limit: usize) -> Result<Vec<OplogEntry>> {
        let tables = self.tables.lock();
        Ok(tables
            .oplog
            .iter()
            .filter(|e| e.ts.as_str() > since)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn apply_oplog_entries(&self, entries: Vec<OplogEntry>) -> Result<u64> {
        let mut applied = 0u64;
        let mut tables = self.tables.lock();
        for entry in entries {
            if let Some(ts) = HlcTimestamp::parse(&entry.ts) {
                self.clock.update(ts);
            }
            let versioning = tables
                .buckets
                .get(&entry.bucket)
                .map(|b| b.versioning)
                .unwrap_or_default();
            match entry.op {
                OpType::CreateBucket => {
                    tables
                        .buckets
                        .entry(entry.bucket.clone())
                        .or_insert_with(|| BucketRecord {
                            name: entry.bucket.clone(),
                            created_at: Utc::now(),
                            versioning: VersioningState::Disabled,
                            policy: None,
                            allowed_keys: None,
                        });
                }
                OpType::DeleteBucket => {
                    tables.buckets.remove(&entry.bucket);
                }
                OpType::Put | OpType::CompleteMultipart => {
                    let record = VersionRecord {
                        version_id: entry.version_id.clone(),
                        etag: entry.etag.clone(),
                        size: entry.size,
                        last_modified: Utc::now(),
                        content_type: entry.content_type.clone(),
                        state: ObjectState::Live,
                        is_null: false,
                        delete_marker: false,
                    };
                    Self::apply_put(&mut tables, &entry.bucket, &entry.key, record, versioning);
                }
                OpType::Delete => {
                    if entry.delete_marker {
                        let marker = VersionRecord {
                            version_id: entry.version_id.clone(),
                            etag: String::new(),
                            size: 0,
                            last_modified: Utc::now(),
                            content_type: String::new(),
                            state: ObjectState::Live,
                            is_null: false,
                            delete_marker: true,
                        };
                        Self::apply_put(&mut tables, &entry.bucket, &entry.key, marker, versioning);
                    } else {
                        tables
                            .objects
                            .remove(&(entry.bucket.clone(), entry.key.clone()));
                    }
                }
            }
            tables.oplog.push(entry);
            applied += 1;
        }
        Ok(applied)
    }

    async fn maintenance_state(&self) -> Result<MaintenanceState> {
        Ok(self.tables.lock().maintenance)
    }

    async fn set_maintenance_state(&self, state: MaintenanceState) -> Result<()> {
        self.tables.lock().maintenance = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemMetaStore {
        MemMetaStore::new(Arc::new(HlcClock::new()))
    }

    fn version(id: &str, etag: &str) -> VersionRecord {
        VersionRecord {
            version_id: id.to_string(),
            etag: etag.to_string(),
            size: 3,
            last_modified: Utc::now(),
            content_type: "application/octet-stream".to_string(),
            state: ObjectState::Live,
            is_null: false,
            delete_marker: false,
        }
    }

    #[tokio::test]
    async fn test_versioned_puts_accumulate_rows() {
        let meta = store();
        meta.create_bucket("b", VersioningState::Enabled).await.unwrap();
        let first = meta
            .commit_put_version("b", "k", version("v1", "e1"))
            .await
            .unwrap();
        let second = meta
            .commit_put_version("b", "k", version("v2", "e2"))
            .await
            .unwrap();
        assert_eq!(first.version_id.as_deref(), Some("v1"));
        assert_eq!(second.version_id.as_deref(), Some("v2"));

        let latest = meta.get_object("b", "k", None).await.unwrap().unwrap();
        assert_eq!(latest.version_id, "v2");
        let old = meta.get_object("b", "k", Some("v1")).await.unwrap().unwrap();
        assert_eq!(old.etag, "e1");
        assert_eq!(meta.list_versions("b").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_suspended_put_replaces_null_slot() {
        let meta = store();
        meta.create_bucket("b", VersioningState::Suspended).await.unwrap();
        let one = meta
            .commit_put_version("b", "k", version("v1", "e1"))
            .await
            .unwrap();
        assert_eq!(one.version_id.as_deref(), Some("null"));
        meta.commit_put_version("b", "k", version("v2", "e2"))
            .await
            .unwrap();
        let rows = meta.list_versions("b").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.etag, "e2");
        let by_null = meta.get_object("b", "k", Some("null")).await.unwrap().unwrap();
        assert_eq!(by_null.etag, "e2");
    }

    #[tokio::test]
    async fn test_delete_marker_semantics() {
        let meta = store();
        meta.create_bucket("b", VersioningState::Enabled).await.unwrap();
        meta.commit_put_version("b", "k", version("v1", "e1"))
            .await
            .unwrap();
        let outcome = meta.commit_delete("b", "k", None).await.unwrap();
        assert!(outcome.delete_marker);
        assert!(outcome.version_id.is_some());

        let latest = meta.get_object("b", "k", None).await.unwrap().unwrap();
        assert!(latest.delete_marker);
        // History survives
        assert!(meta.get_object("b", "k", Some("v1")).await.unwrap().is_some());
        // Listing skips the marker
        assert!(meta.list_latest("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unversioned_delete_is_physical() {
        let meta = store();
        meta.create_bucket("b", VersioningState::Disabled).await.unwrap();
        meta.commit_put_version("b", "k", version("v1", "e1"))
            .await
            .unwrap();
        let outcome = meta.commit_delete("b", "k", None).await.unwrap();
        assert!(!outcome.delete_marker);
        assert!(outcome.version_id.is_none());
        assert!(meta.get_object("b", "k", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_bucket_requires_empty() {
        let meta = store();
        meta.create_bucket("b", VersioningState::Disabled).await.unwrap();
        meta.commit_put_version("b", "k", version("v1", "e1"))
            .await
            .unwrap();
        assert!(matches!(
            meta.delete_bucket("b").await,
            Err(MetaError::BucketNotEmpty(_))
        ));
        meta.commit_delete("b", "k", None).await.unwrap();
        meta.delete_bucket("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_oplog_is_ordered_and_cursorable() {
        let meta = store();
        meta.create_bucket("b", VersioningState::Enabled).await.unwrap();
        meta.commit_put_version("b", "k1", version("v1", "e1"))
            .await
            .unwrap();
        meta.commit_put_version("b", "k2", version("v2", "e2"))
            .await
            .unwrap();
        let all = meta.list_oplog_since("", 100).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].ts < w[1].ts));

        let tail = meta.list_oplog_since(&all[1].ts, 100).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].key, "k2");
    }

    #[tokio::test]
    async fn test_mpu_lifecycle() {
        let meta = store();
        meta.create_bucket("b", VersioningState::Disabled).await.unwrap();
        meta.create_upload(UploadRecord {
            upload_id: "u1".to_string(),
            bucket: "b".to_string(),
            key: "k".to_string(),
            content_type: "text/plain".to_string(),
            initiated_at: Utc::now(),
        })
        .await
        .unwrap();
        meta.put_part(
            "u1",
            PartRecord {
                part_number: 2,
                version_id: "pv2".to_string(),
                etag: "pe2".to_string(),
                size: 4,
                last_modified: Utc::now(),
            },
        )
        .await
        .unwrap();
        meta.put_part(
            "u1",
            PartRecord {
                part_number: 1,
                version_id: "pv1".to_string(),
                etag: "pe1".to_string(),
                size: 5 << 20,
                last_modified: Utc::now(),
            },
        )
        .await
        .unwrap();

        let parts = meta.list_parts("u1").await.unwrap();
        assert_eq!(parts.iter().map(|p| p.part_number).collect::<Vec<_>>(), [1, 2]);

        let (outcome, staged) = meta
            .commit_complete_upload("u1", version("v9", "abc-2"))
            .await
            .unwrap();
        assert!(outcome.version_id.is_none());
        assert_eq!(staged, ["pv1", "pv2"]);
        assert!(meta.get_upload("u1").await.unwrap().is_none());
        assert!(meta.list_parts("u1").await.is_err());
    }
}
