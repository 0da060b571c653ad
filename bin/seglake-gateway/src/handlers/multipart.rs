//! Multipart upload handlers
//!
//! Initiate -> upload-part -> complete/abort. Completion composes the
//! part manifests into one object manifest instead of re-streaming the
//! bytes, so terabyte-class completes cost O(parts) metadata I/O.

use super::{HandlerCtx, empty_response, http_date, iso_date, xml_response};
use crate::body::{BodyOptions, body_reader, effective_content_length, is_aws_chunked, parse_content_md5};
use crate::router::Route;
use crate::state::{map_engine_error, map_meta_error};
use crate::xml;
use axum::body::Body;
use axum::response::Response;
use chrono::Utc;
use http::StatusCode;
use parking_lot::Mutex;
use seglake_common::{ApiError, ObjectState};
use seglake_engine::Manifest;
use seglake_meta::{MutationOutcome, PartRecord, UploadRecord, VersionRecord};
use std::sync::Arc;
use tracing::warn;

const MAX_PART_NUMBER: u32 = 10_000;
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
const MAX_COMPLETE_BODY: usize = 4 * 1024 * 1024;

pub async fn initiate(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let key = ctx.require_key(route)?;
    ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;

    let upload_id = format!(
        "{}{}",
        hex::encode(rand::random::<[u8; 8]>()),
        hex::encode(rand::random::<[u8; 8]>())
    );
    let content_type = ctx
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    ctx.gw
        .meta
        .create_upload(UploadRecord {
            upload_id: upload_id.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type,
            initiated_at: Utc::now(),
        })
        .await
        .map_err(map_meta_error)?;

    xml_response(&xml::InitiateMultipartUploadResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id,
    })
}

pub async fn upload_part(
    ctx: &HandlerCtx<'_>,
    route: &Route,
    body: Body,
) -> Result<Response, ApiError> {
    let _bucket = ctx.require_bucket(route)?;
    let _key = ctx.require_key(route)?;
    let upload_id = ctx
        .query
        .get("uploadId")
        .ok_or_else(|| ApiError::invalid_argument("missing uploadId"))?;
    let part_number: u32 = ctx
        .query
        .get("partNumber")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError::invalid_argument("bad partNumber"))?;
    if part_number == 0 || part_number > MAX_PART_NUMBER {
        return Err(ApiError::invalid_argument("partNumber out of range"));
    }

    ctx.gw
        .meta
        .get_upload(upload_id)
        .await
        .map_err(map_meta_error)?
        .ok_or_else(|| ApiError::NoSuchUpload(upload_id.to_string()))?;

    let chunked = is_aws_chunked(ctx.headers, &ctx.verified.payload);
    let declared = effective_content_length(ctx.headers, chunked)?
        .ok_or(ApiError::MissingContentLength)?;
    if declared > MAX_PART_SIZE {
        return Err(ApiError::EntityTooLarge { max: MAX_PART_SIZE });
    }

    let content_md5 = parse_content_md5(ctx.headers)?;
    let mut reader = body_reader(
        body,
        ctx.headers,
        ctx.verified,
        BodyOptions {
            content_md5,
            max_object_size: 0,
        },
    );

    // The part body is staged as an anonymous engine object; the part
    // row lands in the same commit section.
    let meta = ctx.gw.meta.clone();
    let commit_upload_id = upload_id.to_string();
    let result = ctx
        .gw
        .engine
        .put_object_with_commit(
            &mut reader,
            Box::new(move |result, _manifest| {
                Box::pin(async move {
                    meta.put_part(
                        &commit_upload_id,
                        PartRecord {
                            part_number,
                            version_id: result.version_id.clone(),
                            etag: result.etag.clone(),
                            size: result.size,
                            last_modified: result.committed_at,
                        },
                    )
                    .await
                    .map_err(|e| e.to_string())
                })
            }),
        )
        .await
        .map_err(map_engine_error)?;

    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::ETAG, format!("\"{}\"", result.etag))
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub async fn list_parts(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let key = ctx.require_key(route)?;
    let upload_id = ctx
        .query
        .get("uploadId")
        .ok_or_else(|| ApiError::invalid_argument("missing uploadId"))?;
    ctx.gw
        .meta
        .get_upload(upload_id)
        .await
        .map_err(map_meta_error)?
        .ok_or_else(|| ApiError::NoSuchUpload(upload_id.to_string()))?;

    let parts = ctx
        .gw
        .meta
        .list_parts(upload_id)
        .await
        .map_err(map_meta_error)?;
    xml_response(&xml::ListPartsResult {
        bucket: bucket.to_string(),
        key: key.to_string(),
        upload_id: upload_id.to_string(),
        is_truncated: false,
        parts: parts
            .into_iter()
            .map(|p| xml::PartEntry {
                part_number: p.part_number,
                last_modified: http_date(p.last_modified),
                etag: format!("\"{}\"", p.etag),
                size: p.size,
            })
            .collect(),
    })
}

pub async fn complete(
    ctx: &HandlerCtx<'_>,
    route: &Route,
    body: Body,
) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let key = ctx.require_key(route)?;
    let upload_id = ctx
        .query
        .get("uploadId")
        .ok_or_else(|| ApiError::invalid_argument("missing uploadId"))?;

    // Assembly concurrency cap
    let Ok(_permit) = ctx.gw.mpu_complete_permits.clone().try_acquire_owned() else {
        return Err(ApiError::SlowDown);
    };

    let upload = ctx
        .gw
        .meta
        .get_upload(upload_id)
        .await
        .map_err(map_meta_error)?
        .ok_or_else(|| ApiError::NoSuchUpload(upload_id.to_string()))?;

    let bytes = super::bucket::read_small_body(body, MAX_COMPLETE_BODY).await?;
    let text = String::from_utf8(bytes)
        .map_err(|_| ApiError::invalid_argument("complete body not utf-8"))?;
    let request: xml::CompleteMultipartUpload = quick_xml::de::from_str(&text)
        .map_err(|e| ApiError::invalid_argument(format!("bad complete document: {e}")))?;
    if request.parts.is_empty() {
        return Err(ApiError::invalid_argument("no parts listed"));
    }

    let mut listed = request.parts;
    listed.sort_by_key(|p| p.part_number);

    let staged = ctx
        .gw
        .meta
        .list_parts(upload_id)
        .await
        .map_err(map_meta_error)?;

    // Verify the client's list against the staged rows and compose the
    // final manifest by splicing part manifests in order.
    let mut manifest = Manifest::default();
    let mut etag_concat = Vec::with_capacity(listed.len() * 16);
    let last_index = listed.len() - 1;
    for (i, part) in listed.iter().enumerate() {
        let staged_part = staged
            .iter()
            .find(|p| p.part_number == part.part_number)
            .ok_or_else(|| {
                ApiError::invalid_argument(format!("part {} not uploaded", part.part_number))
            })?;
        let claimed = part.etag.trim().trim_matches('"');
        if claimed != staged_part.etag {
            return Err(ApiError::invalid_argument(format!(
                "part {} etag mismatch",
                part.part_number
            )));
        }
        if i != last_index && staged_part.size < MIN_PART_SIZE {
            return Err(ApiError::invalid_argument(format!(
                "part {} below minimum size",
                part.part_number
            )));
        }
        let raw = hex::decode(&staged_part.etag)
            .map_err(|_| ApiError::Internal("staged etag not hex".into()))?;
        etag_concat.extend_from_slice(&raw);

        let part_manifest = ctx
            .gw
            .engine
            .get_manifest(&staged_part.version_id)
            .await
            .map_err(map_engine_error)?;
        manifest.append(&part_manifest);
    }

    let composite_etag = format!("{:x}-{}", md5::compute(&etag_concat), listed.len());

    let meta = ctx.gw.meta.clone();
    let outcome: Arc<Mutex<Option<(MutationOutcome, Vec<String>)>>> = Arc::new(Mutex::new(None));
    let outcome_slot = outcome.clone();
    let commit_upload_id = upload_id.to_string();
    let commit_content_type = upload.content_type.clone();

    let result = ctx
        .gw
        .engine
        .put_manifest_with_commit(
            manifest.size,
            composite_etag.clone(),
            manifest.chunks,
            Box::new(move |result, _manifest| {
                Box::pin(async move {
                    let record = VersionRecord {
                        version_id: result.version_id.clone(),
                        etag: result.etag.clone(),
                        size: result.size,
                        last_modified: result.committed_at,
                        content_type: commit_content_type,
                        state: ObjectState::Live,
                        is_null: false,
                        delete_marker: false,
                    };
                    let (outcome, staged) = meta
                        .commit_complete_upload(&commit_upload_id, record)
                        .await
                        .map_err(|e| e.to_string())?;
                    *outcome_slot.lock() = Some((outcome, staged));
                    Ok(())
                })
            }),
        )
        .await
        .map_err(map_engine_error)?;

    let (outcome, staged) = outcome.lock().take().unwrap_or_default();
    // The composed manifest now owns the chunks; the part manifests
    // are dead weight.
    reclaim_staged(ctx, &staged).await;
    let mut response = xml_response(&xml::CompleteMultipartUploadResult {
        location: format!("/{bucket}/{key}"),
        bucket: bucket.to_string(),
        key: key.to_string(),
        etag: format!("\"{}\"", result.etag),
    })?;
    if let Some(version_id) = &outcome.version_id
        && let Ok(value) = http::HeaderValue::from_str(version_id)
    {
        response.headers_mut().insert("x-amz-version-id", value);
    }
    Ok(response)
}

pub async fn abort(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let _bucket = ctx.require_bucket(route)?;
    let upload_id = ctx
        .query
        .get("uploadId")
        .ok_or_else(|| ApiError::invalid_argument("missing uploadId"))?;
    let staged = ctx
        .gw
        .meta
        .abort_upload(upload_id)
        .await
        .map_err(map_meta_error)?;
    reclaim_staged(ctx, &staged).await;
    empty_response(StatusCode::NO_CONTENT)
}

/// Staged part bodies are anonymous engine versions; dropping their
/// manifests makes the bytes eligible for gc. The upload rows are
/// already gone, so a failed drop only delays reclaim.
pub(crate) async fn reclaim_staged(ctx: &HandlerCtx<'_>, staged: &[String]) {
    for version_id in staged {
        if let Err(e) = ctx.gw.engine.delete_version(version_id).await {
            warn!(version_id, error = %e, "failed to reclaim staged part");
        }
    }
}

pub async fn list_uploads(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;

    let prefix = ctx.query.get("prefix").unwrap_or("");
    let delimiter = ctx.query.get("delimiter").filter(|d| !d.is_empty());
    let key_marker = ctx.query.get("key-marker").unwrap_or("");
    let upload_id_marker = ctx.query.get("upload-id-marker").unwrap_or("");
    let max_uploads = match ctx.query.get("max-uploads") {
        None => 1000,
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ApiError::invalid_argument("bad max-uploads"))?
            .min(1000),
    };

    let rows = ctx
        .gw
        .meta
        .list_uploads(bucket)
        .await
        .map_err(map_meta_error)?;

    let mut uploads = Vec::new();
    let mut common_prefixes: Vec<String> = Vec::new();
    let mut truncated = false;
    let mut next_key_marker = None;
    let mut next_upload_id_marker = None;

    for upload in rows {
        if !upload.key.starts_with(prefix) {
            continue;
        }
        // Pair markers: strictly after (key-marker, upload-id-marker)
        if !key_marker.is_empty() {
            if upload.key.as_str() < key_marker {
                continue;
            }
            if upload.key.as_str() == key_marker
                && (upload_id_marker.is_empty() || upload.upload_id.as_str() <= upload_id_marker)
            {
                continue;
            }
        }

        if let Some(delimiter) = delimiter {
            let rest = &upload.key[prefix.len()..];
            if let Some(pos) = rest.find(delimiter) {
                let group = format!("{prefix}{}", &rest[..pos + delimiter.len()]);
                if common_prefixes.last() != Some(&group) {
                    if (uploads.len() + common_prefixes.len()) as u64 >= max_uploads {
                        truncated = true;
                        break;
                    }
                    common_prefixes.push(group);
                }
                continue;
            }
        }

        if (uploads.len() + common_prefixes.len()) as u64 >= max_uploads {
            truncated = true;
            break;
        }
        next_key_marker = Some(upload.key.clone());
        next_upload_id_marker = Some(upload.upload_id.clone());
        uploads.push(xml::UploadEntry {
            key: upload.key,
            upload_id: upload.upload_id,
            initiated: iso_date(upload.initiated_at),
        });
    }

    xml_response(&xml::ListMultipartUploadsResult {
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
        key_marker: (!key_marker.is_empty()).then(|| key_marker.to_string()),
        upload_id_marker: (!upload_id_marker.is_empty()).then(|| upload_id_marker.to_string()),
        next_key_marker: truncated.then_some(next_key_marker).flatten(),
        next_upload_id_marker: truncated.then_some(next_upload_id_marker).flatten(),
        max_uploads,
        delimiter: delimiter.map(str::to_string),
        is_truncated: truncated,
        uploads,
        common_prefixes: common_prefixes
            .into_iter()
            .map(|prefix| xml::CommonPrefix { prefix })
            .collect(),
    })
}
