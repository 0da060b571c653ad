//! Object-level handlers: put, get/head, delete, copy

use super::{HandlerCtx, http_date, xml_response};
use crate::body::{
    BodyOptions, body_reader, effective_content_length, is_aws_chunked, parse_content_md5,
};
use crate::range::{
    ByteRange, PreconditionOutcome, Preconditions, evaluate_preconditions, parse_range,
};
use crate::router::Route;
use crate::state::{map_engine_error, map_meta_error};
use crate::xml;
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use parking_lot::Mutex;
use seglake_auth::canonical::uri_decode;
use seglake_common::{ApiError, ObjectKey, ObjectState, VersioningState};
use seglake_meta::{MutationOutcome, VersionRecord};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

type PartStream = Pin<Box<dyn futures::Stream<Item = io::Result<Bytes>> + Send>>;

pub async fn put_object(
    ctx: &HandlerCtx<'_>,
    route: &Route,
    body: Body,
) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let key = ctx.require_key(route)?;
    ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;

    check_overwrite_guard(ctx, bucket, key).await?;

    let chunked = is_aws_chunked(ctx.headers, &ctx.verified.payload);
    let declared = effective_content_length(ctx.headers, chunked)?;
    let max_object_size = ctx.gw.config.limits.max_object_size;
    if max_object_size > 0
        && let Some(declared) = declared
        && declared > max_object_size
    {
        return Err(ApiError::EntityTooLarge {
            max: max_object_size,
        });
    }

    let content_md5 = parse_content_md5(ctx.headers)?;
    let content_type = content_type_of(ctx.headers);

    let options = BodyOptions {
        content_md5,
        // Length-unknown bodies get the limit reader; declared lengths
        // were already checked against the cap above.
        max_object_size: if declared.is_none() { max_object_size } else { 0 },
    };
    let mut reader = body_reader(body, ctx.headers, ctx.verified, options);

    let meta = ctx.gw.meta.clone();
    let outcome: Arc<Mutex<Option<MutationOutcome>>> = Arc::new(Mutex::new(None));
    let outcome_slot = outcome.clone();
    let commit_bucket = bucket.to_string();
    let commit_key = key.to_string();
    let commit_content_type = content_type.clone();

    let result = ctx
        .gw
        .engine
        .put_object_with_commit(
            &mut reader,
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
                    let outcome = meta
                        .commit_put_version(&commit_bucket, &commit_key, record)
                        .await
                        .map_err(|e| e.to_string())?;
                    *outcome_slot.lock() = Some(outcome);
                    Ok(())
                })
            }),
        )
        .await
        .map_err(map_engine_error)?;

    let outcome = outcome.lock().take().unwrap_or_default();
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, quote(&result.etag))
        .header(header::LAST_MODIFIED, http_date(result.committed_at));
    if let Some(version_id) = &outcome.version_id {
        builder = builder.header("x-amz-version-id", version_id);
    }
    builder
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub async fn get_object(
    ctx: &HandlerCtx<'_>,
    route: &Route,
    want_body: bool,
) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let key = ctx.require_key(route)?;
    let bucket_record = ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;

    let version_param = ctx.query.get("versionId");
    let record = ctx
        .gw
        .meta
        .get_object(bucket, key, version_param)
        .await
        .map_err(map_meta_error)?
        .ok_or_else(|| ApiError::NoSuchKey(key.to_string()))?;

    if record.delete_marker {
        return Ok(delete_marker_404(
            ctx,
            bucket,
            key,
            &record,
            bucket_record.versioning,
        ));
    }
    if record.state == ObjectState::Damaged {
        return Err(ApiError::DamagedObject(record.version_id.clone()));
    }

    let preconditions = parse_preconditions(ctx.headers)?;
    match evaluate_preconditions(&preconditions, &record.etag, record.last_modified) {
        PreconditionOutcome::Failed => return Err(ApiError::PreconditionFailed),
        PreconditionOutcome::NotModified => {
            let mut builder = Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(header::ETAG, quote(&record.etag));
            builder = version_header(builder, &record, bucket_record.versioning);
            return builder
                .body(Body::empty())
                .map_err(|e| ApiError::Internal(e.to_string()));
        }
        PreconditionOutcome::Proceed => {}
    }

    // Range handling (GET only; HEAD answers with full-object headers)
    let ranges = if want_body {
        match ctx
            .headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
        {
            Some(raw) => match parse_range(raw, record.size) {
                Ok(ranges) => ranges,
                Err(ApiError::InvalidRange) => {
                    return Ok(unsatisfiable_range_response(ctx, bucket, key, record.size));
                }
                Err(e) => return Err(e),
            },
            None => None,
        }
    } else {
        None
    };

    let mut builder = Response::builder()
        .header(header::ETAG, quote(&record.etag))
        .header(header::LAST_MODIFIED, http_date(record.last_modified))
        .header(header::CONTENT_TYPE, record.content_type.clone())
        .header(header::ACCEPT_RANGES, "bytes");
    builder = version_header(builder, &record, bucket_record.versioning);

    match ranges {
        None => {
            builder = builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, record.size);
            if !want_body {
                return builder
                    .body(Body::empty())
                    .map_err(|e| ApiError::Internal(e.to_string()));
            }
            let reader = ctx
                .gw
                .engine
                .get(&record.version_id)
                .await
                .map_err(map_engine_error)?;
            builder
                .body(Body::from_stream(ReaderStream::new(reader)))
                .map_err(|e| ApiError::Internal(e.to_string()))
        }
        Some(ranges) if ranges.len() == 1 => {
            let range = ranges[0];
            let reader = ctx
                .gw
                .engine
                .get_range(&record.version_id, range.start, range.length)
                .await
                .map_err(map_engine_error)?;
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_RANGE,
                    format!(
                        "bytes {}-{}/{}",
                        range.start,
                        range.end_inclusive(),
                        record.size
                    ),
                )
                .header(header::CONTENT_LENGTH, range.length)
                .body(Body::from_stream(ReaderStream::new(reader)))
                .map_err(|e| ApiError::Internal(e.to_string()))
        }
        Some(ranges) => {
            let boundary = format!("seglake-{}", ctx.request_id);
            let body = multi_range_body(ctx, &record.version_id, record.size, &ranges, &boundary)
                .await?;
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/byteranges; boundary={boundary}"),
                )
                .body(body)
                .map_err(|e| ApiError::Internal(e.to_string()))
        }
    }
}

pub async fn delete_object(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let key = ctx.require_key(route)?;
    ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;

    let version_param = ctx.query.get("versionId");
    let outcome = ctx
        .gw
        .meta
        .commit_delete(bucket, key, version_param)
        .await
        .map_err(map_meta_error)?;

    let mut builder = Response::builder().status(StatusCode::NO_CONTENT);
    if outcome.delete_marker {
        builder = builder.header("x-amz-delete-marker", "true");
    }
    if let Some(version_id) = &outcome.version_id {
        builder = builder.header("x-amz-version-id", version_id);
    }
    builder
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub async fn copy_object(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let key = ctx.require_key(route)?;
    ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;

    let raw_source = ctx
        .headers
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::invalid_argument("missing x-amz-copy-source"))?;
    let (src_bucket, src_key, src_version) = parse_copy_source(raw_source)?;
    ObjectKey::new(&src_key)?;

    ctx.gw
        .meta
        .get_bucket(&src_bucket)
        .await
        .map_err(map_meta_error)?;
    let source = ctx
        .gw
        .meta
        .get_object(&src_bucket, &src_key, src_version.as_deref())
        .await
        .map_err(map_meta_error)?
        .filter(|r| !r.delete_marker)
        .ok_or_else(|| ApiError::NoSuchKey(src_key.clone()))?;
    if source.state == ObjectState::Damaged {
        return Err(ApiError::DamagedObject(source.version_id.clone()));
    }

    check_overwrite_guard(ctx, bucket, key).await?;

    let manifest = ctx
        .gw
        .engine
        .get_manifest(&source.version_id)
        .await
        .map_err(map_engine_error)?;

    let meta = ctx.gw.meta.clone();
    let outcome: Arc<Mutex<Option<MutationOutcome>>> = Arc::new(Mutex::new(None));
    let outcome_slot = outcome.clone();
    let commit_bucket = bucket.to_string();
    let commit_key = key.to_string();
    let commit_content_type = source.content_type.clone();

    let result = ctx
        .gw
        .engine
        .put_manifest_with_commit(
            manifest.size,
            source.etag.clone(),
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
                    let outcome = meta
                        .commit_put_version(&commit_bucket, &commit_key, record)
                        .await
                        .map_err(|e| e.to_string())?;
                    *outcome_slot.lock() = Some(outcome);
                    Ok(())
                })
            }),
        )
        .await
        .map_err(map_engine_error)?;

    let outcome = outcome.lock().take().unwrap_or_default();
    let mut response = xml_response(&xml::CopyObjectResult {
        etag: quote(&result.etag),
        last_modified: super::iso_date(result.committed_at),
    })?;
    if let Some(version_id) = &outcome.version_id
        && let Ok(value) = HeaderValue::from_str(version_id)
    {
        response.headers_mut().insert("x-amz-version-id", value);
    }
    Ok(response)
}

// --- helpers --------------------------------------------------------------

fn quote(etag: &str) -> String {
    format!("\"{etag}\"")
}

fn content_type_of(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// `If-Match` gating for buckets configured to require it on overwrite.
async fn check_overwrite_guard(
    ctx: &HandlerCtx<'_>,
    bucket: &str,
    key: &str,
) -> Result<(), ApiError> {
    if !ctx
        .gw
        .config
        .limits
        .require_if_match_buckets
        .iter()
        .any(|b| b == bucket)
    {
        return Ok(());
    }
    let existing = ctx
        .gw
        .meta
        .get_object(bucket, key, None)
        .await
        .map_err(map_meta_error)?
        .filter(|r| !r.delete_marker);
    let Some(existing) = existing else {
        return Ok(());
    };
    let Some(if_match) = ctx.headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok()) else {
        return Err(ApiError::PreconditionFailed);
    };
    let candidate = if_match.trim().trim_matches('"');
    if candidate == "*" || candidate == existing.etag {
        Ok(())
    } else {
        Err(ApiError::PreconditionFailed)
    }
}

fn parse_preconditions(headers: &HeaderMap) -> Result<Preconditions<'_>, ApiError> {
    let get = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
    let parse_date = |raw: Option<&str>| -> Option<DateTime<Utc>> {
        raw.and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    Ok(Preconditions {
        if_match: get(header::IF_MATCH),
        if_none_match: get(header::IF_NONE_MATCH),
        if_modified_since: parse_date(get(header::IF_MODIFIED_SINCE)),
        if_unmodified_since: parse_date(get(header::IF_UNMODIFIED_SINCE)),
    })
}

fn version_header(
    builder: http::response::Builder,
    record: &VersionRecord,
    versioning: VersioningState,
) -> http::response::Builder {
    match versioning {
        VersioningState::Disabled => builder,
        VersioningState::Enabled | VersioningState::Suspended => {
            builder.header("x-amz-version-id", record.exposed_version_id())
        }
    }
}

/// The 404 a delete marker produces, with its marker headers.
fn delete_marker_404(
    ctx: &HandlerCtx<'_>,
    bucket: &str,
    key: &str,
    record: &VersionRecord,
    versioning: VersioningState,
) -> Response {
    let mut response = crate::pipeline::error_response(
        &ApiError::NoSuchKey(key.to_string()),
        &format!("/{bucket}/{key}"),
        ctx.request_id,
    );
    response
        .headers_mut()
        .insert("x-amz-delete-marker", HeaderValue::from_static("true"));
    if versioning != VersioningState::Disabled
        && let Ok(value) = HeaderValue::from_str(record.exposed_version_id())
    {
        response.headers_mut().insert("x-amz-version-id", value);
    }
    response
}

/// 416 with the `bytes */size` content range.
fn unsatisfiable_range_response(
    ctx: &HandlerCtx<'_>,
    bucket: &str,
    key: &str,
    size: u64,
) -> Response {
    let mut response = crate::pipeline::error_response(
        &ApiError::InvalidRange,
        &format!("/{bucket}/{key}"),
        ctx.request_id,
    );
    if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    response
}

/// Assemble a `multipart/byteranges` body: each part streams straight
/// from the engine, so large multi-range reads never buffer fully.
async fn multi_range_body(
    ctx: &HandlerCtx<'_>,
    version_id: &str,
    size: u64,
    ranges: &[ByteRange],
    boundary: &str,
) -> Result<Body, ApiError> {
    let mut parts: Vec<PartStream> = Vec::with_capacity(ranges.len() * 3 + 1);
    for range in ranges {
        let head = format!(
            "--{boundary}\r\nContent-Type: application/octet-stream\r\n\
             Content-Range: bytes {}-{}/{size}\r\n\r\n",
            range.start,
            range.end_inclusive(),
        );
        parts.push(Box::pin(futures::stream::once(async move {
            Ok(Bytes::from(head))
        })));
        let reader = ctx
            .gw
            .engine
            .get_range(version_id, range.start, range.length)
            .await
            .map_err(map_engine_error)?;
        parts.push(Box::pin(ReaderStream::new(reader)));
        parts.push(Box::pin(futures::stream::once(async {
            Ok(Bytes::from_static(b"\r\n"))
        })));
    }
    let tail = format!("--{boundary}--\r\n");
    parts.push(Box::pin(futures::stream::once(async move {
        Ok(Bytes::from(tail))
    })));
    Ok(Body::from_stream(futures::stream::iter(parts).flatten()))
}

/// `X-Amz-Copy-Source: /srcBucket/srcKey[?versionId=...]`, percent
/// decoded.
fn parse_copy_source(raw: &str) -> Result<(String, String, Option<String>), ApiError> {
    let (path, query) = raw.split_once('?').unwrap_or((raw, ""));
    let decoded = uri_decode(path);
    let trimmed = decoded.trim_start_matches('/');
    let (bucket, key) = trimmed
        .split_once('/')
        .ok_or_else(|| ApiError::invalid_argument("bad x-amz-copy-source"))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(ApiError::invalid_argument("bad x-amz-copy-source"));
    }
    let version = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("versionId="))
        .map(uri_decode);
    Ok((bucket.to_string(), key.to_string(), version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_copy_source() {
        let (b, k, v) = parse_copy_source("/src-bucket/path/to%20key").unwrap();
        assert_eq!(b, "src-bucket");
        assert_eq!(k, "path/to key");
        assert_eq!(v, None);

        let (_, _, v) = parse_copy_source("src/key?versionId=123-456").unwrap();
        assert_eq!(v.as_deref(), Some("123-456"));

        assert!(parse_copy_source("/only-bucket").is_err());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("abc"), "\"abc\"");
    }
}
