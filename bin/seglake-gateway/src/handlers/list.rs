//! Bucket listing handlers: ListObjects (v1/v2) and ListObjectVersions

use super::{HandlerCtx, iso_date, xml_response};
use crate::router::Route;
use crate::state::map_meta_error;
use crate::xml;
use axum::response::Response;
use seglake_common::ApiError;

const MAX_KEYS_CAP: u64 = 1000;

struct ListParams<'a> {
    prefix: &'a str,
    delimiter: Option<&'a str>,
    max_keys: u64,
    encode_url: bool,
}

fn common_params<'a>(ctx: &'a HandlerCtx<'_>) -> Result<ListParams<'a>, ApiError> {
    let max_keys = match ctx.query.get("max-keys") {
        None => MAX_KEYS_CAP,
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ApiError::invalid_argument("bad max-keys"))?
            .min(MAX_KEYS_CAP),
    };
    let encode_url = match ctx.query.get("encoding-type") {
        None => false,
        Some("url") => true,
        Some(other) => {
            return Err(ApiError::invalid_argument(format!(
                "unknown encoding-type {other}"
            )));
        }
    };
    Ok(ListParams {
        prefix: ctx.query.get("prefix").unwrap_or(""),
        delimiter: ctx.query.get("delimiter").filter(|d| !d.is_empty()),
        max_keys,
        encode_url,
    })
}

fn encode_key(key: &str, encode_url: bool) -> String {
    if encode_url {
        urlencoding::encode(key).into_owned()
    } else {
        key.to_string()
    }
}

/// Continuation tokens are opaque to clients; the server issues the
/// last emitted key and accepts any raw key as a cursor.
fn decode_token(token: &str) -> String {
    token.to_string()
}

fn encode_token(key: &str) -> String {
    key.to_string()
}

pub async fn list_objects(
    ctx: &HandlerCtx<'_>,
    route: &Route,
    v2: bool,
) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;
    let params = common_params(ctx)?;

    // The scan cursor: strictly-greater keys are emitted
    let continuation = if v2 {
        ctx.query.get("continuation-token").map(decode_token)
    } else {
        ctx.query.get("marker").map(str::to_string)
    };
    let start_after = if v2 {
        ctx.query.get("start-after").map(str::to_string)
    } else {
        None
    };
    let cursor = match (&continuation, &start_after) {
        (Some(c), Some(s)) => Some(c.clone().max(s.clone())),
        (Some(c), None) => Some(c.clone()),
        (None, Some(s)) => Some(s.clone()),
        (None, None) => None,
    };

    let rows = ctx.gw.meta.list_latest(bucket).await.map_err(map_meta_error)?;

    let mut contents = Vec::new();
    let mut common_prefixes: Vec<String> = Vec::new();
    let mut emitted = 0u64;
    let mut truncated = false;
    let mut last_emitted: Option<String> = None;

    for (key, record) in rows {
        if !key.starts_with(params.prefix) {
            continue;
        }
        if let Some(cursor) = &cursor
            && key.as_str() <= cursor.as_str()
        {
            continue;
        }

        // Delimiter grouping: keys whose remainder contains the
        // delimiter fold into a CommonPrefixes entry
        if let Some(delimiter) = params.delimiter {
            let rest = &key[params.prefix.len()..];
            if let Some(pos) = rest.find(delimiter) {
                let group = format!(
                    "{}{}",
                    params.prefix,
                    &rest[..pos + delimiter.len()]
                );
                if common_prefixes.last() != Some(&group) {
                    if emitted >= params.max_keys {
                        truncated = true;
                        break;
                    }
                    common_prefixes.push(group.clone());
                    emitted += 1;
                    last_emitted = Some(key.clone());
                }
                continue;
            }
        }

        if emitted >= params.max_keys {
            truncated = true;
            break;
        }
        contents.push(xml::ObjectEntry {
            key: encode_key(&key, params.encode_url),
            last_modified: iso_date(record.last_modified),
            etag: format!("\"{}\"", record.etag),
            size: record.size,
            storage_class: "STANDARD".to_string(),
        });
        emitted += 1;
        last_emitted = Some(key);
    }

    let common_prefixes: Vec<xml::CommonPrefix> = common_prefixes
        .into_iter()
        .map(|prefix| xml::CommonPrefix {
            prefix: encode_key(&prefix, params.encode_url),
        })
        .collect();

    let result = if v2 {
        xml::ListBucketResult {
            name: bucket.to_string(),
            prefix: params.prefix.to_string(),
            marker: None,
            next_marker: None,
            start_after,
            continuation_token: ctx.query.get("continuation-token").map(str::to_string),
            next_continuation_token: truncated
                .then(|| last_emitted.clone().map(|k| encode_token(&k)))
                .flatten(),
            key_count: Some(emitted),
            max_keys: params.max_keys,
            delimiter: params.delimiter.map(str::to_string),
            encoding_type: params.encode_url.then(|| "url".to_string()),
            is_truncated: truncated,
            contents,
            common_prefixes,
        }
    } else {
        xml::ListBucketResult {
            name: bucket.to_string(),
            prefix: params.prefix.to_string(),
            marker: Some(continuation.unwrap_or_default()),
            next_marker: truncated.then(|| last_emitted.clone()).flatten(),
            start_after: None,
            continuation_token: None,
            next_continuation_token: None,
            key_count: None,
            max_keys: params.max_keys,
            delimiter: params.delimiter.map(str::to_string),
            encoding_type: params.encode_url.then(|| "url".to_string()),
            is_truncated: truncated,
            contents,
            common_prefixes,
        }
    };
    xml_response(&result)
}

pub async fn list_versions(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;
    let params = common_params(ctx)?;

    let key_marker = ctx.query.get("key-marker").unwrap_or("");
    let version_id_marker = ctx.query.get("version-id-marker").unwrap_or("");

    let rows = ctx
        .gw
        .meta
        .list_versions(bucket)
        .await
        .map_err(map_meta_error)?;

    let mut versions = Vec::new();
    let mut delete_markers = Vec::new();
    let mut emitted = 0u64;
    let mut truncated = false;
    let mut last_key: Option<String> = None;
    let mut last_version: Option<String> = None;
    let mut previous_key: Option<&str> = None;
    // Pair-marker scan state: skip until we have passed the marker row
    let mut passed_marker = key_marker.is_empty();

    for (key, record) in &rows {
        let is_latest = previous_key != Some(key.as_str());
        previous_key = Some(key.as_str());

        if !key.starts_with(params.prefix) {
            continue;
        }
        if !passed_marker {
            if key.as_str() < key_marker {
                continue;
            }
            if key.as_str() == key_marker {
                if version_id_marker.is_empty() {
                    passed_marker = true;
                    continue;
                }
                if record.exposed_version_id() == version_id_marker {
                    passed_marker = true;
                }
                continue;
            }
            passed_marker = true;
        }

        if emitted >= params.max_keys {
            truncated = true;
            break;
        }
        let exposed = record.exposed_version_id().to_string();
        if record.delete_marker {
            delete_markers.push(xml::DeleteMarkerEntry {
                key: encode_key(key, params.encode_url),
                version_id: exposed.clone(),
                is_latest,
                last_modified: iso_date(record.last_modified),
            });
        } else {
            versions.push(xml::VersionEntry {
                key: encode_key(key, params.encode_url),
                version_id: exposed.clone(),
                is_latest,
                last_modified: iso_date(record.last_modified),
                etag: format!("\"{}\"", record.etag),
                size: record.size,
            });
        }
        emitted += 1;
        last_key = Some(key.clone());
        last_version = Some(exposed);
    }

    let result = xml::ListVersionsResult {
        name: bucket.to_string(),
        prefix: params.prefix.to_string(),
        key_marker: (!key_marker.is_empty()).then(|| key_marker.to_string()),
        version_id_marker: (!version_id_marker.is_empty()).then(|| version_id_marker.to_string()),
        next_key_marker: truncated.then(|| last_key.clone()).flatten(),
        next_version_id_marker: truncated.then(|| last_version.clone()).flatten(),
        max_keys: params.max_keys,
        is_truncated: truncated,
        versions,
        delete_markers,
    };
    xml_response(&result)
}
