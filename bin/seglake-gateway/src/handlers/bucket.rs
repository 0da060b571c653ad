//! Bucket-level handlers

use super::{HandlerCtx, empty_response, iso_date, xml_response};
use crate::router::Route;
use crate::state::map_meta_error;
use crate::xml;
use axum::body::Body;
use axum::response::Response;
use http::StatusCode;
use http_body_util::BodyExt;
use seglake_common::{ApiError, BucketName, VersioningState};

const MAX_POLICY_BYTES: usize = 64 * 1024;

pub async fn list_buckets(ctx: &HandlerCtx<'_>) -> Result<Response, ApiError> {
    let buckets = ctx.gw.meta.list_buckets().await.map_err(map_meta_error)?;
    let result = xml::ListAllMyBucketsResult {
        owner: xml::Owner {
            id: ctx.verified.access_key.clone(),
            display_name: ctx.verified.access_key.clone(),
        },
        buckets: xml::Buckets {
            bucket: buckets
                .into_iter()
                .map(|b| xml::BucketEntry {
                    name: b.name,
                    creation_date: iso_date(b.created_at),
                })
                .collect(),
        },
    };
    xml_response(&result)
}

pub async fn create_bucket(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let name = BucketName::new(bucket)?;

    let versioning = match ctx.headers.get("x-seglake-versioning") {
        None => VersioningState::Disabled,
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ApiError::invalid_argument("bad x-seglake-versioning"))?;
            VersioningState::from_header(value)
                .ok_or_else(|| ApiError::invalid_argument("bad x-seglake-versioning"))?
        }
    };

    ctx.gw
        .meta
        .create_bucket(name.as_str(), versioning)
        .await
        .map_err(map_meta_error)?;
    empty_response(StatusCode::OK)
}

pub async fn delete_bucket(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    ctx.gw
        .meta
        .delete_bucket(bucket)
        .await
        .map_err(map_meta_error)?;
    empty_response(StatusCode::NO_CONTENT)
}

pub async fn head_bucket(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;
    empty_response(StatusCode::OK)
}

pub async fn get_location(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    ctx.gw.meta.get_bucket(bucket).await.map_err(map_meta_error)?;
    xml_response(&xml::LocationConstraint {
        region: ctx.gw.region.clone(),
    })
}

pub async fn get_versioning(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let state = ctx
        .gw
        .meta
        .get_bucket_versioning(bucket)
        .await
        .map_err(map_meta_error)?;
    xml_response(&xml::VersioningConfigurationOut {
        status: state.as_status().map(str::to_string),
    })
}

pub async fn put_versioning(
    ctx: &HandlerCtx<'_>,
    route: &Route,
    body: Body,
) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let bytes = read_small_body(body, MAX_POLICY_BYTES).await?;
    let text = String::from_utf8(bytes)
        .map_err(|_| ApiError::invalid_argument("versioning body not utf-8"))?;
    let parsed: xml::VersioningConfigurationIn = quick_xml::de::from_str(&text)
        .map_err(|e| ApiError::invalid_argument(format!("bad versioning document: {e}")))?;
    let state = match parsed.status.as_deref() {
        Some("Enabled") => VersioningState::Enabled,
        Some("Suspended") => VersioningState::Suspended,
        None => VersioningState::Disabled,
        Some(other) => {
            return Err(ApiError::invalid_argument(format!(
                "unknown versioning status {other}"
            )));
        }
    };
    ctx.gw
        .meta
        .set_bucket_versioning(bucket, state)
        .await
        .map_err(map_meta_error)?;
    empty_response(StatusCode::OK)
}

pub async fn get_policy(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let policy = ctx
        .gw
        .meta
        .get_bucket_policy(bucket)
        .await
        .map_err(map_meta_error)?
        .ok_or_else(|| ApiError::NoSuchBucketPolicy(bucket.to_string()))?;
    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(policy))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

pub async fn put_policy(
    ctx: &HandlerCtx<'_>,
    route: &Route,
    body: Body,
) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    let bytes = read_small_body(body, MAX_POLICY_BYTES).await?;
    let text =
        String::from_utf8(bytes).map_err(|_| ApiError::invalid_argument("policy not utf-8"))?;
    // Reject unparseable documents now, not at evaluation time
    seglake_auth::Policy::parse(&text)
        .map_err(|e| ApiError::invalid_argument(format!("bad policy: {e}")))?;
    ctx.gw
        .meta
        .set_bucket_policy(bucket, &text)
        .await
        .map_err(map_meta_error)?;
    empty_response(StatusCode::NO_CONTENT)
}

pub async fn delete_policy(ctx: &HandlerCtx<'_>, route: &Route) -> Result<Response, ApiError> {
    let bucket = ctx.require_bucket(route)?;
    ctx.gw
        .meta
        .delete_bucket_policy(bucket)
        .await
        .map_err(map_meta_error)?;
    empty_response(StatusCode::NO_CONTENT)
}

/// Buffer a small control-plane body with a hard cap.
pub async fn read_small_body(body: Body, max: usize) -> Result<Vec<u8>, ApiError> {
    let bytes = BodyExt::collect(body)
        .await
        .map_err(|e| ApiError::invalid_request(format!("body read failed: {e}")))?
        .to_bytes();
    if bytes.len() > max {
        return Err(ApiError::EntityTooLarge { max: max as u64 });
    }
    Ok(bytes.to_vec())
}
