//! Operation handlers

pub mod bucket;
pub mod list;
pub mod multipart;
pub mod object;
pub mod ops;

use crate::router::{Query, Route};
use crate::state::Gateway;
use axum::body::Body;
use axum::response::Response;
use http::HeaderMap;
use seglake_auth::Action;
use seglake_auth::sigv4::VerifiedRequest;
use seglake_common::{ApiError, ObjectKey};
use seglake_meta::MaintenanceState;
use std::sync::Arc;

/// Per-request context handed to every handler.
pub struct HandlerCtx<'a> {
    pub gw: &'a Arc<Gateway>,
    pub request_id: &'a str,
    pub verified: &'a VerifiedRequest,
    pub query: &'a Query,
    pub headers: &'a HeaderMap,
    pub maintenance: MaintenanceState,
}

impl HandlerCtx<'_> {
    /// The bucket of `route`, or the error the responder expects.
    pub fn require_bucket<'r>(&self, route: &'r Route) -> Result<&'r str, ApiError> {
        route
            .bucket
            .as_deref()
            .ok_or_else(|| ApiError::invalid_request("bucket required"))
    }

    /// The key of `route`, validated against the S3 key rules.
    pub fn require_key<'r>(&self, route: &'r Route) -> Result<&'r str, ApiError> {
        let key = route
            .key
            .as_deref()
            .ok_or_else(|| ApiError::invalid_request("key required"))?;
        ObjectKey::new(key)?;
        Ok(key)
    }
}

/// Route one resolved request to its handler.
pub async fn dispatch(
    ctx: &HandlerCtx<'_>,
    route: &Route,
    body: Body,
) -> Result<Response, ApiError> {
    match route.op {
        Action::ListBuckets => bucket::list_buckets(ctx).await,
        Action::CreateBucket => bucket::create_bucket(ctx, route).await,
        Action::DeleteBucket => bucket::delete_bucket(ctx, route).await,
        Action::HeadBucket => bucket::head_bucket(ctx, route).await,
        Action::GetBucketLocation => bucket::get_location(ctx, route).await,
        Action::GetBucketVersioning => bucket::get_versioning(ctx, route).await,
        Action::PutBucketVersioning => bucket::put_versioning(ctx, route, body).await,
        Action::GetBucketPolicy => bucket::get_policy(ctx, route).await,
        Action::PutBucketPolicy => bucket::put_policy(ctx, route, body).await,
        Action::DeleteBucketPolicy => bucket::delete_policy(ctx, route).await,

        Action::ListV1 => list::list_objects(ctx, route, false).await,
        Action::ListV2 => list::list_objects(ctx, route, true).await,
        Action::ListVersions => list::list_versions(ctx, route).await,

        Action::Put => object::put_object(ctx, route, body).await,
        Action::Get => object::get_object(ctx, route, true).await,
        Action::Head => object::get_object(ctx, route, false).await,
        Action::Delete => object::delete_object(ctx, route).await,
        Action::Copy => object::copy_object(ctx, route).await,

        Action::MpuInitiate => multipart::initiate(ctx, route).await,
        Action::MpuUploadPart => multipart::upload_part(ctx, route, body).await,
        Action::MpuListParts => multipart::list_parts(ctx, route).await,
        Action::MpuComplete => multipart::complete(ctx, route, body).await,
        Action::MpuAbort => multipart::abort(ctx, route).await,
        Action::MpuListUploads => multipart::list_uploads(ctx, route).await,

        Action::MetaStats => ops::meta_stats(ctx).await,
        Action::OpsRun => ops::ops_run(ctx, body).await,
        Action::ReplOplog => ops::repl_oplog(ctx).await,
        Action::ReplOplogApply => ops::repl_oplog_apply(ctx, body).await,
        Action::ReplManifest => ops::repl_manifest(ctx).await,
        Action::ReplChunk => ops::repl_chunk(ctx).await,

        Action::Options => Err(ApiError::invalid_request("options handled by pipeline")),
    }
}

/// 200 XML response helper.
pub fn xml_response<T: serde::Serialize>(value: &T) -> Result<Response, ApiError> {
    let body = crate::xml::to_xml(value).map_err(|e| ApiError::Internal(e.to_string()))?;
    Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/xml")
        .body(Body::from(body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Empty-body response helper.
pub fn empty_response(status: http::StatusCode) -> Result<Response, ApiError> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Format a timestamp the way `Last-Modified` wants it.
#[must_use]
pub fn http_date(t: chrono::DateTime<chrono::Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Format a timestamp the way list XML wants it.
#[must_use]
pub fn iso_date(t: chrono::DateTime<chrono::Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
