//! The request pipeline
//!
//! Every request passes the same stages in a fixed order; a failing
//! stage short-circuits to the single error responder. Stage order is
//! semantic (the replay check must see the authenticated request, the
//! maintenance gate must fire before auth work), so this is one
//! explicit function rather than a middleware stack.

use crate::handlers::{self, HandlerCtx};
use crate::router::{self, Query, Route};
use crate::state::{Gateway, map_auth_error};
use crate::xml;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use chrono::Utc;
use http::{HeaderMap, HeaderValue, Request, StatusCode};
use seglake_auth::replay::{header_fingerprint, presigned_fingerprint};
use seglake_auth::sigv4::VerifiedRequest;
use seglake_auth::{Action, Decision, Policy, RequestCtx};
use seglake_common::ApiError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Entry point: the router's fallback service.
#[axum::debug_handler]
pub async fn handle(State(gw): State<Arc<Gateway>>, request: Request<Body>) -> Response {
    let request_id = hex::encode(rand::random::<[u8; 8]>());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let raw_query = request.uri().query().unwrap_or("").to_string();

    info!(
        %method,
        target = %redacted_target(&path, &raw_query),
        request_id,
        "request"
    );

    let mut op: &'static str = "invalid_request";
    let mut bucket = None;
    let mut key = None;
    let mut access_key = None;
    let mut source_ip = None;

    let result = process(
        &gw,
        request,
        &request_id,
        &mut op,
        &mut bucket,
        &mut key,
        &mut access_key,
        &mut source_ip,
    )
    .await;

    let mut response = match result {
        Ok(response) => response,
        Err(err) => {
            // Every AccessDenied / SignatureDoesNotMatch exit consumes
            // a failure token.
            if matches!(err, ApiError::AccessDenied | ApiError::SignatureDoesNotMatch) {
                gw.failure_limiter
                    .observe_failure(source_ip, access_key.as_deref(), Instant::now());
            }
            let resource = match (&bucket, &key) {
                (Some(b), Some(k)) => format!("/{b}/{k}"),
                (Some(b), None) => format!("/{b}"),
                _ => path.clone(),
            };
            error_response(&err, &resource, &request_id)
        }
    };

    apply_base_headers(response.headers_mut(), &gw, &request_id);

    gw.metrics
        .record(op, response.status().as_u16(), bucket.as_deref(), key.as_deref());
    response
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
async fn process(
    gw: &Arc<Gateway>,
    request: Request<Body>,
    request_id: &str,
    op: &mut &'static str,
    bucket_out: &mut Option<String>,
    key_out: &mut Option<String>,
    access_key_out: &mut Option<String>,
    source_ip_out: &mut Option<IpAddr>,
) -> Result<Response, ApiError> {
    // Stage 2: URL length cap
    let url_len = request.uri().to_string().len();
    if gw.config.limits.max_url_length > 0 && url_len > gw.config.limits.max_url_length {
        return Err(ApiError::invalid_request("url too long"));
    }

    // Stage 8a: route resolution (needed early to classify the write
    // plane for the maintenance gate)
    let raw_query = request.uri().query().unwrap_or("").to_string();
    let query = Query::parse(&raw_query);
    let host = request
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let route = router::resolve(
        request.method(),
        request.uri().path(),
        &query,
        host.as_deref(),
        gw.config.virtual_hosted,
    )?;
    let route = router::reclassify_copy(route, request.headers().contains_key("x-amz-copy-source"));
    *op = route.op.as_str();
    bucket_out.clone_from(&route.bucket);
    key_out.clone_from(&route.key);

    if route.op == Action::Options {
        return Ok(preflight_response());
    }

    // Stage 3: maintenance gate
    let maintenance = gw
        .meta
        .maintenance_state()
        .await
        .map_err(crate::state::map_meta_error)?;
    if maintenance.gates_writes() && route.op.is_write() {
        return Err(ApiError::ServiceUnavailable("maintenance in progress".into()));
    }

    // Stage 4: authentication
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    *source_ip_out = ip;
    let verified = match gw.verifier.verify(&request, Utc::now()).await {
        Ok(verified) => verified,
        Err(err) => {
            debug!(error = %err, "authentication failed");
            return Err(map_auth_error(&err));
        }
    };
    *access_key_out = Some(verified.access_key.clone());

    // Stage 5: replay suppression
    let fingerprint = if verified.presigned {
        Some(presigned_fingerprint(
            &verified.seed_signature,
            request.method().as_str(),
            request.uri().path(),
            &raw_query,
        ))
    } else {
        request
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|auth| {
                header_fingerprint(
                    auth,
                    &verified.amz_date,
                    request.method().as_str(),
                    request.uri().path(),
                )
            })
    };
    if let Some(fingerprint) = fingerprint
        && !gw.replay.allow(&fingerprint, Instant::now())
    {
        gw.metrics.replay_detected();
        if gw.config.replay.hard_block {
            return Err(ApiError::SignatureDoesNotMatch);
        }
    }

    // Stage 6: auth-failure token buckets
    if !gw
        .failure_limiter
        .allow(ip, Some(verified.access_key.as_str()), Instant::now())
    {
        return Err(ApiError::AccessDenied);
    }

    // Stage 7: in-flight limiter for the write plane
    let _write_permit = if route.op.is_write() {
        match gw.write_permits.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => return Err(ApiError::SlowDown),
        }
    } else {
        None
    };

    // Stage 8b: policy authorization
    authorize(gw, &route, &verified, &query, request.headers(), ip).await?;

    // Stage 9: the operation handler
    let (parts, body) = request.into_parts();
    let ctx = HandlerCtx {
        gw,
        request_id,
        verified: &verified,
        query: &query,
        headers: &parts.headers,
        maintenance,
    };
    handlers::dispatch(&ctx, &route, body).await
}

/// Resolve the effective policy set and evaluate it for this request.
async fn authorize(
    gw: &Arc<Gateway>,
    route: &Route,
    verified: &VerifiedRequest,
    query: &Query,
    headers: &HeaderMap,
    ip: Option<IpAddr>,
) -> Result<(), ApiError> {
    let bucket = route.bucket.as_deref().unwrap_or("");
    let key = route.key.as_deref().unwrap_or("");

    // Bucket deny-list beats policy evaluation
    if !bucket.is_empty()
        && let Ok(allowed) = gw
            .meta
            .key_allowed_for_bucket(&verified.access_key, bucket)
            .await
        && !allowed
    {
        return Err(ApiError::AccessDenied);
    }

    let key_policy = if verified.access_key == gw.config.auth.root_access_key {
        Policy::allow_all()
    } else {
        let record = gw
            .meta
            .lookup_api_secret(&verified.access_key)
            .await
            .map_err(crate::state::map_meta_error)?;
        match record.and_then(|r| r.policy) {
            Some(doc) => Policy::parse(&doc)
                .map_err(|e| ApiError::Internal(format!("bound policy unparseable: {e}")))?,
            None => Policy::allow_all(),
        }
    };

    let header_map = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let ctx = RequestCtx {
        source_ip: ip,
        now: Some(Utc::now()),
        headers: header_map,
        query_prefix: query.get("prefix"),
        query_delimiter: query.get("delimiter"),
        secure_transport: false,
    };

    let mut decision = key_policy.decide(route.op, bucket, key, &ctx);

    if !bucket.is_empty()
        && let Ok(Some(doc)) = gw.meta.get_bucket_policy(bucket).await
    {
        match Policy::parse(&doc) {
            Ok(policy) => {
                decision = Decision::union(decision, policy.decide(route.op, bucket, key, &ctx));
            }
            Err(e) => {
                debug!(bucket, error = %e, "stored bucket policy unparseable; ignoring");
            }
        }
    }

    if decision.permits() {
        Ok(())
    } else {
        Err(ApiError::AccessDenied)
    }
}

/// CORS preflight response.
fn preflight_response() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header("Allow", "GET, HEAD, PUT, POST, DELETE, OPTIONS")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, HEAD, PUT, POST, DELETE")
        .header("Access-Control-Allow-Headers", "*")
        .body(Body::empty())
        .unwrap_or_default()
}

/// Shape an error into the standard XML document.
#[must_use]
pub fn error_response(err: &ApiError, resource: &str, request_id: &str) -> Response {
    let document = xml::ErrorDocument {
        code: err.code().to_string(),
        message: err.to_string(),
        resource: resource.to_string(),
        request_id: request_id.to_string(),
    };
    let body = xml::to_xml(&document).unwrap_or_default();
    let mut builder = Response::builder()
        .status(err.status())
        .header(http::header::CONTENT_TYPE, "application/xml");
    if let Some(x_error) = err.x_error() {
        builder = builder.header("X-Error", x_error);
    }
    builder.body(Body::from(body)).unwrap_or_default()
}

/// Base response headers present on every exit.
pub fn apply_base_headers(headers: &mut HeaderMap, gw: &Gateway, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert("x-amz-request-id", value);
    }
    if let Ok(value) = HeaderValue::from_str(&gw.host_id) {
        headers.insert("x-amz-id-2", value);
    }
    if let Ok(value) = HeaderValue::from_str(&gw.region) {
        headers.insert("x-amz-bucket-region", value);
    }
}

/// Access-log target with signature material redacted.
fn redacted_target(path: &str, raw_query: &str) -> String {
    if raw_query.is_empty() {
        return path.to_string();
    }
    let redacted: Vec<String> = raw_query
        .split('&')
        .map(|pair| {
            let (k, _) = pair.split_once('=').unwrap_or((pair, ""));
            if k.eq_ignore_ascii_case("X-Amz-Signature") || k.eq_ignore_ascii_case("X-Amz-Credential")
            {
                format!("{k}=REDACTED")
            } else {
                pair.to_string()
            }
        })
        .collect();
    format!("{path}?{}", redacted.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction() {
        let target = redacted_target(
            "/b/k",
            "X-Amz-Credential=AK%2F20240101&X-Amz-Signature=deadbeef&X-Amz-Expires=600",
        );
        assert_eq!(
            target,
            "/b/k?X-Amz-Credential=REDACTED&X-Amz-Signature=REDACTED&X-Amz-Expires=600"
        );
    }

    #[test]
    fn test_error_response_shape() {
        let response = error_response(&ApiError::NoSuchKey("k".into()), "/b/k", "reqid");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = error_response(&ApiError::DamagedObject("v".into()), "/b/k", "reqid");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get("X-Error").unwrap(),
            "DamagedObject"
        );
    }
}
