//! Routing dispatcher
//!
//! Resolves `(bucket, key, operation)` from method + path + query +
//! Host. Path-style and virtual-hosted-style addressing are both
//! supported; when both carry a bucket and disagree, the host label
//! wins and the path is treated as the full key.

use seglake_auth::Action;
use seglake_auth::canonical::{parse_query, uri_decode};
use seglake_common::ApiError;

/// Decoded query pairs with flag helpers.
#[derive(Debug, Default, Clone)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self {
            pairs: parse_query(raw),
        }
    }

    /// Present at all, value or not (`?versioning` counts).
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// A resolved route.
#[derive(Debug, Clone)]
pub struct Route {
    pub op: Action,
    pub bucket: Option<String>,
    pub key: Option<String>,
}

impl Route {
    fn service(op: Action) -> Self {
        Self {
            op,
            bucket: None,
            key: None,
        }
    }

    fn bucket(op: Action, bucket: String) -> Self {
        Self {
            op,
            bucket: Some(bucket),
            key: None,
        }
    }

    fn object(op: Action, bucket: String, key: String) -> Self {
        Self {
            op,
            bucket: Some(bucket),
            key: Some(key),
        }
    }
}

/// Extract the bucket from the Host header under virtual-hosted
/// addressing: first label of a dotted, non-IP host.
fn host_bucket(host: &str) -> Option<String> {
    let host = host.rsplit_once(':').map_or(host, |(h, _)| h);
    let host = host.trim_end_matches('.');
    if host.parse::<std::net::IpAddr>().is_ok() {
        return None;
    }
    let (label, rest) = host.split_once('.')?;
    if label.is_empty() || rest.is_empty() {
        return None;
    }
    Some(label.to_ascii_lowercase())
}

/// Resolve `(bucket, key)` and the operation for one request.
pub fn resolve(
    method: &http::Method,
    path: &str,
    query: &Query,
    host: Option<&str>,
    virtual_hosted: bool,
) -> Result<Route, ApiError> {
    // Internal surfaces before any bucket interpretation
    if let Some(route) = resolve_internal(method, path, query)? {
        return Ok(route);
    }

    if method == http::Method::OPTIONS {
        return Ok(Route::service(Action::Options));
    }

    let vh_bucket = if virtual_hosted {
        host.and_then(host_bucket)
    } else {
        None
    };

    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let (bucket, key) = if let Some(bucket) = vh_bucket {
        // Host label wins; the whole path is the key
        let key = uri_decode(trimmed);
        (Some(bucket), (!key.is_empty()).then_some(key))
    } else if trimmed.is_empty() {
        (None, None)
    } else {
        let (bucket, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        let key = uri_decode(rest);
        (
            Some(bucket.to_ascii_lowercase()),
            (!key.is_empty()).then_some(key),
        )
    };

    match (method, bucket, key) {
        // Service level
        (&http::Method::GET, None, None) => Ok(Route::service(Action::ListBuckets)),

        // Bucket level
        (&http::Method::GET, Some(b), None) => {
            if query.has("list-type") {
                if query.get("list-type") != Some("2") {
                    return Err(ApiError::invalid_argument("unsupported list-type"));
                }
                Ok(Route::bucket(Action::ListV2, b))
            } else if query.has("location") {
                Ok(Route::bucket(Action::GetBucketLocation, b))
            } else if query.has("versioning") {
                Ok(Route::bucket(Action::GetBucketVersioning, b))
            } else if query.has("policy") {
                Ok(Route::bucket(Action::GetBucketPolicy, b))
            } else if query.has("versions") {
                Ok(Route::bucket(Action::ListVersions, b))
            } else if query.has("uploads") {
                Ok(Route::bucket(Action::MpuListUploads, b))
            } else {
                Ok(Route::bucket(Action::ListV1, b))
            }
        }
        (&http::Method::PUT, Some(b), None) => {
            if query.has("versioning") {
                Ok(Route::bucket(Action::PutBucketVersioning, b))
            } else if query.has("policy") {
                Ok(Route::bucket(Action::PutBucketPolicy, b))
            } else {
                Ok(Route::bucket(Action::CreateBucket, b))
            }
        }
        (&http::Method::DELETE, Some(b), None) => {
            if query.has("policy") {
                Ok(Route::bucket(Action::DeleteBucketPolicy, b))
            } else {
                Ok(Route::bucket(Action::DeleteBucket, b))
            }
        }
        (&http::Method::HEAD, Some(b), None) => Ok(Route::bucket(Action::HeadBucket, b)),

        // Object level
        (&http::Method::PUT, Some(b), Some(k)) => {
            if query.has("uploadId") && query.has("partNumber") {
                Ok(Route::object(Action::MpuUploadPart, b, k))
            } else {
                Ok(Route::object(Action::Put, b, k))
            }
        }
        (&http::Method::GET, Some(b), Some(k)) => {
            if query.has("uploadId") {
                Ok(Route::object(Action::MpuListParts, b, k))
            } else {
                Ok(Route::object(Action::Get, b, k))
            }
        }
        (&http::Method::HEAD, Some(b), Some(k)) => Ok(Route::object(Action::Head, b, k)),
        (&http::Method::DELETE, Some(b), Some(k)) => {
            if query.has("uploadId") {
                Ok(Route::object(Action::MpuAbort, b, k))
            } else {
                Ok(Route::object(Action::Delete, b, k))
            }
        }
        (&http::Method::POST, Some(b), Some(k)) => {
            if query.has("uploads") {
                Ok(Route::object(Action::MpuInitiate, b, k))
            } else if query.has("uploadId") {
                Ok(Route::object(Action::MpuComplete, b, k))
            } else {
                Err(ApiError::MethodNotAllowed("POST".to_string()))
            }
        }

        (method, _, _) => Err(ApiError::MethodNotAllowed(method.to_string())),
    }
}

/// Copy is a PUT-object with `X-Amz-Copy-Source`; the router cannot see
/// headers, so the pipeline reclassifies after header inspection.
#[must_use]
pub fn reclassify_copy(route: Route, has_copy_source: bool) -> Route {
    if route.op == Action::Put && has_copy_source {
        Route {
            op: Action::Copy,
            ..route
        }
    } else {
        route
    }
}

fn resolve_internal(
    method: &http::Method,
    path: &str,
    _query: &Query,
) -> Result<Option<Route>, ApiError> {
    if !path.starts_with("/v1/") {
        return Ok(None);
    }
    let route = match (method, path) {
        (&http::Method::GET, p) if p.starts_with("/v1/meta/stats") => {
            Route::service(Action::MetaStats)
        }
        (&http::Method::POST, "/v1/ops/run") => Route::service(Action::OpsRun),
        (&http::Method::GET, "/v1/replication/oplog") => Route::service(Action::ReplOplog),
        (&http::Method::POST, "/v1/replication/oplog/apply") => {
            Route::service(Action::ReplOplogApply)
        }
        (&http::Method::GET, "/v1/replication/manifest") => Route::service(Action::ReplManifest),
        (&http::Method::GET, "/v1/replication/chunk") => Route::service(Action::ReplChunk),
        _ => return Err(ApiError::invalid_request("unknown internal route")),
    };
    Ok(Some(route))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn route(method: Method, path: &str, raw_query: &str) -> Route {
        resolve(&method, path, &Query::parse(raw_query), None, false).unwrap()
    }

    #[test]
    fn test_service_level() {
        assert_eq!(route(Method::GET, "/", "").op, Action::ListBuckets);
    }

    #[test]
    fn test_bucket_query_flags() {
        assert_eq!(route(Method::GET, "/b", "list-type=2").op, Action::ListV2);
        assert_eq!(route(Method::GET, "/b", "location").op, Action::GetBucketLocation);
        assert_eq!(route(Method::GET, "/b", "versioning").op, Action::GetBucketVersioning);
        assert_eq!(route(Method::PUT, "/b", "versioning").op, Action::PutBucketVersioning);
        assert_eq!(route(Method::GET, "/b", "policy").op, Action::GetBucketPolicy);
        assert_eq!(route(Method::PUT, "/b", "policy").op, Action::PutBucketPolicy);
        assert_eq!(route(Method::DELETE, "/b", "policy").op, Action::DeleteBucketPolicy);
        assert_eq!(route(Method::GET, "/b", "versions").op, Action::ListVersions);
        assert_eq!(route(Method::GET, "/b", "uploads").op, Action::MpuListUploads);
        assert_eq!(route(Method::GET, "/b", "").op, Action::ListV1);
        assert_eq!(route(Method::PUT, "/b", "").op, Action::CreateBucket);
        assert_eq!(route(Method::HEAD, "/b", "").op, Action::HeadBucket);
        assert_eq!(route(Method::DELETE, "/b", "").op, Action::DeleteBucket);
    }

    #[test]
    fn test_object_level() {
        let r = route(Method::PUT, "/b/path/to/key", "");
        assert_eq!(r.op, Action::Put);
        assert_eq!(r.bucket.as_deref(), Some("b"));
        assert_eq!(r.key.as_deref(), Some("path/to/key"));

        assert_eq!(
            route(Method::PUT, "/b/k", "uploadId=u&partNumber=1").op,
            Action::MpuUploadPart
        );
        assert_eq!(route(Method::GET, "/b/k", "uploadId=u").op, Action::MpuListParts);
        assert_eq!(route(Method::GET, "/b/k", "").op, Action::Get);
        assert_eq!(route(Method::HEAD, "/b/k", "").op, Action::Head);
        assert_eq!(route(Method::DELETE, "/b/k", "uploadId=u").op, Action::MpuAbort);
        assert_eq!(route(Method::DELETE, "/b/k", "").op, Action::Delete);
        assert_eq!(route(Method::POST, "/b/k", "uploads").op, Action::MpuInitiate);
        assert_eq!(route(Method::POST, "/b/k", "uploadId=u").op, Action::MpuComplete);
    }

    #[test]
    fn test_trailing_slash_tolerated() {
        let r = route(Method::GET, "/b/", "");
        assert_eq!(r.op, Action::ListV1);
        assert_eq!(r.bucket.as_deref(), Some("b"));
        assert_eq!(r.key, None);
    }

    #[test]
    fn test_virtual_hosted_bucket() {
        let q = Query::parse("");
        let r = resolve(
            &Method::GET,
            "/some/key",
            &q,
            Some("data.s3.example.com"),
            true,
        )
        .unwrap();
        assert_eq!(r.bucket.as_deref(), Some("data"));
        assert_eq!(r.key.as_deref(), Some("some/key"));
    }

    #[test]
    fn test_virtual_hosted_host_wins_over_path() {
        let q = Query::parse("");
        let r = resolve(&Method::GET, "/other/key", &q, Some("data.example.com:9000"), true)
            .unwrap();
        assert_eq!(r.bucket.as_deref(), Some("data"));
        // The path is the full key, not re-split
        assert_eq!(r.key.as_deref(), Some("other/key"));
    }

    #[test]
    fn test_virtual_hosted_ignores_ip_hosts() {
        let q = Query::parse("");
        let r = resolve(&Method::GET, "/b/k", &q, Some("192.168.0.1:9000"), true).unwrap();
        assert_eq!(r.bucket.as_deref(), Some("b"));
        assert_eq!(r.key.as_deref(), Some("k"));
    }

    #[test]
    fn test_host_label_case_folded() {
        assert_eq!(host_bucket("DATA.example.com."), Some("data".to_string()));
        assert_eq!(host_bucket("localhost"), None);
        assert_eq!(host_bucket("10.0.0.1"), None);
    }

    #[test]
    fn test_internal_routes() {
        assert_eq!(route(Method::GET, "/v1/meta/stats", "").op, Action::MetaStats);
        assert_eq!(route(Method::POST, "/v1/ops/run", "").op, Action::OpsRun);
        assert_eq!(route(Method::GET, "/v1/replication/oplog", "since=").op, Action::ReplOplog);
        assert!(resolve(&Method::GET, "/v1/nope", &Query::parse(""), None, false).is_err());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let err = resolve(&Method::PATCH, "/b/k", &Query::parse(""), None, false).unwrap_err();
        assert!(matches!(err, ApiError::MethodNotAllowed(_)));
    }

    #[test]
    fn test_key_is_percent_decoded() {
        let r = route(Method::GET, "/b/a%20b%2Bc", "");
        assert_eq!(r.key.as_deref(), Some("a b+c"));
    }
}
