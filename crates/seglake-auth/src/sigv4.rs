//! AWS Signature V4 verification
//!
//! Implements AWS Signature Version 4 for authenticating S3 API
//! requests, header form and presigned-query form.
//! Reference: https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-authenticating-requests.html

use crate::canonical::{
    canonical_query, collapse_ws, constant_time_eq, derive_signing_key, hex_sha256, parse_query,
};
use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use http::{HeaderMap, Method, Request, Uri};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// An owned snapshot of the request head (method, URI, headers).
///
/// `Request<B>` is generic over the body type, which for the gateway's
/// `axum::body::Body` is `!Sync`; holding a `&Request<B>` across an
/// `.await` would then make the enclosing future `!Send`. Verification
/// never touches the body, so it operates on this owned snapshot
/// instead, taken up front before any other work.
struct RequestHead {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
}

impl RequestHead {
    fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        }
    }
}

pub const STREAMING_SIGNED: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";
pub const STREAMING_SIGNED_TRAILER: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD-TRAILER";
pub const STREAMING_UNSIGNED: &str = "STREAMING-UNSIGNED-PAYLOAD";
pub const STREAMING_UNSIGNED_TRAILER: &str = "STREAMING-UNSIGNED-PAYLOAD-TRAILER";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const MAX_PRESIGN_EXPIRES: u64 = 604_800;

/// Verifier configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Region required in credential scopes (after normalization);
    /// `None` accepts any region.
    pub region: Option<String>,
    /// Maximum clock skew for header-form requests
    pub max_clock_skew: Duration,
    /// Accept `UNSIGNED-PAYLOAD` on header-form requests
    pub allow_unsigned_payload: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            region: Some("us-east-1".to_string()),
            max_clock_skew: Duration::from_secs(300),
            allow_unsigned_payload: true,
        }
    }
}

/// A resolved secret for an access key.
#[derive(Debug, Clone)]
pub struct SecretEntry {
    pub secret: String,
    pub enabled: bool,
}

/// Secret resolution, backed by the metadata store's API-key table.
#[async_trait]
pub trait SecretLookup: Send + Sync {
    async fn secret_for(&self, access_key: &str) -> Result<Option<SecretEntry>, AuthError>;
}

/// How the request payload participates in the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadMode {
    /// `UNSIGNED-PAYLOAD`
    Unsigned,
    /// A 64-char hex SHA-256 the body must hash to
    SingleHash(String),
    /// aws-chunked with per-chunk signatures
    StreamingSigned { trailer: bool },
    /// aws-chunked without signatures
    StreamingUnsigned { trailer: bool },
}

impl PayloadMode {
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(
            self,
            Self::StreamingSigned { .. } | Self::StreamingUnsigned { .. }
        )
    }
}

/// Output of a successful verification. Carries everything the
/// aws-chunked decoder needs to chain chunk signatures from the seed.
#[derive(Debug, Clone)]
pub struct VerifiedRequest {
    pub access_key: String,
    /// Canonical `20060102T150405Z` form
    pub amz_date: String,
    /// `yyyymmdd/region/s3/aws4_request`
    pub scope: String,
    pub signing_key: [u8; 32],
    /// The request envelope signature, lowercased hex
    pub seed_signature: String,
    pub payload: PayloadMode,
    /// Presigned-query requests never carry a signed body
    pub presigned: bool,
}

struct ParsedAuthorization {
    access_key: String,
    date_scope: String,
    region: String,
    signed_headers: Vec<String>,
    signature: String,
}

/// AWS Signature V4 verifier
pub struct SigV4Verifier {
    config: AuthConfig,
    lookup: Arc<dyn SecretLookup>,
}

impl SigV4Verifier {
    pub fn new(config: AuthConfig, lookup: Arc<dyn SecretLookup>) -> Self {
        Self { config, lookup }
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verify an incoming request, choosing the header or presigned
    /// path from its shape.
    ///
    /// Takes the snapshot of `request` synchronously before returning
    /// the verification future, so the future itself never has `B` (or
    /// a reference into `Request<B>`) as part of its captured state —
    /// an async fn's generated future keeps every by-reference
    /// parameter in its layout for its entire lifetime even if unused
    /// past the first await, which would otherwise force `B: Sync`.
    pub fn verify<B>(
        &self,
        request: &Request<B>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<VerifiedRequest, AuthError>> + '_ {
        let head = RequestHead::from_request(request);
        self.verify_head(head, now)
    }

    async fn verify_head(
        &self,
        head: RequestHead,
        now: DateTime<Utc>,
    ) -> Result<VerifiedRequest, AuthError> {
        let query = parse_query(head.uri.query().unwrap_or(""));
        if query.iter().any(|(k, _)| k == "X-Amz-Signature") {
            return self.verify_presigned(&head, &query, now).await;
        }
        let Some(header) = head.headers.get(http::header::AUTHORIZATION) else {
            return Err(AuthError::MissingAuth);
        };
        let header = header
            .to_str()
            .map_err(|_| AuthError::Malformed("authorization header not ascii".into()))?;
        if let Some(rest) = header.strip_prefix("AWS4-HMAC-SHA256") {
            self.verify_header_form(&head, &query, rest, now).await
        } else if header.starts_with("AWS ") {
            // Legacy SigV2 is never accepted
            Err(AuthError::UnsupportedSignatureVersion)
        } else {
            Err(AuthError::Malformed("unknown authorization scheme".into()))
        }
    }

    async fn verify_header_form(
        &self,
        head: &RequestHead,
        query: &[(String, String)],
        auth_rest: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedRequest, AuthError> {
        let parsed = self.parse_authorization(auth_rest)?;

        let secret = self.resolve_secret(&parsed.access_key).await?;

        let amz_date = request_date(head)?;
        let req_time = parse_amz_date(&amz_date)?;

        let skew = ChronoDuration::from_std(self.config.max_clock_skew)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));
        if (now - req_time).abs() > skew {
            return Err(AuthError::RequestTimeTooSkewed);
        }
        if amz_date.len() < 8 || amz_date[..8] != parsed.date_scope {
            return Err(AuthError::SignatureMismatch);
        }

        let payload_header = head
            .headers
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(UNSIGNED_PAYLOAD);
        let payload = classify_payload(payload_header)?;
        if payload == PayloadMode::Unsigned && !self.config.allow_unsigned_payload {
            return Err(AuthError::UnsignedPayloadRejected);
        }

        let canonical_request = build_canonical_request(
            head,
            query,
            &parsed.signed_headers,
            payload_header,
        )?;

        let scope = format!("{}/{}/s3/aws4_request", parsed.date_scope, parsed.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(&secret, &parsed.date_scope, &parsed.region);
        let computed = hex::encode(crate::canonical::hmac_sha256(
            &signing_key,
            string_to_sign.as_bytes(),
        ));

        if !constant_time_eq(&computed, &parsed.signature) {
            tracing::debug!(
                canonical_request,
                string_to_sign,
                "header signature mismatch"
            );
            return Err(AuthError::SignatureMismatch);
        }

        Ok(VerifiedRequest {
            access_key: parsed.access_key,
            amz_date,
            scope,
            signing_key,
            seed_signature: parsed.signature.to_ascii_lowercase(),
            payload,
            presigned: false,
        })
    }

    async fn verify_presigned(
        &self,
        head: &RequestHead,
        query: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<VerifiedRequest, AuthError> {
        let get = |name: &str| -> Result<&str, AuthError> {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .ok_or_else(|| AuthError::Malformed(format!("missing query parameter {name}")))
        };

        if get("X-Amz-Algorithm")? != "AWS4-HMAC-SHA256" {
            return Err(AuthError::Malformed("unsupported X-Amz-Algorithm".into()));
        }
        let credential = get("X-Amz-Credential")?;
        let amz_date = get("X-Amz-Date")?.to_string();
        let signed_headers_raw = get("X-Amz-SignedHeaders")?;
        let signature = get("X-Amz-Signature")?.to_string();
        let expires: u64 = get("X-Amz-Expires")?
            .parse()
            .map_err(|_| AuthError::Malformed("X-Amz-Expires not an integer".into()))?;
        if expires == 0 || expires > MAX_PRESIGN_EXPIRES {
            return Err(AuthError::Malformed("X-Amz-Expires out of range".into()));
        }

        let (access_key, date_scope, region) = self.parse_credential(credential)?;
        let secret = self.resolve_secret(&access_key).await?;

        let req_time = parse_amz_date(&amz_date)?;
        let skew = ChronoDuration::from_std(self.config.max_clock_skew)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));
        if req_time > now + skew {
            return Err(AuthError::RequestTimeTooSkewed);
        }
        if now - req_time > ChronoDuration::seconds(i64::try_from(expires).unwrap_or(i64::MAX)) {
            return Err(AuthError::PresignedExpired);
        }
        if amz_date.len() < 8 || amz_date[..8] != date_scope {
            return Err(AuthError::SignatureMismatch);
        }

        let mut signed_headers: Vec<String> = signed_headers_raw
            .split(';')
            .map(str::to_lowercase)
            .collect();
        signed_headers.sort();

        // The signature parameter is excluded from the canonical query
        let filtered: Vec<(String, String)> = query
            .iter()
            .filter(|(k, _)| k != "X-Amz-Signature")
            .cloned()
            .collect();
        let canonical_request = build_canonical_request(
            head,
            &filtered,
            &signed_headers,
            UNSIGNED_PAYLOAD,
        )?;

        let scope = format!("{date_scope}/{region}/s3/aws4_request");
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(&secret, &date_scope, &region);
        let computed = hex::encode(crate::canonical::hmac_sha256(
            &signing_key,
            string_to_sign.as_bytes(),
        ));

        if !constant_time_eq(&computed, &signature) {
            tracing::debug!(canonical_request, string_to_sign, "presigned signature mismatch");
            return Err(AuthError::SignatureMismatch);
        }

        Ok(VerifiedRequest {
            access_key,
            amz_date,
            scope,
            signing_key,
            seed_signature: signature.to_ascii_lowercase(),
            payload: PayloadMode::Unsigned,
            presigned: true,
        })
    }

    async fn resolve_secret(&self, access_key: &str) -> Result<String, AuthError> {
        match self.lookup.secret_for(access_key).await? {
            Some(entry) if entry.enabled => Ok(entry.secret),
            Some(_) => Err(AuthError::DisabledAccessKey(access_key.to_string())),
            None => Err(AuthError::UnknownAccessKey(access_key.to_string())),
        }
    }

    /// Parse the remainder of an `AWS4-HMAC-SHA256` authorization
    /// header: `Credential=…, SignedHeaders=…, Signature=…`.
    fn parse_authorization(&self, rest: &str) -> Result<ParsedAuthorization, AuthError> {
        let mut credential = None;
        let mut signed_headers = None;
        let mut signature = None;
        for part in rest.split(',') {
            let part = part.trim();
            if let Some(v) = part.strip_prefix("Credential=") {
                credential = Some(v);
            } else if let Some(v) = part.strip_prefix("SignedHeaders=") {
                signed_headers = Some(v);
            } else if let Some(v) = part.strip_prefix("Signature=") {
                signature = Some(v);
            }
        }
        let credential =
            credential.ok_or_else(|| AuthError::Malformed("missing Credential".into()))?;
        let signed_headers =
            signed_headers.ok_or_else(|| AuthError::Malformed("missing SignedHeaders".into()))?;
        let signature =
            signature.ok_or_else(|| AuthError::Malformed("missing Signature".into()))?;

        let (access_key, date_scope, region) = self.parse_credential(credential)?;
        let mut headers: Vec<String> = signed_headers.split(';').map(str::to_lowercase).collect();
        headers.sort();

        Ok(ParsedAuthorization {
            access_key,
            date_scope,
            region,
            signed_headers: headers,
            signature: signature.to_string(),
        })
    }

    /// Parse `AK/yyyymmdd/region/s3/aws4_request`, normalizing the
    /// region and enforcing the configured region when set.
    fn parse_credential(&self, credential: &str) -> Result<(String, String, String), AuthError> {
        let parts: Vec<&str> = credential.split('/').collect();
        if parts.len() != 5 {
            return Err(AuthError::Malformed("credential must have 5 parts".into()));
        }
        if parts[3] != "s3" || parts[4] != "aws4_request" {
            return Err(AuthError::ScopeMismatch);
        }
        if parts[1].len() != 8 || !parts[1].bytes().all(|b| b.is_ascii_digit()) {
            return Err(AuthError::Malformed("credential date malformed".into()));
        }
        let region = normalize_region(parts[2]);
        if let Some(required) = &self.config.region
            && &region != required
        {
            return Err(AuthError::ScopeMismatch);
        }
        Ok((parts[0].to_string(), parts[1].to_string(), region))
    }
}

/// Lowercase the region and expand the `us` alias.
#[must_use]
pub fn normalize_region(region: &str) -> String {
    let region = region.to_ascii_lowercase();
    if region == "us" {
        "us-east-1".to_string()
    } else {
        region
    }
}

/// Classify the `x-amz-content-sha256` value.
pub fn classify_payload(value: &str) -> Result<PayloadMode, AuthError> {
    match value {
        UNSIGNED_PAYLOAD | "" => Ok(PayloadMode::Unsigned),
        STREAMING_SIGNED => Ok(PayloadMode::StreamingSigned { trailer: false }),
        STREAMING_SIGNED_TRAILER => Ok(PayloadMode::StreamingSigned { trailer: true }),
        STREAMING_UNSIGNED => Ok(PayloadMode::StreamingUnsigned { trailer: false }),
        STREAMING_UNSIGNED_TRAILER => Ok(PayloadMode::StreamingUnsigned { trailer: true }),
        hash if hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit()) => {
            Ok(PayloadMode::SingleHash(hash.to_ascii_lowercase()))
        }
        _ => Err(AuthError::Malformed(
            "unrecognized x-amz-content-sha256".into(),
        )),
    }
}

/// The request date: `X-Amz-Date`, else a parseable `Date` header
/// converted to the canonical form.
fn request_date(head: &RequestHead) -> Result<String, AuthError> {
    if let Some(v) = head.headers.get("x-amz-date") {
        return v
            .to_str()
            .map(str::to_string)
            .map_err(|_| AuthError::InvalidDate("x-amz-date not ascii".into()));
    }
    if let Some(v) = head.headers.get(http::header::DATE) {
        let raw = v
            .to_str()
            .map_err(|_| AuthError::InvalidDate("date not ascii".into()))?;
        let parsed = DateTime::parse_from_rfc2822(raw)
            .map_err(|_| AuthError::InvalidDate(raw.to_string()))?;
        return Ok(parsed.with_timezone(&Utc).format(AMZ_DATE_FORMAT).to_string());
    }
    Err(AuthError::MissingDate)
}

fn parse_amz_date(value: &str) -> Result<DateTime<Utc>, AuthError> {
    NaiveDateTime::parse_from_str(value, AMZ_DATE_FORMAT)
        .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .map_err(|_| AuthError::InvalidDate(value.to_string()))
}

/// Build the canonical request string.
fn build_canonical_request(
    head: &RequestHead,
    query: &[(String, String)],
    signed_headers: &[String],
    payload_hash: &str,
) -> Result<String, AuthError> {
    let method = head.method.as_str();
    let path = head.uri.path();
    let canonical_uri = if path.is_empty() { "/" } else { path };
    let canonical_qs = canonical_query(query);

    let mut headers_map: BTreeMap<&str, String> = BTreeMap::new();
    for name in signed_headers {
        let value = head
            .headers
            .get(name.as_str())
            .ok_or_else(|| AuthError::MissingSignedHeader(name.clone()))?
            .to_str()
            .map_err(|_| AuthError::Malformed(format!("signed header {name} not ascii")))?;
        headers_map.insert(name.as_str(), collapse_ws(value));
    }

    let canonical_headers: String = headers_map
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect();

    Ok(format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_uri,
        canonical_qs,
        canonical_headers,
        signed_headers.join(";"),
        payload_hash
    ))
}

/// Sign a request the way a client would, for tests and the presigner.
#[must_use]
pub fn sign_string_to_sign(signing_key: &[u8; 32], string_to_sign: &str) -> String {
    hex::encode(crate::canonical::hmac_sha256(
        signing_key,
        string_to_sign.as_bytes(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    struct StaticLookup(&'static str, &'static str, bool);

    #[async_trait]
    impl SecretLookup for StaticLookup {
        async fn secret_for(&self, access_key: &str) -> Result<Option<SecretEntry>, AuthError> {
            if access_key == self.0 {
                Ok(Some(SecretEntry {
                    secret: self.1.to_string(),
                    enabled: self.2,
                }))
            } else {
                Ok(None)
            }
        }
    }

    fn verifier(secret: &'static str) -> SigV4Verifier {
        SigV4Verifier::new(
            AuthConfig::default(),
            Arc::new(StaticLookup("AKIDEXAMPLE", secret, true)),
        )
    }

    const AMZ_DATE: &str = "20240101T000000Z";

    fn now() -> DateTime<Utc> {
        parse_amz_date(AMZ_DATE).unwrap()
    }

    /// Sign a request exactly the way the verifier expects.
    fn sign_request(request: &Request<()>, secret: &str, region: &str) -> String {
        let query = parse_query(request.uri().query().unwrap_or(""));
        let signed: Vec<String> = vec![
            "host".to_string(),
            "x-amz-content-sha256".to_string(),
            "x-amz-date".to_string(),
        ];
        let payload_hash = request
            .headers()
            .get("x-amz-content-sha256")
            .unwrap()
            .to_str()
            .unwrap();
        let head = RequestHead::from_request(request);
        let canonical = build_canonical_request(&head, &query, &signed, payload_hash).unwrap();
        let scope = format!("{}/{}/s3/aws4_request", &AMZ_DATE[..8], region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{AMZ_DATE}\n{scope}\n{}",
            hex_sha256(canonical.as_bytes())
        );
        let key = derive_signing_key(secret, &AMZ_DATE[..8], region);
        sign_string_to_sign(&key, &string_to_sign)
    }

    fn signed_request(secret: &str, region: &str, payload: &str) -> Request<()> {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri("http://example.com/bucket/key")
            .header("host", "example.com")
            .header("x-amz-content-sha256", payload)
            .header("x-amz-date", AMZ_DATE)
            .body(())
            .unwrap();
        let signature = sign_request(&request, secret, region);
        let auth = format!(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/{}/{}/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={}",
            &AMZ_DATE[..8],
            region,
            signature
        );
        request
            .headers_mut()
            .insert(http::header::AUTHORIZATION, auth.parse().unwrap());
        request
    }

    /// Signature for `GET http://example.com/bucket/key` with headers
    /// `host=example.com`, `x-amz-content-sha256=UNSIGNED-PAYLOAD`,
    /// `x-amz-date=20240101T000000Z`, signed headers
    /// `host;x-amz-content-sha256;x-amz-date`, secret `testsecret`,
    /// region `us-east-1`. Computed with an independent SigV4
    /// implementation (python hmac/hashlib), not by this crate, so a
    /// defect shared by the signing and verification paths cannot
    /// round-trip past it.
    const KNOWN_SIGNATURE: &str =
        "57dbed24ecc0236bf008cb6029e2a397eff63f44786434973913825b10539fa2";

    #[tokio::test]
    async fn test_verify_accepts_correct_signature() {
        let request = signed_request("testsecret", "us-east-1", UNSIGNED_PAYLOAD);
        let verified = verifier("testsecret").verify(&request, now()).await.unwrap();
        assert_eq!(verified.access_key, "AKIDEXAMPLE");
        assert_eq!(verified.payload, PayloadMode::Unsigned);
        assert!(!verified.presigned);
    }

    #[tokio::test]
    async fn test_known_signature_vector() {
        let request = |signature: &str| {
            let auth = format!(
                "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/us-east-1/s3/aws4_request, \
                 SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={signature}"
            );
            Request::builder()
                .method(Method::GET)
                .uri("http://example.com/bucket/key")
                .header("host", "example.com")
                .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
                .header("x-amz-date", AMZ_DATE)
                .header(http::header::AUTHORIZATION, auth)
                .body(())
                .unwrap()
        };

        // The verifier accepts exactly the externally computed value
        let verified = verifier("testsecret")
            .verify(&request(KNOWN_SIGNATURE), now())
            .await
            .unwrap();
        assert_eq!(verified.seed_signature, KNOWN_SIGNATURE);

        // The signing path reproduces the same value
        assert_eq!(
            sign_request(&request(KNOWN_SIGNATURE), "testsecret", "us-east-1"),
            KNOWN_SIGNATURE
        );

        // Any other signature is rejected
        let tampered = format!("0{}", &KNOWN_SIGNATURE[1..]);
        let err = verifier("testsecret")
            .verify(&request(&tampered), now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_secret() {
        let request = signed_request("wrongsecret", "us-east-1", UNSIGNED_PAYLOAD);
        let err = verifier("testsecret").verify(&request, now()).await.unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[tokio::test]
    async fn test_verify_rejects_skewed_clock() {
        let request = signed_request("testsecret", "us-east-1", UNSIGNED_PAYLOAD);
        let late = now() + ChronoDuration::seconds(301);
        let err = verifier("testsecret").verify(&request, late).await.unwrap_err();
        assert!(matches!(err, AuthError::RequestTimeTooSkewed));

        let in_window = now() + ChronoDuration::seconds(299);
        assert!(verifier("testsecret").verify(&request, in_window).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_rejects_sigv2() {
        let request = Request::builder()
            .uri("http://example.com/")
            .header(http::header::AUTHORIZATION, "AWS AKIDEXAMPLE:deadbeef")
            .body(())
            .unwrap();
        let err = verifier("testsecret").verify(&request, now()).await.unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedSignatureVersion));
    }

    #[tokio::test]
    async fn test_region_alias_normalization() {
        // `us` normalizes to us-east-1 on both signing and scope check
        let request = signed_request("testsecret", "us", "UNSIGNED-PAYLOAD");
        // Signed under "us" scope; verifier derives the key for the
        // normalized region, so this must be rejected as a mismatch
        // unless the client also derived with the normalized region.
        let result = verifier("testsecret").verify(&request, now()).await;
        assert!(matches!(result, Err(AuthError::SignatureMismatch)));

        assert_eq!(normalize_region("US"), "us-east-1");
        assert_eq!(normalize_region("eu-WEST-1"), "eu-west-1");
    }

    #[tokio::test]
    async fn test_unknown_key_is_access_denied_kind() {
        let request = signed_request("testsecret", "us-east-1", UNSIGNED_PAYLOAD);
        let v = SigV4Verifier::new(
            AuthConfig::default(),
            Arc::new(StaticLookup("OTHERKEY", "testsecret", true)),
        );
        let err = v.verify(&request, now()).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownAccessKey(_)));
    }

    #[tokio::test]
    async fn test_disabled_key_rejected() {
        let request = signed_request("testsecret", "us-east-1", UNSIGNED_PAYLOAD);
        let v = SigV4Verifier::new(
            AuthConfig::default(),
            Arc::new(StaticLookup("AKIDEXAMPLE", "testsecret", false)),
        );
        let err = v.verify(&request, now()).await.unwrap_err();
        assert!(matches!(err, AuthError::DisabledAccessKey(_)));
    }

    #[tokio::test]
    async fn test_unsigned_payload_policy() {
        let request = signed_request("testsecret", "us-east-1", UNSIGNED_PAYLOAD);
        let config = AuthConfig {
            allow_unsigned_payload: false,
            ..AuthConfig::default()
        };
        let v = SigV4Verifier::new(config, Arc::new(StaticLookup("AKIDEXAMPLE", "testsecret", true)));
        let err = v.verify(&request, now()).await.unwrap_err();
        assert!(matches!(err, AuthError::UnsignedPayloadRejected));
    }

    #[tokio::test]
    async fn test_streaming_sentinel_selects_mode() {
        let request = signed_request("testsecret", "us-east-1", STREAMING_SIGNED);
        let verified = verifier("testsecret").verify(&request, now()).await.unwrap();
        assert_eq!(verified.payload, PayloadMode::StreamingSigned { trailer: false });
    }

    #[tokio::test]
    async fn test_scope_date_must_match_amz_date() {
        let mut request = signed_request("testsecret", "us-east-1", UNSIGNED_PAYLOAD);
        let auth = request
            .headers()
            .get(http::header::AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap()
            .replace("20240101", "20240102");
        request
            .headers_mut()
            .insert(http::header::AUTHORIZATION, auth.parse().unwrap());
        let err = verifier("testsecret").verify(&request, now()).await.unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[tokio::test]
    async fn test_query_order_does_not_matter() {
        // Two requests differing only in parameter order sign equal
        let make = |qs: &str| {
            Request::builder()
                .method(Method::GET)
                .uri(format!("http://example.com/bucket?{qs}"))
                .header("host", "example.com")
                .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
                .header("x-amz-date", AMZ_DATE)
                .body(())
                .unwrap()
        };
        let a = sign_request(&make("b=2&a=1"), "s", "us-east-1");
        let b = sign_request(&make("a=1&b=2"), "s", "us-east-1");
        assert_eq!(a, b);
    }
}
