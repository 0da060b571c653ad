//! Presigned URL generation
//!
//! Produces URLs whose query string carries the SigV4 signature, valid
//! for a bounded window and verified by the presigned path of
//! [`crate::sigv4::SigV4Verifier`].
//! Reference: https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-query-string-auth.html

use crate::canonical::{derive_signing_key, hex_sha256, uri_encode};
use crate::sigv4::sign_string_to_sign;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Generate a presigned URL.
///
/// `url` is the absolute target (`http://host[:port]/bucket/key`);
/// `SignedHeaders` is exactly `host`, so the returned URL can be
/// fetched without any additional headers within `expires_in`.
#[must_use]
pub fn presign_url(
    method: &str,
    url: &str,
    region: &str,
    access_key: &str,
    secret_key: &str,
    expires_in: Duration,
    now: DateTime<Utc>,
) -> String {
    let date_scope = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let expires_secs = expires_in.as_secs();

    let credential_scope = format!("{date_scope}/{region}/s3/aws4_request");
    let credential = format!("{access_key}/{credential_scope}");

    let (scheme_host, path) = split_url(url);
    let host = scheme_host
        .trim_start_matches("https://")
        .trim_start_matches("http://");

    // Already in canonical (sorted) order
    let canonical_qs = format!(
        "X-Amz-Algorithm=AWS4-HMAC-SHA256\
         &X-Amz-Credential={cred}\
         &X-Amz-Date={amz_date}\
         &X-Amz-Expires={expires_secs}\
         &X-Amz-SignedHeaders=host",
        cred = uri_encode(&credential, false),
    );

    let canonical_request = format!(
        "{method}\n{path}\n{canonical_qs}\nhost:{host}\n\nhost\nUNSIGNED-PAYLOAD"
    );

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(secret_key, &date_scope, region);
    let signature = sign_string_to_sign(&signing_key, &string_to_sign);

    format!("{scheme_host}{path}?{canonical_qs}&X-Amz-Signature={signature}")
}

/// Split an absolute URL into (scheme://host, path).
fn split_url(url: &str) -> (&str, &str) {
    let after_scheme = url.find("://").map_or(0, |i| i + 3);
    match url[after_scheme..].find('/') {
        Some(slash) => url.split_at(after_scheme + slash),
        None => (url, "/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::sigv4::{AuthConfig, SecretEntry, SecretLookup, SigV4Verifier};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Arc;

    struct OneKey;

    #[async_trait]
    impl SecretLookup for OneKey {
        async fn secret_for(&self, access_key: &str) -> Result<Option<SecretEntry>, AuthError> {
            Ok((access_key == "AKID").then(|| SecretEntry {
                secret: "presignsecret".to_string(),
                enabled: true,
            }))
        }
    }

    fn request_for(url: &str) -> http::Request<()> {
        let (scheme_host, rest) = url.split_once("://").unwrap();
        let _ = scheme_host;
        let (host, path_and_query) = rest.split_once('/').unwrap();
        http::Request::builder()
            .method("GET")
            .uri(format!("http://{host}/{path_and_query}"))
            .header("host", host)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_presign_shape() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let url = presign_url(
            "GET",
            "http://localhost:9000/my-bucket/path/to/file.bin",
            "us-east-1",
            "AKID",
            "presignsecret",
            Duration::from_secs(3600),
            now,
        );
        assert!(url.starts_with("http://localhost:9000/my-bucket/path/to/file.bin?"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_presign_verify_roundtrip() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let url = presign_url(
            "GET",
            "http://example.com/bucket/key.txt",
            "us-east-1",
            "AKID",
            "presignsecret",
            Duration::from_secs(600),
            now,
        );
        let request = request_for(&url);
        let verifier = SigV4Verifier::new(AuthConfig::default(), Arc::new(OneKey));

        // Within the window
        let ok = verifier
            .verify(&request, now + chrono::Duration::seconds(599))
            .await
            .unwrap();
        assert!(ok.presigned);
        assert_eq!(ok.access_key, "AKID");

        // Past expiry
        let err = verifier
            .verify(&request, now + chrono::Duration::seconds(601))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PresignedExpired));

        // Issued in the future beyond skew
        let err = verifier
            .verify(&request, now - chrono::Duration::seconds(301))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RequestTimeTooSkewed));
    }

    #[tokio::test]
    async fn test_presign_tamper_rejected() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let url = presign_url(
            "GET",
            "http://example.com/bucket/key.txt",
            "us-east-1",
            "AKID",
            "presignsecret",
            Duration::from_secs(600),
            now,
        );
        let tampered = url.replace("key.txt", "other.txt");
        let request = request_for(&tampered);
        let verifier = SigV4Verifier::new(AuthConfig::default(), Arc::new(OneKey));
        let err = verifier.verify(&request, now).await.unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }
}
