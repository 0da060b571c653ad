//! Error types for Seglake
//!
//! Every request handler funnels through this taxonomy; the gateway's
//! single error responder maps each kind to its HTTP status and S3 code
//! string, so per-handler mappings cannot diverge.

use crate::types::{BucketNameError, ObjectKeyError};
use thiserror::Error;

/// Common result type for Seglake operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Request-plane error taxonomy
#[derive(Debug, Error)]
pub enum ApiError {
    // Authentication
    #[error("signature mismatch")]
    SignatureDoesNotMatch,

    #[error("access denied")]
    AccessDenied,

    #[error("request time too skewed")]
    RequestTimeTooSkewed,

    // Resources
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    #[error("no bucket policy: {0}")]
    NoSuchBucketPolicy(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    // Payload validation
    #[error("entity too large: max {max} bytes")]
    EntityTooLarge { max: u64 },

    #[error("missing content length")]
    MissingContentLength,

    #[error("content-md5 mismatch")]
    BadDigest,

    #[error("malformed digest header: {0}")]
    InvalidDigest(String),

    #[error("x-amz-content-sha256 mismatch")]
    XAmzContentSha256Mismatch,

    // Preconditions and ranges
    #[error("precondition failed")]
    PreconditionFailed,

    #[error("requested range not satisfiable")]
    InvalidRange,

    // Request shape
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(#[from] BucketNameError),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(#[from] ObjectKeyError),

    // Availability
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("slow down")]
    SlowDown,

    // Internal
    #[error("internal error: {0}")]
    Internal(String),

    #[error("damaged object: {0}")]
    DamagedObject(String),
}

impl ApiError {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// HTTP status code for this error kind
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::BadDigest
            | Self::InvalidDigest(_)
            | Self::XAmzContentSha256Mismatch
            | Self::InvalidArgument(_)
            | Self::InvalidRequest(_)
            | Self::InvalidBucketName(_)
            | Self::InvalidObjectKey(_) => 400,

            Self::SignatureDoesNotMatch | Self::AccessDenied | Self::RequestTimeTooSkewed => 403,

            Self::NoSuchBucket(_)
            | Self::NoSuchKey(_)
            | Self::NoSuchUpload(_)
            | Self::NoSuchBucketPolicy(_) => 404,

            Self::MethodNotAllowed(_) => 405,

            Self::BucketNotEmpty(_) | Self::BucketAlreadyExists(_) => 409,

            Self::MissingContentLength => 411,

            Self::PreconditionFailed => 412,

            Self::EntityTooLarge { .. } => 413,

            Self::InvalidRange => 416,

            Self::Internal(_) | Self::DamagedObject(_) => 500,

            Self::ServiceUnavailable(_) | Self::SlowDown => 503,
        }
    }

    /// S3 error code string for this error kind
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::AccessDenied => "AccessDenied",
            Self::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            Self::NoSuchBucket(_) => "NoSuchBucket",
            Self::NoSuchKey(_) => "NoSuchKey",
            Self::NoSuchUpload(_) => "NoSuchUpload",
            Self::NoSuchBucketPolicy(_) => "NoSuchBucketPolicy",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::EntityTooLarge { .. } => "EntityTooLarge",
            Self::MissingContentLength => "MissingContentLength",
            Self::BadDigest => "BadDigest",
            Self::InvalidDigest(_) => "InvalidDigest",
            Self::XAmzContentSha256Mismatch => "XAmzContentSHA256Mismatch",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::InvalidRange => "InvalidRange",
            Self::InvalidArgument(_) | Self::InvalidBucketName(_) | Self::InvalidObjectKey(_) => {
                "InvalidArgument"
            }
            Self::InvalidRequest(_) | Self::MethodNotAllowed(_) => "InvalidRequest",
            Self::ServiceUnavailable(_) => "ServiceUnavailable",
            Self::SlowDown => "SlowDown",
            Self::Internal(_) | Self::DamagedObject(_) => "InternalError",
        }
    }

    /// Damaged reads carry an extra diagnostic header.
    #[must_use]
    pub const fn x_error(&self) -> Option<&'static str> {
        match self {
            Self::DamagedObject(_) => Some("DamagedObject"),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::SignatureDoesNotMatch.status(), 403);
        assert_eq!(ApiError::NoSuchBucket("b".into()).status(), 404);
        assert_eq!(ApiError::BucketNotEmpty("b".into()).status(), 409);
        assert_eq!(ApiError::MissingContentLength.status(), 411);
        assert_eq!(ApiError::EntityTooLarge { max: 1 }.status(), 413);
        assert_eq!(ApiError::InvalidRange.status(), 416);
        assert_eq!(ApiError::SlowDown.status(), 503);
        assert_eq!(ApiError::DamagedObject("v".into()).status(), 500);
    }

    #[test]
    fn test_code_strings() {
        assert_eq!(ApiError::XAmzContentSha256Mismatch.code(), "XAmzContentSHA256Mismatch");
        assert_eq!(ApiError::MethodNotAllowed("TRACE".into()).code(), "InvalidRequest");
        assert_eq!(ApiError::DamagedObject("v".into()).code(), "InternalError");
    }

    #[test]
    fn test_damaged_header() {
        assert_eq!(
            ApiError::DamagedObject("v".into()).x_error(),
            Some("DamagedObject")
        );
        assert_eq!(ApiError::AccessDenied.x_error(), None);
    }
}
