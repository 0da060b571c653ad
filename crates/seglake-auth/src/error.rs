//! Authentication error types

use thiserror::Error;

/// Authentication failures. The gateway maps these onto the S3 error
/// taxonomy: structural defects and mismatches become
/// `SignatureDoesNotMatch`, credential problems become `AccessDenied`,
/// clock problems become `RequestTimeTooSkewed`.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingAuth,

    #[error("malformed authentication: {0}")]
    Malformed(String),

    #[error("unsupported signature version")]
    UnsupportedSignatureVersion,

    #[error("access key not found: {0}")]
    UnknownAccessKey(String),

    #[error("access key disabled: {0}")]
    DisabledAccessKey(String),

    #[error("credential scope mismatch")]
    ScopeMismatch,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("request time too skewed")]
    RequestTimeTooSkewed,

    #[error("presigned request has expired")]
    PresignedExpired,

    #[error("unsigned payload not allowed")]
    UnsignedPayloadRejected,

    #[error("missing signed header: {0}")]
    MissingSignedHeader(String),

    #[error("missing x-amz-date or date header")]
    MissingDate,

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("credential lookup failed: {0}")]
    Lookup(String),
}

impl AuthError {
    /// Whether this failure should count against the auth-failure rate
    /// limiter (a deliberate probe rather than an operational error).
    #[must_use]
    pub const fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            Self::UnknownAccessKey(_)
                | Self::DisabledAccessKey(_)
                | Self::SignatureMismatch
                | Self::ScopeMismatch
                | Self::UnsupportedSignatureVersion
                | Self::PresignedExpired
        )
    }
}
