//! Seglake authentication and authorization
//!
//! This crate provides:
//! - AWS Signature V4 verification (header and presigned-query forms)
//! - Presigned URL generation
//! - The `aws-chunked` streaming body decoder with per-chunk signature
//!   chaining and checksum trailers
//! - Replay suppression and auth-failure rate limiting
//! - Policy parsing (terse / native / AWS dialects) and evaluation

pub mod canonical;
pub mod chunked;
pub mod error;
pub mod policy;
pub mod presign;
pub mod ratelimit;
pub mod replay;
pub mod sigv4;

pub use chunked::{ChunkSigning, ChunkedDecoder, ChunkedError, ChunkedMode};
pub use error::AuthError;
pub use policy::{Action, Decision, Policy, PolicyError, RequestCtx, Statement};
pub use presign::presign_url;
pub use ratelimit::AuthRateLimiter;
pub use replay::ReplayCache;
pub use sigv4::{
    AuthConfig, PayloadMode, SecretEntry, SecretLookup, SigV4Verifier, VerifiedRequest,
};
