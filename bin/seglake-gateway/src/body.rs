//! Request-body plumbing
//!
//! Builds the decode/verify pipeline for upload bodies: axum body
//! stream -> optional aws-chunked decoder -> size limit -> digest
//! verifiers -> `StreamReader` handed to the engine. Verification
//! failures surface as typed errors inside the I/O error chain and are
//! unwrapped by [`map_body_io_error`] before a response is shaped.

use axum::body::Body;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use http::HeaderMap;
use seglake_auth::chunked::{ChunkSigning, ChunkedDecoder, ChunkedError, ChunkedMode};
use seglake_auth::sigv4::{PayloadMode, VerifiedRequest};
use seglake_common::ApiError;
use sha2::{Digest, Sha256};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// Body verification failures carried through the I/O error chain.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("content-md5 mismatch")]
    Md5Mismatch,

    #[error("x-amz-content-sha256 mismatch")]
    Sha256Mismatch,

    #[error("body exceeds limit of {max} bytes")]
    TooLarge { max: u64 },
}

type IoByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// A readable, verified upload body.
pub type BodyReader = StreamReader<IoByteStream, Bytes>;

/// Decode and checksum parameters extracted from the request.
pub struct BodyOptions {
    /// Raw MD5 bytes from `Content-MD5`
    pub content_md5: Option<[u8; 16]>,
    /// Declared plain-body length cap (0 = unlimited)
    pub max_object_size: u64,
}

/// Parse `Content-MD5` (base64 of the raw 16-byte digest).
pub fn parse_content_md5(headers: &HeaderMap) -> Result<Option<[u8; 16]>, ApiError> {
    let Some(value) = headers.get("content-md5") else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::InvalidDigest("content-md5 not ascii".into()))?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, value)
        .map_err(|_| ApiError::InvalidDigest("content-md5 not base64".into()))?;
    let bytes: [u8; 16] = decoded
        .try_into()
        .map_err(|_| ApiError::InvalidDigest("content-md5 must be 16 bytes".into()))?;
    Ok(Some(bytes))
}

/// True when the body is framed as aws-chunked.
#[must_use]
pub fn is_aws_chunked(headers: &HeaderMap, payload: &PayloadMode) -> bool {
    payload.is_streaming()
        || headers
            .get(http::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.split(',').any(|e| e.trim() == "aws-chunked"))
}

/// Trailer names declared by `x-amz-trailer`.
#[must_use]
pub fn declared_trailers(headers: &HeaderMap) -> Vec<String> {
    headers
        .get("x-amz-trailer")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// The effective body length: `x-amz-decoded-content-length` under
/// aws-chunked, `content-length` otherwise.
pub fn effective_content_length(
    headers: &HeaderMap,
    chunked: bool,
) -> Result<Option<u64>, ApiError> {
    let name = if chunked {
        "x-amz-decoded-content-length"
    } else {
        "content-length"
    };
    match headers.get(name) {
        None => Ok(None),
        Some(v) => v
            .to_str()
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Some)
            .ok_or_else(|| ApiError::invalid_argument(format!("bad {name}"))),
    }
}

/// Assemble the full decode/verify pipeline for an upload body.
pub fn body_reader(
    body: Body,
    headers: &HeaderMap,
    verified: &VerifiedRequest,
    options: BodyOptions,
) -> BodyReader {
    let base: IoByteStream = Box::pin(body.into_data_stream().map_err(io::Error::other));

    let chunked = is_aws_chunked(headers, &verified.payload);
    let mut stream: IoByteStream = if chunked {
        let signing = ChunkSigning {
            signing_key: verified.signing_key,
            seed_signature: verified.seed_signature.clone(),
            amz_date: verified.amz_date.clone(),
            scope: verified.scope.clone(),
        };
        let mode = match &verified.payload {
            PayloadMode::StreamingSigned { trailer: false } => ChunkedMode::Signed(signing),
            PayloadMode::StreamingSigned { trailer: true } => ChunkedMode::SignedTrailer(signing),
            PayloadMode::StreamingUnsigned { trailer: true } => ChunkedMode::UnsignedTrailer,
            _ => ChunkedMode::Unsigned,
        };
        let declared_len = headers
            .get("x-amz-decoded-content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let decoder = ChunkedDecoder::new(base, mode, declared_trailers(headers), declared_len);
        Box::pin(decoder.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)))
    } else {
        base
    };

    if options.max_object_size > 0 {
        stream = Box::pin(SizeLimitStream {
            inner: stream,
            seen: 0,
            max: options.max_object_size,
        });
    }

    let sha256 = match &verified.payload {
        PayloadMode::SingleHash(expected) => Some(expected.clone()),
        _ => None,
    };
    if options.content_md5.is_some() || sha256.is_some() {
        stream = Box::pin(DigestVerifyStream {
            inner: stream,
            md5: options.content_md5.map(|expected| (md5::Context::new(), expected)),
            sha256: sha256.map(|expected| (Sha256::new(), expected)),
            done: false,
        });
    }

    StreamReader::new(stream)
}

/// Enforce a byte cap on a body stream.
struct SizeLimitStream {
    inner: IoByteStream,
    seen: u64,
    max: u64,
}

impl Stream for SizeLimitStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                this.seen += bytes.len() as u64;
                if this.seen > this.max {
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        BodyError::TooLarge { max: this.max },
                    ))));
                }
                Poll::Ready(Some(Ok(bytes)))
            }
            other => other,
        }
    }
}

/// Verify MD5 / SHA-256 digests at end of stream.
struct DigestVerifyStream {
    inner: IoByteStream,
    md5: Option<(md5::Context, [u8; 16])>,
    sha256: Option<(Sha256, String)>,
    done: bool,
}

impl Stream for DigestVerifyStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                if let Some((context, _)) = &mut this.md5 {
                    context.consume(&bytes);
                }
                if let Some((hasher, _)) = &mut this.sha256 {
                    hasher.update(&bytes);
                }
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(None) => {
                this.done = true;
                if let Some((context, expected)) = this.md5.take()
                    && context.compute().0 != expected
                {
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        BodyError::Md5Mismatch,
                    ))));
                }
                if let Some((hasher, expected)) = this.sha256.take()
                    && hex::encode(hasher.finalize()) != expected
                {
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        BodyError::Sha256Mismatch,
                    ))));
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Unwrap typed body failures from an I/O error chain.
#[must_use]
pub fn map_body_io_error(err: io::Error) -> ApiError {
    if let Some(inner) = err.get_ref() {
        if let Some(body) = inner.downcast_ref::<BodyError>() {
            return match body {
                BodyError::Md5Mismatch => ApiError::BadDigest,
                BodyError::Sha256Mismatch => ApiError::XAmzContentSha256Mismatch,
                BodyError::TooLarge { max } => ApiError::EntityTooLarge { max: *max },
            };
        }
        if let Some(chunked) = inner.downcast_ref::<ChunkedError>() {
            return match chunked {
                ChunkedError::SignatureMismatch | ChunkedError::TrailerSignatureMismatch => {
                    ApiError::XAmzContentSha256Mismatch
                }
                ChunkedError::LineTooLong => ApiError::InvalidDigest("chunk line too long".into()),
                ChunkedError::ChecksumMismatch(_) => ApiError::BadDigest,
                ChunkedError::MissingTrailer(name) => {
                    ApiError::invalid_request(format!("missing trailer {name}"))
                }
                ChunkedError::LengthMismatch { got, declared } => ApiError::invalid_request(
                    format!("decoded {got} bytes, declared {declared}"),
                ),
                ChunkedError::Malformed(msg) => ApiError::invalid_request(msg.clone()),
                ChunkedError::UnexpectedEof => {
                    ApiError::invalid_request("incomplete chunked body")
                }
                ChunkedError::Io(e) => ApiError::Internal(e.to_string()),
            };
        }
    }
    ApiError::Internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use http::HeaderValue;
    use seglake_auth::sigv4::PayloadMode;
    use tokio::io::AsyncReadExt;

    fn verified(payload: PayloadMode) -> VerifiedRequest {
        VerifiedRequest {
            access_key: "AK".to_string(),
            amz_date: "20240101T000000Z".to_string(),
            scope: "20240101/us-east-1/s3/aws4_request".to_string(),
            signing_key: [0u8; 32],
            seed_signature: "0".repeat(64),
            payload,
            presigned: false,
        }
    }

    async fn read_to_end(mut reader: BodyReader) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn test_plain_body_passthrough() {
        let reader = body_reader(
            Body::from("hello world"),
            &HeaderMap::new(),
            &verified(PayloadMode::Unsigned),
            BodyOptions {
                content_md5: None,
                max_object_size: 0,
            },
        );
        assert_eq!(read_to_end(reader).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_md5_verification() {
        let digest = md5::compute(b"payload");
        let good = body_reader(
            Body::from("payload"),
            &HeaderMap::new(),
            &verified(PayloadMode::Unsigned),
            BodyOptions {
                content_md5: Some(digest.0),
                max_object_size: 0,
            },
        );
        assert!(read_to_end(good).await.is_ok());

        let bad = body_reader(
            Body::from("tampered"),
            &HeaderMap::new(),
            &verified(PayloadMode::Unsigned),
            BodyOptions {
                content_md5: Some(digest.0),
                max_object_size: 0,
            },
        );
        let err = read_to_end(bad).await.unwrap_err();
        assert!(matches!(map_body_io_error(err), ApiError::BadDigest));
    }

    #[tokio::test]
    async fn test_sha256_verification() {
        let expected = hex::encode(Sha256::digest(b"payload"));
        let good = body_reader(
            Body::from("payload"),
            &HeaderMap::new(),
            &verified(PayloadMode::SingleHash(expected.clone())),
            BodyOptions {
                content_md5: None,
                max_object_size: 0,
            },
        );
        assert!(read_to_end(good).await.is_ok());

        let bad = body_reader(
            Body::from("other"),
            &HeaderMap::new(),
            &verified(PayloadMode::SingleHash(expected)),
            BodyOptions {
                content_md5: None,
                max_object_size: 0,
            },
        );
        let err = read_to_end(bad).await.unwrap_err();
        assert!(matches!(
            map_body_io_error(err),
            ApiError::XAmzContentSha256Mismatch
        ));
    }

    #[tokio::test]
    async fn test_size_limit() {
        let reader = body_reader(
            Body::from(vec![0u8; 100]),
            &HeaderMap::new(),
            &verified(PayloadMode::Unsigned),
            BodyOptions {
                content_md5: None,
                max_object_size: 64,
            },
        );
        let err = read_to_end(reader).await.unwrap_err();
        assert!(matches!(
            map_body_io_error(err),
            ApiError::EntityTooLarge { max: 64 }
        ));
    }

    #[tokio::test]
    async fn test_unsigned_chunked_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-encoding", HeaderValue::from_static("aws-chunked"));
        headers.insert("x-amz-decoded-content-length", HeaderValue::from_static("9"));
        let reader = body_reader(
            Body::from("4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"),
            &headers,
            &verified(PayloadMode::Unsigned),
            BodyOptions {
                content_md5: None,
                max_object_size: 0,
            },
        );
        assert_eq!(read_to_end(reader).await.unwrap(), b"Wikipedia");
    }

    #[test]
    fn test_parse_content_md5() {
        let mut headers = HeaderMap::new();
        assert!(parse_content_md5(&headers).unwrap().is_none());

        let digest = md5::compute(b"x");
        headers.insert(
            "content-md5",
            base64::engine::general_purpose::STANDARD
                .encode(digest.0)
                .parse()
                .unwrap(),
        );
        assert_eq!(parse_content_md5(&headers).unwrap(), Some(digest.0));

        headers.insert("content-md5", HeaderValue::from_static("not-base64!!"));
        assert!(matches!(
            parse_content_md5(&headers),
            Err(ApiError::InvalidDigest(_))
        ));
    }

    #[test]
    fn test_declared_trailers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-amz-trailer",
            HeaderValue::from_static("X-Amz-Checksum-Crc32c, x-amz-checksum-sha256"),
        );
        assert_eq!(
            declared_trailers(&headers),
            vec!["x-amz-checksum-crc32c", "x-amz-checksum-sha256"]
        );
    }
}
