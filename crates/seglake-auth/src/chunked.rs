//! aws-chunked streaming body decoder
//!
//! Frames: `"<hex-size>[;chunk-signature=<hex>]\r\n" <data> "\r\n"`,
//! terminated by a zero-size chunk and an optional trailer block. Chunk
//! signatures form a chain seeded by the request envelope signature.
//! The decoder is a `Stream` of decoded payload bytes; the handler
//! behind it sees a plain body of `x-amz-decoded-content-length` bytes.

use crate::canonical::{collapse_ws, constant_time_eq, hex_sha256, hmac_sha256};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;

/// Chunk size lines longer than this are rejected.
pub const MAX_CHUNK_LINE_LEN: usize = 4096;

/// Hash of the empty string, a fixed component of every chunk
/// string-to-sign.
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Decoder failures. The gateway maps these onto the S3 taxonomy.
#[derive(Debug, Error)]
pub enum ChunkedError {
    #[error("chunk size line too long")]
    LineTooLong,

    #[error("malformed chunk framing: {0}")]
    Malformed(String),

    #[error("chunk signature mismatch")]
    SignatureMismatch,

    #[error("trailer signature mismatch")]
    TrailerSignatureMismatch,

    #[error("missing declared trailer: {0}")]
    MissingTrailer(String),

    #[error("trailer checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("decoded length mismatch: got {got}, declared {declared}")]
    LengthMismatch { got: u64, declared: u64 },

    #[error("unexpected end of chunked stream")]
    UnexpectedEof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Signing context carried over from SigV4 verification; the envelope
/// signature seeds the chunk chain.
#[derive(Debug, Clone)]
pub struct ChunkSigning {
    pub signing_key: [u8; 32],
    pub seed_signature: String,
    pub amz_date: String,
    pub scope: String,
}

/// Decoder operating mode, per the `x-amz-content-sha256` sentinel.
pub enum ChunkedMode {
    Unsigned,
    UnsignedTrailer,
    Signed(ChunkSigning),
    SignedTrailer(ChunkSigning),
}

impl ChunkedMode {
    const fn has_trailer(&self) -> bool {
        matches!(self, Self::UnsignedTrailer | Self::SignedTrailer(_))
    }

    const fn signing(&self) -> Option<&ChunkSigning> {
        match self {
            Self::Signed(s) | Self::SignedTrailer(s) => Some(s),
            _ => None,
        }
    }
}

/// Running checksum for a declared checksum trailer.
enum TrailerChecksum {
    Crc32(crc32fast::Hasher),
    Crc32c(u32),
    Crc64Nvme(crc64fast_nvme::Digest),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl TrailerChecksum {
    /// `name` is the full trailer header name, e.g. `x-amz-checksum-crc32c`.
    fn for_trailer(name: &str) -> Option<(String, Self)> {
        let algo = name.strip_prefix("x-amz-checksum-")?;
        let hasher = match algo {
            "crc32" => Self::Crc32(crc32fast::Hasher::new()),
            "crc32c" => Self::Crc32c(0),
            "crc64nvme" => Self::Crc64Nvme(crc64fast_nvme::Digest::new()),
            "sha1" => Self::Sha1(Sha1::new()),
            "sha256" => Self::Sha256(Sha256::new()),
            _ => return None,
        };
        Some((name.to_string(), hasher))
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(h) => h.update(data),
            Self::Crc32c(state) => *state = crc32c::crc32c_append(*state, data),
            Self::Crc64Nvme(d) => d.write(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Crc32(h) => h.finalize().to_be_bytes().to_vec(),
            Self::Crc32c(state) => state.to_be_bytes().to_vec(),
            Self::Crc64Nvme(d) => d.sum64().to_be_bytes().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

#[derive(Clone, Copy)]
enum DecodeState {
    ChunkHeader,
    ChunkData { remaining: u64 },
    ChunkDataCrlf,
    Trailers,
    Done,
}

enum Step {
    Emit(Bytes),
    NeedMore,
    Finished,
}

/// Streaming aws-chunked decoder.
pub struct ChunkedDecoder<S> {
    inner: S,
    inner_done: bool,
    buf: BytesMut,
    state: DecodeState,
    mode: ChunkedMode,
    /// Previous signature in the chain (starts at the seed)
    prev_signature: String,
    /// Signature claimed by the chunk currently being consumed
    pending_signature: Option<String>,
    chunk_hasher: Option<Sha256>,
    /// Trailer names required by the `x-amz-trailer` header
    declared_trailers: Vec<String>,
    /// (trailer name, running hasher) when a checksum trailer is declared
    checksum: Option<(String, TrailerChecksum)>,
    collected_trailers: Vec<(String, String)>,
    decoded: u64,
    declared_len: Option<u64>,
}

impl<S> ChunkedDecoder<S> {
    pub fn new(inner: S, mode: ChunkedMode, declared_trailers: Vec<String>, declared_len: Option<u64>) -> Self {
        let checksum = declared_trailers
            .iter()
            .find_map(|name| TrailerChecksum::for_trailer(name));
        let prev_signature = mode
            .signing()
            .map(|s| s.seed_signature.clone())
            .unwrap_or_default();
        Self {
            inner,
            inner_done: false,
            buf: BytesMut::new(),
            state: DecodeState::ChunkHeader,
            mode,
            prev_signature,
            pending_signature: None,
            chunk_hasher: None,
            declared_trailers,
            checksum,
            collected_trailers: Vec::new(),
            decoded: 0,
            declared_len,
        }
    }

    /// Take one complete `\r\n`-terminated line out of the buffer.
    fn take_line(&mut self) -> Result<Option<String>, ChunkedError> {
        let Some(pos) = self.buf.windows(2).position(|w| w == b"\r\n") else {
            if self.buf.len() > MAX_CHUNK_LINE_LEN {
                return Err(ChunkedError::LineTooLong);
            }
            return Ok(None);
        };
        if pos > MAX_CHUNK_LINE_LEN {
            return Err(ChunkedError::LineTooLong);
        }
        let line = self.buf.split_to(pos);
        self.buf.advance(2);
        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| ChunkedError::Malformed("chunk line not utf-8".into()))
    }

    fn verify_chunk_signature(&mut self) -> Result<(), ChunkedError> {
        let Some(signing) = self.mode.signing() else {
            self.pending_signature = None;
            self.chunk_hasher = None;
            return Ok(());
        };
        let claimed = self
            .pending_signature
            .take()
            .ok_or_else(|| ChunkedError::Malformed("missing chunk-signature".into()))?;
        let chunk_hash = self
            .chunk_hasher
            .take()
            .map_or_else(|| EMPTY_SHA256.to_string(), |h| hex::encode(h.finalize()));
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256-PAYLOAD\n{}\n{}\n{}\n{}\n{}",
            signing.amz_date, signing.scope, self.prev_signature, EMPTY_SHA256, chunk_hash
        );
        let computed = hex::encode(hmac_sha256(&signing.signing_key, string_to_sign.as_bytes()));
        if !constant_time_eq(&computed, &claimed) {
            return Err(ChunkedError::SignatureMismatch);
        }
        self.prev_signature = computed;
        Ok(())
    }

    fn finish_trailers(&mut self) -> Result<(), ChunkedError> {
        // Signed trailer block
        if let (true, Some(signing)) = (self.mode.has_trailer(), self.mode.signing()) {
            let claimed = self
                .collected_trailers
                .iter()
                .find(|(k, _)| k == "x-amz-trailer-signature")
                .map(|(_, v)| v.clone())
                .ok_or_else(|| ChunkedError::Malformed("missing x-amz-trailer-signature".into()))?;
            let mut canonical: Vec<(String, String)> = self
                .collected_trailers
                .iter()
                .filter(|(k, _)| k != "x-amz-trailer-signature")
                .cloned()
                .collect();
            canonical.sort();
            let canonical_block: String = canonical
                .iter()
                .map(|(k, v)| format!("{k}:{v}\n"))
                .collect();
            let string_to_sign = format!(
                "AWS4-HMAC-SHA256-TRAILER\n{}\n{}\n{}\n{}",
                signing.amz_date,
                signing.scope,
                self.prev_signature,
                hex_sha256(canonical_block.as_bytes())
            );
            let computed =
                hex::encode(hmac_sha256(&signing.signing_key, string_to_sign.as_bytes()));
            if !constant_time_eq(&computed, &claimed) {
                return Err(ChunkedError::TrailerSignatureMismatch);
            }
        }

        // Every declared trailer must be present
        for name in &self.declared_trailers {
            if !self.collected_trailers.iter().any(|(k, _)| k == name) {
                return Err(ChunkedError::MissingTrailer(name.clone()));
            }
        }

        // Checksum trailer validation
        if let Some((name, hasher)) = self.checksum.take() {
            let value = self
                .collected_trailers
                .iter()
                .find(|(k, _)| k == &name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| ChunkedError::MissingTrailer(name.clone()))?;
            let expected = BASE64
                .decode(value.trim())
                .map_err(|_| ChunkedError::Malformed(format!("trailer {name} not base64")))?;
            if expected != hasher.finalize() {
                return Err(ChunkedError::ChecksumMismatch(name));
            }
        }

        if let Some(declared) = self.declared_len
            && self.decoded != declared
        {
            return Err(ChunkedError::LengthMismatch {
                got: self.decoded,
                declared,
            });
        }

        Ok(())
    }

    fn step(&mut self) -> Result<Step, ChunkedError> {
        loop {
            match self.state {
                DecodeState::ChunkHeader => {
                    let Some(line) = self.take_line()? else {
                        return Ok(Step::NeedMore);
                    };
                    let (size_str, extension) = line.split_once(';').unwrap_or((&line, ""));
                    let size = u64::from_str_radix(size_str.trim(), 16)
                        .map_err(|_| ChunkedError::Malformed("bad chunk size".into()))?;
                    if self.mode.signing().is_some() {
                        let signature = extension
                            .strip_prefix("chunk-signature=")
                            .map(str::to_string)
                            .ok_or_else(|| {
                                ChunkedError::Malformed("missing chunk-signature".into())
                            })?;
                        self.pending_signature = Some(signature);
                    }
                    if size == 0 {
                        // Zero chunk carries the signature of empty data
                        self.verify_chunk_signature()?;
                        self.state = DecodeState::Trailers;
                    } else {
                        if self.mode.signing().is_some() {
                            self.chunk_hasher = Some(Sha256::new());
                        }
                        self.state = DecodeState::ChunkData { remaining: size };
                    }
                }
                DecodeState::ChunkData { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(Step::NeedMore);
                    }
                    let take = usize::try_from(remaining.min(self.buf.len() as u64))
                        .unwrap_or(usize::MAX);
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        DecodeState::ChunkDataCrlf
                    } else {
                        DecodeState::ChunkData { remaining: left }
                    };
                    let bytes = self.buf.split_to(take).freeze();
                    if let Some(h) = &mut self.chunk_hasher {
                        h.update(&bytes);
                    }
                    if let Some((_, checksum)) = &mut self.checksum {
                        checksum.update(&bytes);
                    }
                    self.decoded += bytes.len() as u64;
                    return Ok(Step::Emit(bytes));
                }
                DecodeState::ChunkDataCrlf => {
                    if self.buf.len() < 2 {
                        return Ok(Step::NeedMore);
                    }
                    if &self.buf[..2] != b"\r\n" {
                        return Err(ChunkedError::Malformed("missing CRLF after chunk".into()));
                    }
                    self.buf.advance(2);
                    self.verify_chunk_signature()?;
                    self.state = DecodeState::ChunkHeader;
                }
                DecodeState::Trailers => {
                    let Some(line) = self.take_line()? else {
                        // Modes without a trailer block may end right
                        // after the zero chunk.
                        if self.inner_done
                            && self.buf.is_empty()
                            && !self.mode.has_trailer()
                            && self.collected_trailers.is_empty()
                        {
                            self.finish_trailers()?;
                            self.state = DecodeState::Done;
                            continue;
                        }
                        return Ok(Step::NeedMore);
                    };
                    if line.is_empty() {
                        self.finish_trailers()?;
                        self.state = DecodeState::Done;
                        continue;
                    }
                    let (name, value) = line
                        .split_once(':')
                        .ok_or_else(|| ChunkedError::Malformed("bad trailer line".into()))?;
                    self.collected_trailers
                        .push((name.trim().to_ascii_lowercase(), collapse_ws(value)));
                }
                DecodeState::Done => return Ok(Step::Finished),
            }
        }
    }
}

impl<S> Stream for ChunkedDecoder<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, ChunkedError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.step() {
                Ok(Step::Emit(bytes)) => return Poll::Ready(Some(Ok(bytes))),
                Ok(Step::Finished) => return Poll::Ready(None),
                Ok(Step::NeedMore) => {}
                Err(e) => {
                    this.state = DecodeState::Done;
                    return Poll::Ready(Some(Err(e)));
                }
            }
            if this.inner_done {
                this.state = DecodeState::Done;
                return Poll::Ready(Some(Err(ChunkedError::UnexpectedEof)));
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buf.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => {
                    this.state = DecodeState::Done;
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => this.inner_done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::derive_signing_key;
    use futures::StreamExt;

    fn byte_stream(frames: Vec<&[u8]>) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Unpin {
        futures::stream::iter(
            frames
                .into_iter()
                .map(|f| Ok(Bytes::copy_from_slice(f)))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect<S>(mut decoder: ChunkedDecoder<S>) -> Result<Vec<u8>, ChunkedError>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
    {
        let mut out = Vec::new();
        while let Some(item) = decoder.next().await {
            out.extend_from_slice(&item?);
        }
        Ok(out)
    }

    fn signing() -> ChunkSigning {
        ChunkSigning {
            signing_key: derive_signing_key("chunksecret", "20240101", "us-east-1"),
            seed_signature: "0".repeat(64),
            amz_date: "20240101T000000Z".to_string(),
            scope: "20240101/us-east-1/s3/aws4_request".to_string(),
        }
    }

    fn chunk_signature(signing: &ChunkSigning, prev: &str, data: &[u8]) -> String {
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256-PAYLOAD\n{}\n{}\n{}\n{}\n{}",
            signing.amz_date,
            signing.scope,
            prev,
            EMPTY_SHA256,
            hex_sha256(data)
        );
        hex::encode(hmac_sha256(&signing.signing_key, string_to_sign.as_bytes()))
    }

    fn signed_frame(data: &[&[u8]]) -> Vec<u8> {
        let signing = signing();
        let mut prev = signing.seed_signature.clone();
        let mut out = Vec::new();
        for chunk in data {
            let sig = chunk_signature(&signing, &prev, chunk);
            out.extend_from_slice(
                format!("{:x};chunk-signature={}\r\n", chunk.len(), sig).as_bytes(),
            );
            out.extend_from_slice(chunk);
            out.extend_from_slice(b"\r\n");
            prev = sig;
        }
        let final_sig = chunk_signature(&signing, &prev, b"");
        out.extend_from_slice(format!("0;chunk-signature={final_sig}\r\n\r\n").as_bytes());
        out
    }

    #[tokio::test]
    async fn test_unsigned_decode() {
        let body = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![body]),
            ChunkedMode::Unsigned,
            Vec::new(),
            Some(9),
        );
        assert_eq!(collect(decoder).await.unwrap(), b"Wikipedia");
    }

    #[tokio::test]
    async fn test_unsigned_decode_split_frames() {
        // Frames split mid-header and mid-data
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![b"4\r", b"\nWi", b"ki\r\n5\r\npedia\r\n0\r\n", b"\r\n"]),
            ChunkedMode::Unsigned,
            Vec::new(),
            Some(9),
        );
        assert_eq!(collect(decoder).await.unwrap(), b"Wikipedia");
    }

    #[tokio::test]
    async fn test_length_mismatch_detected() {
        let body = b"4\r\nWiki\r\n0\r\n\r\n";
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![body]),
            ChunkedMode::Unsigned,
            Vec::new(),
            Some(9),
        );
        assert!(matches!(
            collect(decoder).await,
            Err(ChunkedError::LengthMismatch { got: 4, declared: 9 })
        ));
    }

    #[tokio::test]
    async fn test_signed_decode_accepts_valid_chain() {
        let body = signed_frame(&[b"hello ", b"world"]);
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![&body]),
            ChunkedMode::Signed(signing()),
            Vec::new(),
            Some(11),
        );
        assert_eq!(collect(decoder).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_signed_decode_rejects_mutation() {
        let mut body = signed_frame(&[b"hello ", b"world"]);
        // Flip one payload byte ("hello" -> "hxllo")
        let pos = body.windows(5).position(|w| w == b"hello").unwrap();
        body[pos + 1] = b'x';
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![&body]),
            ChunkedMode::Signed(signing()),
            Vec::new(),
            Some(11),
        );
        assert!(matches!(
            collect(decoder).await,
            Err(ChunkedError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_signed_decode_rejects_wrong_seed() {
        let body = signed_frame(&[b"data"]);
        let mut bad = signing();
        bad.seed_signature = "1".repeat(64);
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![&body]),
            ChunkedMode::Signed(bad),
            Vec::new(),
            Some(4),
        );
        assert!(matches!(
            collect(decoder).await,
            Err(ChunkedError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_unsigned_trailer_checksum_validates() {
        let payload = b"trailer checked payload";
        let crc = crc32c::crc32c(payload);
        let trailer_value = BASE64.encode(crc.to_be_bytes());
        let body = format!(
            "{:x}\r\n{}\r\n0\r\nx-amz-checksum-crc32c:{}\r\n\r\n",
            payload.len(),
            std::str::from_utf8(payload).unwrap(),
            trailer_value
        );
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![body.as_bytes()]),
            ChunkedMode::UnsignedTrailer,
            vec!["x-amz-checksum-crc32c".to_string()],
            Some(payload.len() as u64),
        );
        assert_eq!(collect(decoder).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_unsigned_trailer_checksum_mismatch() {
        let payload = b"payload";
        let body = format!(
            "{:x}\r\n{}\r\n0\r\nx-amz-checksum-crc32:{}\r\n\r\n",
            payload.len(),
            std::str::from_utf8(payload).unwrap(),
            BASE64.encode(0u32.to_be_bytes())
        );
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![body.as_bytes()]),
            ChunkedMode::UnsignedTrailer,
            vec!["x-amz-checksum-crc32".to_string()],
            Some(payload.len() as u64),
        );
        assert!(matches!(
            collect(decoder).await,
            Err(ChunkedError::ChecksumMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_declared_trailer() {
        let body = b"3\r\nabc\r\n0\r\n\r\n";
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![body]),
            ChunkedMode::UnsignedTrailer,
            vec!["x-amz-checksum-sha256".to_string()],
            Some(3),
        );
        assert!(matches!(
            collect(decoder).await,
            Err(ChunkedError::MissingTrailer(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_chunk_line_rejected() {
        let mut body = vec![b'f'; MAX_CHUNK_LINE_LEN + 16];
        body.extend_from_slice(b"\r\n");
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![&body]),
            ChunkedMode::Unsigned,
            Vec::new(),
            None,
        );
        assert!(matches!(collect(decoder).await, Err(ChunkedError::LineTooLong)));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_eof() {
        let body = b"ff\r\nshort";
        let decoder = ChunkedDecoder::new(
            byte_stream(vec![body]),
            ChunkedMode::Unsigned,
            Vec::new(),
            None,
        );
        assert!(matches!(
            collect(decoder).await,
            Err(ChunkedError::UnexpectedEof)
        ));
    }

    #[tokio::test]
    async fn test_signed_trailer_block() {
        let signing_ctx = signing();
        let payload: &[u8] = b"signed trailer payload";
        let mut body = Vec::new();
        let sig1 = chunk_signature(&signing_ctx, &signing_ctx.seed_signature, payload);
        body.extend_from_slice(
            format!("{:x};chunk-signature={}\r\n", payload.len(), sig1).as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(b"\r\n");
        let sig0 = chunk_signature(&signing_ctx, &sig1, b"");
        body.extend_from_slice(format!("0;chunk-signature={sig0}\r\n").as_bytes());

        let crc = crc32fast::hash(payload);
        let trailer_value = BASE64.encode(crc.to_be_bytes());
        let canonical = format!("x-amz-checksum-crc32:{trailer_value}\n");
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256-TRAILER\n{}\n{}\n{}\n{}",
            signing_ctx.amz_date,
            signing_ctx.scope,
            sig0,
            hex_sha256(canonical.as_bytes())
        );
        let trailer_sig = hex::encode(hmac_sha256(
            &signing_ctx.signing_key,
            string_to_sign.as_bytes(),
        ));
        body.extend_from_slice(
            format!(
                "x-amz-checksum-crc32:{trailer_value}\r\nx-amz-trailer-signature:{trailer_sig}\r\n\r\n"
            )
            .as_bytes(),
        );

        let decoder = ChunkedDecoder::new(
            byte_stream(vec![&body]),
            ChunkedMode::SignedTrailer(signing_ctx),
            vec!["x-amz-checksum-crc32".to_string()],
            Some(payload.len() as u64),
        );
        assert_eq!(collect(decoder).await.unwrap(), payload);
    }
}
