//! Ranged reads and conditional-request preconditions

use chrono::{DateTime, Utc};
use seglake_common::ApiError;

/// One resolved byte range: `start + length <= size`, `length > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    /// Inclusive end offset, for `Content-Range`.
    #[must_use]
    pub const fn end_inclusive(&self) -> u64 {
        self.start + self.length - 1
    }
}

/// Parse a `Range` header (`bytes=a-b`, `bytes=a-`, `bytes=-N`, or a
/// comma-separated list) against `size`.
///
/// `Ok(None)` means no usable ranges (serve the whole object);
/// `Err(InvalidRange)` means ranges were present but none satisfiable.
pub fn parse_range(header: &str, size: u64) -> Result<Option<Vec<ByteRange>>, ApiError> {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        // Unknown unit: ignore the header entirely
        return Ok(None);
    };
    if size == 0 {
        return Err(ApiError::InvalidRange);
    }

    let mut ranges = Vec::new();
    let mut saw_any = false;
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        saw_any = true;
        if let Some(range) = parse_one(part, size) {
            ranges.push(range);
        }
    }

    if !saw_any {
        return Ok(None);
    }
    if ranges.is_empty() {
        // All ranges fell outside the object
        return Err(ApiError::InvalidRange);
    }
    Ok(Some(ranges))
}

fn parse_one(spec: &str, size: u64) -> Option<ByteRange> {
    let (start_str, end_str) = spec.split_once('-')?;
    let start_str = start_str.trim();
    let end_str = end_str.trim();

    // Suffix form: bytes=-N, the last N bytes
    if start_str.is_empty() {
        let suffix: u64 = end_str.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        let length = suffix.min(size);
        return Some(ByteRange {
            start: size - length,
            length,
        });
    }

    let start: u64 = start_str.parse().ok()?;
    if start >= size {
        return None;
    }

    // Open form: bytes=a-
    let end = if end_str.is_empty() {
        size - 1
    } else {
        let end: u64 = end_str.parse().ok()?;
        if end < start {
            return None;
        }
        end.min(size - 1)
    };

    Some(ByteRange {
        start,
        length: end - start + 1,
    })
}

/// Conditional-request inputs.
#[derive(Debug, Default)]
pub struct Preconditions<'a> {
    pub if_match: Option<&'a str>,
    pub if_none_match: Option<&'a str>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

/// Outcome of precondition evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionOutcome {
    Proceed,
    /// 304 for GET/HEAD
    NotModified,
    /// 412
    Failed,
}

/// Evaluate in the fixed order: If-Match, If-None-Match,
/// If-Modified-Since, If-Unmodified-Since.
#[must_use]
pub fn evaluate_preconditions(
    pre: &Preconditions<'_>,
    etag: &str,
    last_modified: DateTime<Utc>,
) -> PreconditionOutcome {
    if let Some(if_match) = pre.if_match
        && !etag_list_matches(if_match, etag)
    {
        return PreconditionOutcome::Failed;
    }

    if let Some(if_none_match) = pre.if_none_match
        && etag_list_matches(if_none_match, etag)
    {
        return PreconditionOutcome::NotModified;
    }

    // HTTP dates have second granularity
    let last_modified = last_modified.with_nanosecond_zeroed();
    if let Some(since) = pre.if_modified_since
        && last_modified <= since
    {
        return PreconditionOutcome::NotModified;
    }

    if let Some(since) = pre.if_unmodified_since
        && last_modified > since
    {
        return PreconditionOutcome::Failed;
    }

    PreconditionOutcome::Proceed
}

/// `If-Match`/`If-None-Match` lists: `*`, or comma-separated quoted tags.
fn etag_list_matches(header: &str, etag: &str) -> bool {
    header.split(',').any(|candidate| {
        let candidate = candidate.trim().trim_matches('"');
        candidate == "*" || candidate == etag
    })
}

trait SecondGranularity {
    fn with_nanosecond_zeroed(self) -> Self;
}

impl SecondGranularity for DateTime<Utc> {
    fn with_nanosecond_zeroed(self) -> Self {
        use chrono::Timelike;
        self.with_nanosecond(0).unwrap_or(self)
    }
}
