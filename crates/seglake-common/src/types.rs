//! Core type definitions for Seglake
//!
//! This module defines the fundamental types used throughout the system
//! including bucket/key newtypes and versioning state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version identifier string. Produced by the HLC clock
/// (`"%019d-%010d"`), or the literal `"null"` for the latest slot of a
/// bucket in suspended versioning state.
pub const NULL_VERSION_ID: &str = "null";

/// Unique identifier for a bucket
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketName(String);

impl BucketName {
    /// Create a new bucket name (validates S3 naming rules)
    pub fn new(name: impl Into<String>) -> Result<Self, BucketNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the bucket name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate bucket name according to S3 rules
    fn validate(name: &str) -> Result<(), BucketNameError> {
        if name.len() < 3 {
            return Err(BucketNameError::TooShort);
        }
        if name.len() > 63 {
            return Err(BucketNameError::TooLong);
        }

        let first = name.chars().next().unwrap();
        if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
            return Err(BucketNameError::InvalidStartChar);
        }

        let last = name.chars().last().unwrap();
        if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
            return Err(BucketNameError::InvalidEndChar);
        }

        for c in name.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.' {
                return Err(BucketNameError::InvalidChar(c));
            }
        }

        if name.contains("..") {
            return Err(BucketNameError::ConsecutivePeriods);
        }

        if name.parse::<std::net::Ipv4Addr>().is_ok() {
            return Err(BucketNameError::LooksLikeIpAddress);
        }

        Ok(())
    }
}

impl fmt::Debug for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketName({:?})", self.0)
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when creating a bucket name
#[derive(Debug, Clone, thiserror::Error)]
pub enum BucketNameError {
    #[error("bucket name must be at least 3 characters")]
    TooShort,
    #[error("bucket name must be at most 63 characters")]
    TooLong,
    #[error("bucket name must start with a lowercase letter or number")]
    InvalidStartChar,
    #[error("bucket name must end with a lowercase letter or number")]
    InvalidEndChar,
    #[error("bucket name contains invalid character: {0}")]
    InvalidChar(char),
    #[error("bucket name cannot contain consecutive periods")]
    ConsecutivePeriods,
    #[error("bucket name cannot be formatted as an IP address")]
    LooksLikeIpAddress,
}

/// Object key (path within a bucket)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Create a new object key
    pub fn new(key: impl Into<String>) -> Result<Self, ObjectKeyError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the object key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), ObjectKeyError> {
        // Maximum length: 1024 bytes (UTF-8)
        if key.len() > 1024 {
            return Err(ObjectKeyError::TooLong);
        }
        if key.is_empty() {
            return Err(ObjectKeyError::Empty);
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({:?})", self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when creating an object key
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObjectKeyError {
    #[error("object key must be at most 1024 bytes")]
    TooLong,
    #[error("object key cannot be empty")]
    Empty,
}

/// Bucket versioning state.
///
/// `Disabled` buckets never expose version ids; `Suspended` buckets
/// address their latest slot as the literal version id `"null"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersioningState {
    Enabled,
    Suspended,
    #[default]
    Disabled,
}

impl VersioningState {
    /// Parse the `x-seglake-versioning` bucket-creation header value.
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "enabled" => Some(Self::Enabled),
            "suspended" => Some(Self::Suspended),
            "unversioned" => Some(Self::Disabled),
            _ => None,
        }
    }

    /// Render the `Status` element of a VersioningConfiguration document.
    #[must_use]
    pub const fn as_status(self) -> Option<&'static str> {
        match self {
            Self::Enabled => Some("Enabled"),
            Self::Suspended => Some("Suspended"),
            Self::Disabled => None,
        }
    }
}

/// Object version state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    #[default]
    Live,
    Damaged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name_validation() {
        assert!(BucketName::new("my-bucket").is_ok());
        assert!(BucketName::new("b1").is_err());
        assert!(BucketName::new("UPPER").is_err());
        assert!(BucketName::new("double..dot").is_err());
        assert!(BucketName::new("192.168.1.1").is_err());
        assert!(BucketName::new("ends-with-dash-").is_err());
    }

    #[test]
    fn test_object_key_validation() {
        assert!(ObjectKey::new("path/to/file.txt").is_ok());
        assert!(ObjectKey::new("").is_err());
        assert!(ObjectKey::new("x".repeat(1025)).is_err());
    }

    #[test]
    fn test_versioning_header() {
        assert_eq!(
            VersioningState::from_header("enabled"),
            Some(VersioningState::Enabled)
        );
        assert_eq!(
            VersioningState::from_header("unversioned"),
            Some(VersioningState::Disabled)
        );
        assert_eq!(VersioningState::from_header("bogus"), None);
    }
}
