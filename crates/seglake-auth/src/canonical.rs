//! Canonical encoding for SigV4
//!
//! Percent-encoding per the RFC 3986 unreserved set and canonical query
//! construction. `+` is a literal byte here, never a space: it arrives
//! percent-encoded from conforming signers, and decoding it as a space
//! would make the canonical form diverge between signer and verifier.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Percent-encode a string, AWS style. Keeps `A-Z a-z 0-9 - _ . ~`
/// literal; everything else becomes uppercase `%HH`. Set `keep_slash`
/// when encoding a path so segment separators survive.
#[must_use]
pub fn uri_encode(s: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b'/' if keep_slash => out.push('/'),
            _ => {
                out.push('%');
                out.push(
                    char::from_digit(u32::from(b >> 4), 16)
                        .unwrap()
                        .to_ascii_uppercase(),
                );
                out.push(
                    char::from_digit(u32::from(b & 0xf), 16)
                        .unwrap()
                        .to_ascii_uppercase(),
                );
            }
        }
    }
    out
}

/// Percent-decode a string. Malformed escapes pass through untouched.
/// `+` is NOT decoded to a space.
#[must_use]
pub fn uri_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = s.get(i + 1..i + 3)
            && let Ok(byte) = u8::from_str_radix(hex, 16)
        {
            out.push(byte);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split a raw query string into decoded (key, value) pairs, keeping
/// duplicates and order.
#[must_use]
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (uri_decode(key), uri_decode(value))
        })
        .collect()
}

/// Build the canonical query string: each key and value re-encoded,
/// pairs sorted by key then value, joined `k=v` with `&`.
#[must_use]
pub fn canonical_query(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (uri_encode(k, false), uri_encode(v, false)))
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Collapse runs of SP/TAB into a single space and trim the ends, as
/// canonical header values require.
#[must_use]
pub fn collapse_ws(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_ws = false;
    for c in value.trim_matches([' ', '\t']).chars() {
        if c == ' ' || c == '\t' {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

/// SHA-256 of `data` as lowercase hex.
#[must_use]
pub fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// HMAC-SHA-256 of `data` under `key`.
#[must_use]
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Derive the SigV4 signing key for (secret, date, region, "s3").
#[must_use]
pub fn derive_signing_key(secret: &str, date: &str, region: &str) -> [u8; 32] {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

/// Constant-time, case-insensitive hex signature comparison.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x.to_ascii_lowercase() ^ y.to_ascii_lowercase();
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("hello", false), "hello");
        assert_eq!(uri_encode("hello world", false), "hello%20world");
        assert_eq!(uri_encode("a/b", false), "a%2Fb");
        assert_eq!(uri_encode("a/b", true), "a/b");
        assert_eq!(uri_encode("a+b", false), "a%2Bb");
        assert_eq!(uri_encode("~tilde-ok_.", false), "~tilde-ok_.");
    }

    #[test]
    fn test_uri_decode_plus_is_literal() {
        assert_eq!(uri_decode("a%20b"), "a b");
        assert_eq!(uri_decode("a+b"), "a+b");
        assert_eq!(uri_decode("%zzbad"), "%zzbad");
    }

    #[test]
    fn test_canonical_query_deterministic() {
        // Parameter order must not matter
        let a = canonical_query(&parse_query("b=2&a=1&a=0"));
        let b = canonical_query(&parse_query("a=0&a=1&b=2"));
        assert_eq!(a, b);
        assert_eq!(a, "a=0&a=1&b=2");
    }

    #[test]
    fn test_canonical_query_encoding_normalized() {
        // Differing escapes of unreserved characters canonicalize equal
        let a = canonical_query(&parse_query("k=%61bc"));
        let b = canonical_query(&parse_query("k=abc"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_collapse_ws() {
        assert_eq!(collapse_ws("  a   b\t\tc  "), "a b c");
        assert_eq!(collapse_ws("plain"), "plain");
    }

    #[test]
    fn test_hex_sha256() {
        assert_eq!(
            hex_sha256(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_constant_time_eq_case_insensitive() {
        assert!(constant_time_eq("ABCDEF", "abcdef"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn test_derive_signing_key() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            "20130524",
            "us-east-1",
        );
        assert_eq!(key.len(), 32);
        // Deterministic, and sensitive to every scope component
        assert_eq!(
            key,
            derive_signing_key("wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY", "20130524", "us-east-1")
        );
        assert_ne!(
            key,
            derive_signing_key("wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY", "20130525", "us-east-1")
        );
        assert_ne!(
            key,
            derive_signing_key("wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY", "20130524", "eu-west-1")
        );
    }
}
