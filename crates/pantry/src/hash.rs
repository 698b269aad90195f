//! Fingerprint: a BLAKE3 content hash truncated to 128 bits (32 hex chars).
//!
//! The fingerprint is what larder sends as the `ETag` value. It changes if and
//! only if the bytes change, so two records with equal fingerprints serve
//! identical bodies.

use std::fmt;

/// A content fingerprint - 128 bits (16 bytes, 32 hex chars) of BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash data and return its fingerprint.
    pub fn from_data(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(hex::encode(&hash.as_bytes()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fingerprint as a strong HTTP entity tag (`"<hex>"`).
    pub fn entity_tag(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Whether an `If-None-Match` header value names this fingerprint.
    ///
    /// Accepts `*`, comma separated lists, quoted or bare tags, and weak
    /// (`W/`) tags.
    pub fn matches_if_none_match(&self, header: &str) -> bool {
        let header = header.trim();
        if header == "*" {
            return true;
        }
        header.split(',').any(|tag| {
            let tag = tag.trim();
            let tag = tag.strip_prefix("W/").unwrap_or(tag);
            tag.trim_matches('"') == self.0
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
