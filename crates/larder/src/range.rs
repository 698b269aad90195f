//! `Range: bytes=...` parsing and resolution.
//!
//! Only a single range is honoured. Anything that does not parse is treated
//! as if no `Range` header had been sent.

use std::ops::RangeInclusive;

/// A parsed byte range. Each bound is independently present or absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// The range cannot be served against content of `len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsatisfiable {
    pub len: u64,
}

impl ByteRange {
    /// Parse a `Range` header value.
    ///
    /// Accepted forms are `bytes=a-b`, `bytes=a-` (to the end) and `bytes=-b`
    /// (from the first byte through `b`). Returns `None` for anything else:
    /// a missing `bytes=` prefix, multiple ranges, non-numeric bounds, or
    /// `bytes=-`.
    pub fn parse(header: &str) -> Option<Self> {
        let spec = header.trim().strip_prefix("bytes=")?;
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        let start = parse_bound(start)?;
        let end = parse_bound(end)?;
        if start.is_none() && end.is_none() {
            return None;
        }
        Some(Self { start, end })
    }

    /// Resolve against content of `len` bytes into an inclusive byte span.
    ///
    /// An end past the last byte is clamped. A start at or past `len`, or an
    /// explicit end before the start, cannot be satisfied.
    pub fn resolve(&self, len: u64) -> Result<RangeInclusive<u64>, Unsatisfiable> {
        let start = self.start.unwrap_or(0);
        if start >= len {
            return Err(Unsatisfiable { len });
        }
        let end = match self.end {
            Some(end) if end < start => return Err(Unsatisfiable { len }),
            Some(end) => end.min(len - 1),
            None => len - 1,
        };
        Ok(start..=end)
    }
}

/// `Some(None)` for an empty bound, `None` for garbage.
fn parse_bound(s: &str) -> Option<Option<u64>> {
    let s = s.trim();
    if s.is_empty() {
        return Some(None);
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok().map(Some)
}
