//! `Range: bytes=start-end` parsing.

use thiserror::Error;

/// Inclusive byte window within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a resource of `size` bytes.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("malformed range header")]
    Malformed,

    #[error("range not satisfiable for {size} bytes")]
    Unsatisfiable { size: u64 },
}

/// Parse a `Range` header against a resource of `size` bytes.
///
/// A missing start means 0 and a missing end means the last byte; the end is
/// clamped to the resource. Only the first range of a list is honored.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let ranges = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Malformed)?;
    let first = ranges.split(',').next().unwrap_or("").trim();
    let (start, end) = first.split_once('-').ok_or(RangeError::Malformed)?;

    let start = parse_bound(start)?;
    let end = parse_bound(end)?;

    if size == 0 {
        return Err(RangeError::Unsatisfiable { size });
    }
    let last = size - 1;
    let start = start.unwrap_or(0);
    let end = end.unwrap_or(last).min(last);
    if start > end {
        return Err(RangeError::Unsatisfiable { size });
    }
    Ok(ByteRange { start, end })
}

fn parse_bound(text: &str) -> Result<Option<u64>, RangeError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeError::Malformed);
    }
    text.parse().map(Some).map_err(|_| RangeError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_window() {
        let range = parse_range("bytes=10-19", 100).unwrap();
        assert_eq!(range, ByteRange { start: 10, end: 19 });
        assert_eq!(range.len(), 10);
        assert_eq!(range.content_range(100), "bytes 10-19/100");
    }

    #[test]
    fn open_bounds_default_to_resource_edges() {
        assert_eq!(parse_range("bytes=90-", 100).unwrap(), ByteRange { start: 90, end: 99 });
        assert_eq!(parse_range("bytes=-5", 100).unwrap(), ByteRange { start: 0, end: 5 });
        assert_eq!(parse_range("bytes=50-500", 100).unwrap(), ByteRange { start: 50, end: 99 });
    }

    #[test]
    fn invalid_ranges() {
        assert_eq!(parse_range("items=1-2", 100), Err(RangeError::Malformed));
        assert_eq!(parse_range("bytes=a-2", 100), Err(RangeError::Malformed));
        assert_eq!(parse_range("bytes=100-", 100), Err(RangeError::Unsatisfiable { size: 100 }));
        assert_eq!(parse_range("bytes=20-10", 100), Err(RangeError::Unsatisfiable { size: 100 }));
        assert_eq!(parse_range("bytes=0-0", 0), Err(RangeError::Unsatisfiable { size: 0 }));
    }

    #[test]
    fn first_of_many() {
        assert_eq!(parse_range("bytes=0-1, 5-6", 10).unwrap(), ByteRange { start: 0, end: 1 });
    }
}
