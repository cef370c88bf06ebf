//! HTTP Range request parsing module
//!
//! Single byte-range parsing for resumable downloads (RFC 7233).

/// Inclusive byte range resolved against a concrete file size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by the range
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Content-Range` header
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.end)
    }
}

/// Outcome of looking at a `Range` header
#[derive(Debug, PartialEq, Eq)]
pub enum RangeParseResult {
    /// Serve this part with 206
    Valid(ByteRange),
    /// Syntactically fine but outside the file - 416
    NotSatisfiable,
    /// Absent, malformed, multi-range or non-bytes unit: serve the whole file
    None,
}

/// Parse a `Range` header against the file size
///
/// Supported forms are `bytes=start-end`, `bytes=start-` and `bytes=-suffix`.
///
/// # Examples
/// ```
/// use nosniff_server::http::range::{parse_range_header, ByteRange, RangeParseResult};
///
/// let result = parse_range_header(Some("bytes=0-99"), 1000);
/// assert_eq!(result, RangeParseResult::Valid(ByteRange { start: 0, end: 99 }));
/// assert_eq!(parse_range_header(None, 1000), RangeParseResult::None);
/// ```
pub fn parse_range_header(range_header: Option<&str>, file_size: u64) -> RangeParseResult {
    let Some(ranges) = range_header.and_then(|h| h.trim().strip_prefix("bytes=")) else {
        return RangeParseResult::None;
    };

    if ranges.contains(',') {
        return RangeParseResult::None;
    }

    let Some((first, last)) = ranges.split_once('-') else {
        return RangeParseResult::None;
    };

    match (first.trim(), last.trim()) {
        ("", suffix) => suffix_range(suffix, file_size),
        (start, end) => bounded_range(start, end, file_size),
    }
}

/// "-500" means the last 500 bytes
fn suffix_range(suffix: &str, file_size: u64) -> RangeParseResult {
    let Ok(suffix) = suffix.parse::<u64>() else {
        return RangeParseResult::None;
    };
    if suffix == 0 || file_size == 0 {
        return RangeParseResult::NotSatisfiable;
    }

    RangeParseResult::Valid(ByteRange {
        start: file_size.saturating_sub(suffix),
        end: file_size - 1,
    })
}

/// "100-" or "100-199"; the end is clamped to the last byte
fn bounded_range(start: &str, end: &str, file_size: u64) -> RangeParseResult {
    let Ok(start) = start.parse::<u64>() else {
        return RangeParseResult::None;
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(e) => Some(e),
            Err(_) => return RangeParseResult::None,
        }
    };

    if start >= file_size {
        return RangeParseResult::NotSatisfiable;
    }

    let last = file_size - 1;
    match end {
        Some(e) if e < start => RangeParseResult::NotSatisfiable,
        Some(e) => RangeParseResult::Valid(ByteRange { start, end: e.min(last) }),
        None => RangeParseResult::Valid(ByteRange { start, end: last }),
    }
}
