//! HTTP Range header parsing (RFC 7233 byte-range grammar)
//!
//! Three forms are accepted: `bytes=start-end`, `bytes=start-`, and
//! `bytes=-suffix`. A start beyond the object size is reset to 0 rather
//! than rejected, matching the streaming endpoint's lenient behavior.

/// A parsed, unresolved range request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-end` (inclusive end)
    FromTo(u64, u64),
    /// `bytes=start-`
    From(u64),
    /// `bytes=-suffix`: the last `suffix` bytes
    Suffix(u64),
}

impl ByteRange {
    /// Parse a Range header value. Returns `None` for anything that is not
    /// a single valid byte range; callers then serve the whole object.
    pub fn parse(header: &str) -> Option<ByteRange> {
        let value = header.trim().strip_prefix("bytes=")?;
        let (start, end) = value.split_once('-')?;
        let start = start.trim();
        let end = end.trim();

        match (start.is_empty(), end.is_empty()) {
            (false, false) => {
                let s: u64 = start.parse().ok()?;
                let e: u64 = end.parse().ok()?;
                if s > e {
                    return None;
                }
                Some(ByteRange::FromTo(s, e))
            },
            (false, true) => Some(ByteRange::From(start.parse().ok()?)),
            (true, false) => Some(ByteRange::Suffix(end.parse().ok()?)),
            (true, true) => None,
        }
    }

    /// Resolve against the object size, producing `(offset, length)`.
    /// Out-of-range starts are reset to 0.
    pub fn resolve(&self, total_size: u64) -> (u64, u64) {
        if total_size == 0 {
            return (0, 0);
        }
        match *self {
            ByteRange::FromTo(start, end) => {
                if start >= total_size {
                    tracing::warn!(start, total_size, "Range start exceeds object size, resetting");
                    return (0, total_size);
                }
                let end = end.min(total_size - 1);
                (start, end - start + 1)
            },
            ByteRange::From(start) => {
                if start >= total_size {
                    tracing::warn!(start, total_size, "Range start exceeds object size, resetting");
                    return (0, total_size);
                }
                (start, total_size - start)
            },
            ByteRange::Suffix(suffix) => {
                let len = suffix.min(total_size);
                (total_size - len, len)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_grammars() {
        assert_eq!(ByteRange::parse("bytes=0-499"), Some(ByteRange::FromTo(0, 499)));
        assert_eq!(ByteRange::parse("bytes=500-"), Some(ByteRange::From(500)));
        assert_eq!(ByteRange::parse("bytes=-200"), Some(ByteRange::Suffix(200)));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(ByteRange::parse("bytes=-"), None);
        assert_eq!(ByteRange::parse("bytes=a-b"), None);
        assert_eq!(ByteRange::parse("0-499"), None);
        assert_eq!(ByteRange::parse("bytes=500-100"), None);
    }

    #[test]
    fn resolves_inclusive_ranges() {
        assert_eq!(ByteRange::FromTo(0, 499).resolve(1000), (0, 500));
        assert_eq!(ByteRange::FromTo(0, 4999).resolve(1000), (0, 1000));
        assert_eq!(ByteRange::From(400).resolve(1000), (400, 600));
        assert_eq!(ByteRange::Suffix(200).resolve(1000), (800, 200));
        assert_eq!(ByteRange::Suffix(5000).resolve(1000), (0, 1000));
    }

    #[test]
    fn out_of_range_start_resets_to_zero() {
        assert_eq!(ByteRange::From(5000).resolve(1000), (0, 1000));
        assert_eq!(ByteRange::FromTo(5000, 6000).resolve(1000), (0, 1000));
    }
}
