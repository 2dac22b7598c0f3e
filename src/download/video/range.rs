use std::fmt;

/// One slice of the remote resource. `end` is inclusive, like the HTTP
/// `Range` header; `None` means "to the end of the resource".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub ordinal: usize,
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn is_open_ended(&self) -> bool {
        self.end.is_none()
    }

    /// Number of bytes this range covers once the open end is pinned to `total`.
    pub fn len_within(&self, total: u64) -> u64 {
        match self.end {
            Some(end) => end + 1 - self.start,
            None => total.saturating_sub(self.start),
        }
    }

    /// Header value for a request that skips the first `offset` bytes of the range.
    pub fn header_from(&self, offset: u64) -> String {
        let start = self.start + offset;
        match self.end {
            Some(end) => format!("bytes={}-{}", start, end),
            None => format!("bytes={}-", start),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "#{} [{}, {}]", self.ordinal, self.start, end),
            None => write!(f, "#{} [{}, ..)", self.ordinal, self.start),
        }
    }
}

/// Split `[0, total)` into contiguous ranges. The last one is left open so the
/// remainder of the integer division goes to the final segment.
///
/// Fewer than `segment_count` ranges are planned when the resource is smaller
/// than that, so no range ends up empty.
pub fn plan_ranges(total: u64, segment_count: usize) -> Vec<ByteRange> {
    let count = (segment_count.max(1) as u64).min(total.max(1));
    let chunk = total / count;

    (0..count)
        .map(|i| ByteRange {
            ordinal: i as usize,
            start: chunk * i,
            end: if i == count - 1 { None } else { Some(chunk * (i + 1) - 1) },
        })
        .collect()
}
