use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};

/// Inclusive byte range `[start, end]`.
///
/// Planning may produce ranges with `start > end`; those hold no bytes and
/// are never fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: i64,
    pub end: i64,
}

impl ByteRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        if self.start > self.end {
            0
        } else {
            (self.end - self.start + 1) as u64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for ByteRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (start, end) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| anyhow!("expected <start>-<end>, got {:?}", s))?;
        let start: i64 = start.trim().parse().context("invalid range start")?;
        let end: i64 = end.trim().parse().context("invalid range end")?;
        if start < 0 || start > end {
            return Err(anyhow!("invalid byte range {}-{}", start, end));
        }
        Ok(Self { start, end })
    }
}

/// Split `[0, total - 1]` into `workers` contiguous ranges; the last range
/// absorbs the remainder.
pub fn plan_ranges(total: i64, workers: usize) -> Vec<ByteRange> {
    let workers = workers.max(1);
    let total = total.max(0);
    let part_size = total / workers as i64;

    (0..workers)
        .map(|i| {
            let start = i as i64 * part_size;
            let end = if i == workers - 1 {
                total - 1
            } else {
                (i as i64 + 1) * part_size - 1
            };
            ByteRange { start, end }
        })
        .collect()
}
