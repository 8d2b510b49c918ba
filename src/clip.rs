use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use tracing::debug;

use crate::error::DownloadError;
use crate::range::ByteRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Media,
    /// Points at a nested segment index rather than media data.
    Index,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentRef {
    /// Seconds.
    pub duration: f64,
    pub size: u64,
    pub kind: RefKind,
}

/// Playback window `[start, end)` in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", clock(self.start), clock(self.end))
    }
}

fn clock(secs: f64) -> String {
    let whole = secs.max(0.0) as u64;
    let (h, m, s) = (whole / 3600, whole / 60 % 60, whole % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else {
        format!("{:02}m{:02}s", m, s)
    }
}

fn parse_seconds(s: &str) -> anyhow::Result<f64> {
    let mut secs = 0.0;
    for field in s.trim().split(':') {
        let value: f64 = field.trim().parse().with_context(|| format!("invalid time {:?}", s))?;
        secs = secs * 60.0 + value;
    }
    Ok(secs)
}

impl FromStr for TimeWindow {
    type Err = anyhow::Error;

    /// `START-END`, each side either seconds or `[hh:]mm:ss`.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| anyhow!("expected <start>-<end>, got {:?}", s))?;
        let window = Self::new(parse_seconds(start)?, parse_seconds(end)?);
        if window.start < 0.0 || window.end <= window.start {
            return Err(anyhow!("empty time window {:?}", s));
        }
        Ok(window)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipPlan {
    pub init: ByteRange,
    pub segments: Vec<ByteRange>,
    /// Init size plus every selected segment.
    pub total: u64,
    /// Seconds to cut from the start of the first selected segment.
    pub trim: f64,
    pub duration: f64,
}

impl ClipPlan {
    /// Every range to fetch, init first, in file order.
    pub fn ranges(&self) -> Vec<ByteRange> {
        let mut ranges = Vec::with_capacity(self.segments.len() + 1);
        ranges.push(self.init);
        ranges.extend_from_slice(&self.segments);
        ranges
    }

    /// Bytes from the first selected segment to the end of the last.
    pub fn media_span(&self) -> Option<ByteRange> {
        Some(ByteRange::new(self.segments.first()?.start, self.segments.last()?.end))
    }
}

/// Select the segments covering `window`.
///
/// `first_byte` is the offset of the first referenced segment, normally the
/// byte right after the index box. Index references occupy bytes and time but
/// are never selected.
pub fn plan_clip(
    refs: &[SegmentRef],
    window: TimeWindow,
    first_byte: i64,
    init: ByteRange,
) -> Result<ClipPlan, DownloadError> {
    let mut pre_time = 0.0;
    let mut pre_byte = first_byte;
    let mut inside = false;
    let mut trim = 0.0;
    let mut segments = vec![];
    let mut total = init.len();

    for (idx, r) in refs.iter().enumerate() {
        if r.kind != RefKind::Media {
            debug!(idx, size = r.size, "skipping non-media reference");
            pre_time += r.duration;
            pre_byte += r.size as i64;
            continue;
        }
        if !inside && window.start < pre_time + r.duration {
            trim = window.start - pre_time;
            inside = true;
        }
        if inside && window.end < pre_time {
            break;
        }
        if inside {
            segments.push(ByteRange::new(pre_byte, pre_byte + r.size as i64 - 1));
            total += r.size;
        }
        pre_time += r.duration;
        pre_byte += r.size as i64;
    }

    if segments.is_empty() {
        return Err(DownloadError::InvalidTimeWindow {
            start: window.start,
            end: window.end,
        });
    }

    Ok(ClipPlan {
        init,
        segments,
        total,
        trim,
        duration: window.duration(),
    })
}
