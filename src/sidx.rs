//! Parser for the ISO base media `sidx` (segment index) box.

use bytes::Buf;
use thiserror::Error;

use crate::clip::{RefKind, SegmentRef};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("box truncated while reading {0}")]
    Truncated(&'static str),
    #[error("expected a sidx box, found {0:?}")]
    UnexpectedBox(String),
    #[error("timescale is zero")]
    ZeroTimescale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub kind: RefKind,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentIndex {
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    /// Distance from the end of the box to the first referenced byte.
    pub first_offset: u64,
    pub references: Vec<Reference>,
}

impl SegmentIndex {
    pub fn parse(mut buf: &[u8]) -> Result<Self, IndexError> {
        need(buf, 8, "box header")?;
        let size = buf.get_u32();
        let kind = buf.copy_to_bytes(4);
        if size == 1 {
            need(buf, 8, "largesize")?;
            buf.advance(8);
        }
        if &kind[..] != b"sidx" {
            return Err(IndexError::UnexpectedBox(String::from_utf8_lossy(&kind).into_owned()));
        }

        need(buf, 12, "full box header")?;
        let version = buf.get_u8();
        buf.advance(3); // flags
        let _reference_id = buf.get_u32();
        let timescale = buf.get_u32();
        if timescale == 0 {
            return Err(IndexError::ZeroTimescale);
        }

        let (earliest_presentation_time, first_offset) = if version == 0 {
            need(buf, 8, "presentation time")?;
            (buf.get_u32() as u64, buf.get_u32() as u64)
        } else {
            need(buf, 16, "presentation time")?;
            (buf.get_u64(), buf.get_u64())
        };

        need(buf, 4, "reference count")?;
        buf.advance(2); // reserved
        let count = buf.get_u16() as usize;
        need(buf, count * 12, "references")?;

        let references = (0..count)
            .map(|_| {
                let word = buf.get_u32();
                let subsegment_duration = buf.get_u32();
                buf.advance(4); // SAP flags
                Reference {
                    kind: if word >> 31 == 0 { RefKind::Media } else { RefKind::Index },
                    referenced_size: word & 0x7fff_ffff,
                    subsegment_duration,
                }
            })
            .collect();

        Ok(Self {
            timescale,
            earliest_presentation_time,
            first_offset,
            references,
        })
    }

    /// References with durations converted to seconds.
    pub fn segment_refs(&self) -> Vec<SegmentRef> {
        let timescale = self.timescale as f64;
        self.references
            .iter()
            .map(|r| SegmentRef {
                duration: r.subsegment_duration as f64 / timescale,
                size: r.referenced_size as u64,
                kind: r.kind,
            })
            .collect()
    }
}

fn need(buf: &[u8], n: usize, what: &'static str) -> Result<(), IndexError> {
    if buf.len() < n {
        Err(IndexError::Truncated(what))
    } else {
        Ok(())
    }
}
