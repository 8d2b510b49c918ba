use bytes::Bytes;

use crate::error::BoxError;

/// Output format of a static resource conversion, naming the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    Ass,
    Srt,
    Json,
    Xml,
    Jpg,
    Png,
    Webp,
}

impl ConversionKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ConversionKind::Ass => "ass",
            ConversionKind::Srt => "srt",
            ConversionKind::Json => "json",
            ConversionKind::Xml => "xml",
            ConversionKind::Jpg => "jpg",
            ConversionKind::Png => "png",
            ConversionKind::Webp => "webp",
        }
    }
}

pub type ConvertFn = fn(Bytes) -> Result<Vec<u8>, BoxError>;

/// Transforms downloaded bytes before they are written.
#[derive(Clone, Copy)]
pub struct Conversion {
    pub kind: ConversionKind,
    pub func: ConvertFn,
}

impl Conversion {
    pub fn new(kind: ConversionKind, func: ConvertFn) -> Self {
        Self { kind, func }
    }
}

impl std::fmt::Debug for Conversion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversion").field("kind", &self.kind).finish()
    }
}
