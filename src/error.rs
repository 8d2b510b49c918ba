use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::sidx::IndexError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("probe of {url} failed: {reason}")]
    ProbeFailed { url: String, reason: String },

    #[error("stream retries exhausted for {part} ({attempts} attempts)")]
    RangeFetchExhausted { part: String, attempts: u32 },

    #[error("unrecoverable error while fetching {part}: {source}")]
    RangeFetchFatal {
        part: String,
        #[source]
        source: BoxError,
    },

    #[error("time range <{start}-{end}> does not intersect the segment index")]
    InvalidTimeWindow { start: f64, end: f64 },

    #[error("failed to merge parts into {path}: {source}")]
    MergeFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}")]
    RemuxFailed { program: String, status: ExitStatus },

    #[error("malformed segment index: {0}")]
    Index(#[from] IndexError),

    #[error("conversion to {kind} failed: {source}")]
    Convert {
        kind: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("download cancelled")]
    Cancelled,

    #[error("part worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;
