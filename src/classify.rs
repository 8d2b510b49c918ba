use std::io;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a single stream attempt ended early.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("HTTP status {0}")]
    Status(StatusCode),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The request could not be built or its redirects could not be followed.
    #[error("request error: {0}")]
    Request(#[source] reqwest::Error),

    /// The server did not honour the requested range.
    #[error("unusable response: {0}")]
    BadResponse(String),

    #[error("stream ended {missing} bytes short of the range")]
    Incomplete { missing: u64 },

    #[error("timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => StreamError::Status(status),
            None if e.is_timeout() => StreamError::Timeout,
            None if e.is_builder() || e.is_redirect() => StreamError::Request(e),
            None => StreamError::Transport(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    RateLimited,
    Transient,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub failure: Failure,
    /// Sleep before the next attempt; `None` means do not retry.
    pub backoff: Option<Duration>,
}

/// Classify the failure of attempt `attempt` (0-based) and pick its backoff.
pub fn classify(err: &StreamError, attempt: u32) -> Verdict {
    let step = (attempt + 1) as f64;
    match err {
        StreamError::Status(status) if *status == StatusCode::FORBIDDEN => {
            warn!(%status, "STREAM slowing down since 403 forbidden");
            Verdict {
                failure: Failure::RateLimited,
                backoff: Some(Duration::from_secs_f64(10.0 * step)),
            }
        }
        StreamError::Status(_) | StreamError::BadResponse(_) => {
            warn!(error = %err, "STREAM status error");
            Verdict {
                failure: Failure::Transient,
                backoff: Some(Duration::from_secs_f64(0.5 * step)),
            }
        }
        StreamError::Transport(_) | StreamError::Timeout | StreamError::Incomplete { .. } => {
            if attempt > 2 {
                warn!(error = %err, attempt, "STREAM transport error, poor network or too many parts in flight");
            } else {
                debug!(error = %err, attempt, "STREAM transport error");
            }
            Verdict {
                failure: Failure::Transient,
                backoff: Some(Duration::from_secs_f64(0.1 * step)),
            }
        }
        StreamError::Request(_) | StreamError::Io(_) | StreamError::Cancelled => {
            warn!(error = %err, "STREAM unexpected error");
            Verdict {
                failure: Failure::Fatal,
                backoff: None,
            }
        }
    }
}
