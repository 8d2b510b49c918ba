use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::{header, Client, StatusCode};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::classify::{classify, Failure, StreamError};
use crate::error::DownloadError;
use crate::progress::{Progress, TaskId};
use crate::range::ByteRange;
use crate::speed::SpeedGovernor;

/// Mirror URLs of one resource, shared by every part of a download.
///
/// A redirected mirror is replaced by its final URL so later attempts skip
/// the redirect.
#[derive(Debug, Clone)]
pub struct Mirrors {
    urls: Arc<Mutex<Vec<Url>>>,
}

impl Mirrors {
    /// `urls` must not be empty.
    pub fn new(urls: Vec<Url>) -> Self {
        Self {
            urls: Arc::new(Mutex::new(urls)),
        }
    }

    pub async fn get(&self, idx: usize) -> Option<Url> {
        self.urls.lock().await.get(idx).cloned()
    }

    /// Uniform random pick; spreads parallel parts over the mirrors.
    pub async fn pick(&self) -> Option<(usize, Url)> {
        let urls = self.urls.lock().await;
        if urls.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..urls.len());
        Some((idx, urls[idx].clone()))
    }

    pub async fn replace(&self, idx: usize, url: Url) {
        if let Some(slot) = self.urls.lock().await.get_mut(idx) {
            *slot = url;
        }
    }

    pub async fn snapshot(&self) -> Vec<Url> {
        self.urls.lock().await.clone()
    }
}

/// Downloads one byte range into its partial file, resuming and retrying.
#[derive(Clone)]
pub struct PartFetcher {
    pub(crate) client: Client,
    pub(crate) mirrors: Mirrors,
    pub(crate) governor: Arc<SpeedGovernor>,
    pub(crate) progress: Arc<dyn Progress>,
    pub(crate) retry_limit: u32,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: CancellationToken,
}

impl PartFetcher {
    pub async fn fetch(&self, range: ByteRange, part_path: PathBuf, task: TaskId) -> Result<PathBuf, DownloadError> {
        let part_name = part_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        for attempt in 0..=self.retry_limit {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let downloaded = self.resume_offset(range, &part_path).await?;
            if attempt == 0 {
                self.progress.advance(task, downloaded);
            }
            let start = range.start + downloaded as i64;
            if start > range.end {
                if !part_path.exists() {
                    fs::File::create(&part_path).await?;
                }
                debug!(part = %part_name, "part already complete");
                return Ok(part_path);
            }

            let err = match self.stream(ByteRange::new(start, range.end), &part_path, task).await {
                Ok(()) => return Ok(part_path),
                Err(err) => err,
            };
            if matches!(err, StreamError::Cancelled) {
                return Err(DownloadError::Cancelled);
            }

            let verdict = classify(&err, attempt);
            match (verdict.failure, verdict.backoff) {
                (Failure::Fatal, _) | (_, None) => {
                    return Err(DownloadError::RangeFetchFatal {
                        part: part_name,
                        source: Box::new(err),
                    });
                }
                (_, Some(backoff)) if attempt < self.retry_limit => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                _ => {}
            }
        }

        warn!(part = %part_name, attempts = self.retry_limit + 1, "STREAM retries exhausted");
        Err(DownloadError::RangeFetchExhausted {
            part: part_name,
            attempts: self.retry_limit + 1,
        })
    }

    /// Bytes of `range` already on disk.
    async fn resume_offset(&self, range: ByteRange, part_path: &Path) -> Result<u64, DownloadError> {
        let size = match fs::metadata(part_path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let len = range.len();
        if size > len {
            warn!(part = %part_path.display(), size, len, "partial file larger than its range, truncating");
            let file = OpenOptions::new().write(true).open(part_path).await?;
            file.set_len(len).await?;
            return Ok(len);
        }
        Ok(size)
    }

    async fn stream(&self, range: ByteRange, part_path: &Path, task: TaskId) -> Result<(), StreamError> {
        let _guard = self.governor.enter();
        let (idx, url) = self.mirrors.pick().await.ok_or(StreamError::Cancelled)?;

        let request = self
            .client
            .get(url.clone())
            .header(header::RANGE, range.header_value())
            .send();
        let response = self.bounded(request).await??.error_for_status()?;
        if response.url() != &url {
            debug!(from = %url, to = %response.url(), "mirror redirected");
            self.mirrors.replace(idx, response.url().clone()).await;
        }
        check_partial(response.status(), response.headers(), range)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(part_path)
            .await?;
        let chunk_size = self.governor.chunk_size();
        let mut remaining = range.len();
        let mut stream = response.bytes_stream();

        while remaining > 0 {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    file.flush().await?;
                    return Err(StreamError::Cancelled);
                }
                next = self.bounded(stream.next()) => next?,
            };
            let Some(item) = next else { break };
            let mut bytes = item?;
            if bytes.len() as u64 > remaining {
                debug!(extra = bytes.len() as u64 - remaining, "body runs past the range, dropping the rest");
                bytes.truncate(remaining as usize);
            }
            for piece in split_chunk(bytes, chunk_size) {
                file.write_all(&piece).await?;
                remaining -= piece.len() as u64;
                self.progress.advance(task, piece.len() as u64);
                self.governor
                    .throttle(piece.len(), self.progress.active_speed())
                    .await;
            }
        }

        file.flush().await?;
        if remaining > 0 {
            return Err(StreamError::Incomplete { missing: remaining });
        }
        Ok(())
    }

    async fn bounded<F: std::future::Future>(&self, fut: F) -> Result<F::Output, StreamError> {
        bounded(self.timeout, fut).await
    }
}

/// Run `fut` under an optional per-attempt deadline.
pub(crate) async fn bounded<F: std::future::Future>(limit: Option<Duration>, fut: F) -> Result<F::Output, StreamError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| StreamError::Timeout),
        None => Ok(fut.await),
    }
}

/// Bytes are only appended when the server answered `206` starting at `range.start`.
fn check_partial(status: StatusCode, headers: &HeaderMap, range: ByteRange) -> Result<(), StreamError> {
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(StreamError::BadResponse(format!(
            "expected 206 Partial Content, got {}",
            status
        )));
    }
    let start = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().strip_prefix("bytes "))
        .and_then(|v| v.split_once('-'))
        .and_then(|(start, _)| start.trim().parse::<i64>().ok());
    match start {
        Some(start) if start == range.start => Ok(()),
        Some(start) => Err(StreamError::BadResponse(format!(
            "Content-Range starts at {}, requested {}",
            start, range.start
        ))),
        None => Err(StreamError::BadResponse("no usable Content-Range".to_string())),
    }
}

fn split_chunk(bytes: Bytes, chunk_size: Option<usize>) -> Vec<Bytes> {
    match chunk_size {
        Some(size) if bytes.len() > size => (0..bytes.len())
            .step_by(size)
            .map(|at| bytes.slice(at..(at + size).min(bytes.len())))
            .collect(),
        _ => vec![bytes],
    }
}
