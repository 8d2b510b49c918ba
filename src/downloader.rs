use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{self, HeaderMap};
use reqwest::Client;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::classify::{classify, Failure, StreamError};
use crate::clip::{plan_clip, TimeWindow};
use crate::config::DownloaderConfig;
use crate::convert::Conversion;
use crate::error::{DownloadError, Result};
use crate::fetcher::{bounded, Mirrors, PartFetcher};
use crate::merge::merge_files;
use crate::progress::{Progress, TaskId, TaskUpdate};
use crate::range::{plan_ranges, ByteRange};
use crate::remux::{RemuxMode, Remuxer};
use crate::sidx::SegmentIndex;
use crate::speed::SpeedGovernor;
use crate::utils::{
    filename_from_disposition, get_extension_from_url, get_filename_from_url, part_path, sanitize_filename,
    with_name_suffix,
};

/// Where a whole-file download lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Exact output path.
    File(PathBuf),
    /// Directory; the name comes from the server or the URL.
    Dir(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Downloaded(PathBuf),
    /// Destination already existed, nothing was fetched.
    Skipped(PathBuf),
}

impl Outcome {
    pub fn path(&self) -> &Path {
        match self {
            Outcome::Downloaded(path) | Outcome::Skipped(path) => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub total: i64,
    /// Suggested by `Content-Disposition`.
    pub filename: Option<String>,
}

/// Time-sliced download of a fragmented media stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSpec {
    pub window: TimeWindow,
    /// Initialization segment.
    pub init: ByteRange,
    /// Location of the `sidx` box.
    pub index: ByteRange,
}

/// One input of a combined download.
#[derive(Debug, Clone)]
pub struct Source {
    pub urls: Vec<Url>,
    pub clip: Option<ClipSpec>,
}

struct Fetched {
    headers: HeaderMap,
    body: Bytes,
}

/// Composes planning, part fetches, merging and remuxing per download.
///
/// The speed governor and the progress sink are shared by every download
/// issued through one instance; part concurrency is bounded per download.
pub struct Downloader {
    client: Client,
    config: DownloaderConfig,
    governor: Arc<SpeedGovernor>,
    progress: Arc<dyn Progress>,
    remuxer: Remuxer,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(config: DownloaderConfig, progress: Arc<dyn Progress>) -> Self {
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|_| Client::new());

        Self {
            client,
            governor: Arc::new(SpeedGovernor::new(config.speed_limit)),
            remuxer: Remuxer::new(config.ffmpeg.clone()),
            progress,
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Cancelling it stops every download of this instance at the next chunk.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Learn the total length with a two-byte range request.
    pub async fn probe(&self, mirrors: &Mirrors) -> Result<Probe> {
        let fetched = self.fetch_bytes(mirrors, Some(ByteRange::new(0, 1))).await?;
        let url = mirrors.get(0).await.map(|u| u.to_string()).unwrap_or_default();

        let content_range = fetched
            .headers
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DownloadError::ProbeFailed {
                url: url.clone(),
                reason: "no Content-Range in response, server does not support partial content".to_string(),
            })?;
        let total = content_range
            .rsplit_once('/')
            .and_then(|(_, total)| total.trim().parse::<i64>().ok())
            .filter(|total| *total > 0)
            .ok_or_else(|| DownloadError::ProbeFailed {
                url,
                reason: format!("unusable Content-Range {:?}", content_range),
            })?;
        let filename = fetched
            .headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);

        debug!(total, ?filename, "probe succeeded");
        Ok(Probe { total, filename })
    }

    /// Download a whole resource as `split` ranges fetched in parallel.
    ///
    /// With a `parent` task the byte total is added to it and the task is left
    /// to the caller; otherwise a task is created and hidden on completion.
    pub async fn get_file(&self, urls: Vec<Url>, dest: Destination, parent: Option<TaskId>) -> Result<Outcome> {
        if urls.is_empty() {
            return Err(no_mirrors());
        }
        if let Destination::File(path) = &dest {
            if path.exists() {
                return Ok(self.skipped(path.clone(), parent));
            }
        }

        let mirrors = Mirrors::new(urls);
        let probe = self.probe(&mirrors).await?;
        let path = match dest {
            Destination::File(path) => path,
            Destination::Dir(dir) => {
                let name = match probe.filename {
                    Some(name) => name,
                    None => match mirrors.get(0).await {
                        Some(url) => get_filename_from_url(&url),
                        None => return Err(no_mirrors()),
                    },
                };
                let path = dir.join(sanitize_filename(&name));
                if path.exists() {
                    return Ok(self.skipped(path, parent));
                }
                path
            }
        };

        let task = self.attach(parent, &display_name(&path), probe.total as u64);
        let ranges = plan_ranges(probe.total, self.config.split);
        let parts = self.fetch_parts(&mirrors, &path, &ranges, task).await?;
        merge_files(&parts, &path).await?;
        self.finish(task, parent, &path);
        Ok(Outcome::Downloaded(path))
    }

    /// Download only the segments of a fragmented stream covering `clip.window`
    /// and trim the result to the exact window.
    ///
    /// The index is validated against the window before any media byte is
    /// requested. A merged file left by a failed remux is reused when it
    /// covers the same segments.
    pub async fn get_media_clip(
        &self,
        urls: Vec<Url>,
        path: PathBuf,
        clip: &ClipSpec,
        parent: Option<TaskId>,
    ) -> Result<Outcome> {
        if urls.is_empty() {
            return Err(no_mirrors());
        }
        if path.exists() {
            return Ok(self.skipped(path, parent));
        }

        let mirrors = Mirrors::new(urls);
        let index_bytes = self.fetch_bytes(&mirrors, Some(clip.index)).await?.body;
        let index = SegmentIndex::parse(&index_bytes)?;
        let first_byte = clip.index.end + 1 + index.first_offset as i64;
        let plan = plan_clip(&index.segment_refs(), clip.window, first_byte, clip.init)?;
        debug!(
            window = %clip.window,
            segments = plan.segments.len(),
            bytes = plan.total,
            trim = plan.trim,
            "clip planned"
        );

        let task = self.attach(parent, &format!("{} {}", display_name(&path), clip.window), plan.total);
        let merged = match plan.media_span() {
            Some(span) => with_name_suffix(&path, &format!(".{}.merged", span)),
            None => with_name_suffix(&path, ".merged"),
        };
        if merged.exists() {
            debug!(merged = %merged.display(), "reusing merged clip");
            self.progress.advance(task, plan.total);
        } else {
            let parts = self.fetch_parts(&mirrors, &path, &plan.ranges(), task).await?;
            merge_files(&parts, &merged).await?;
        }

        self.remuxer.trim(plan.trim, plan.duration, &merged, &path).await?;
        fs::remove_file(&merged).await?;
        self.finish(task, parent, &path);
        Ok(Outcome::Downloaded(path))
    }

    /// Download every source concurrently, then remux them into `path`.
    pub async fn get_combined(
        &self,
        sources: Vec<Source>,
        path: PathBuf,
        mode: RemuxMode,
        experimental: bool,
    ) -> Result<Outcome> {
        if path.exists() {
            return Ok(self.skipped(path, None));
        }

        let task = self.progress.add_task(&display_name(&path), None);
        let inputs: Vec<PathBuf> = (0..sources.len())
            .map(|i| with_name_suffix(&path, &format!("-{}", i)))
            .collect();
        let jobs = sources
            .into_iter()
            .zip(inputs.iter().cloned())
            .map(|(source, input)| async move {
                match source.clip {
                    Some(clip) => self.get_media_clip(source.urls, input, &clip, Some(task)).await,
                    None => self.get_file(source.urls, Destination::File(input), Some(task)).await,
                }
            });
        futures::future::try_join_all(jobs).await?;

        match mode {
            RemuxMode::Mux => self.remuxer.mux(&inputs, &path, experimental).await?,
            RemuxMode::Concat => self.remuxer.concat(&inputs, &path).await?,
        }
        for input in &inputs {
            fs::remove_file(input).await?;
        }
        self.finish(task, None, &path);
        Ok(Outcome::Downloaded(path))
    }

    /// Fetch a small resource in one request, optionally converting it.
    ///
    /// The extension is taken from the conversion kind when there is one,
    /// else from the URL.
    pub async fn get_static(&self, url: Url, path: PathBuf, conversion: Option<Conversion>) -> Result<Outcome> {
        let extension = match &conversion {
            Some(conversion) => Some(conversion.kind.extension().to_string()),
            None => get_extension_from_url(&url),
        };
        let path = match extension {
            Some(ext) => path.with_extension(ext),
            None => path,
        };
        if path.exists() {
            return Ok(self.skipped(path, None));
        }

        let body = self.fetch_bytes(&Mirrors::new(vec![url]), None).await?.body;
        let content = match conversion {
            Some(conversion) => (conversion.func)(body).map_err(|source| DownloadError::Convert {
                kind: conversion.kind.extension(),
                source,
            })?,
            None => body.to_vec(),
        };
        fs::write(&path, content).await?;
        info!(path = %path.display(), "download completed");
        Ok(Outcome::Downloaded(path))
    }

    /// Fetch `ranges` of one resource into partial files next to `path`.
    ///
    /// Returns the part paths in range order. The first failing part cancels
    /// its siblings; whatever they already wrote stays on disk for a later
    /// resume.
    pub(crate) async fn fetch_parts(
        &self,
        mirrors: &Mirrors,
        path: &Path,
        ranges: &[ByteRange],
        task: TaskId,
    ) -> Result<Vec<PathBuf>> {
        let cancel = self.cancel.child_token();
        let fetcher = PartFetcher {
            client: self.client.clone(),
            mirrors: mirrors.clone(),
            governor: self.governor.clone(),
            progress: self.progress.clone(),
            retry_limit: self.config.stream_retry,
            timeout: self.config.timeout(),
            cancel: cancel.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.config.part_concurrency.max(1)));
        let ranges: Vec<ByteRange> = ranges.iter().copied().filter(|r| !r.is_empty()).collect();

        let mut set = JoinSet::new();
        for (idx, range) in ranges.iter().copied().enumerate() {
            let fetcher = fetcher.clone();
            let semaphore = semaphore.clone();
            let part = part_path(path, range);
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| DownloadError::Cancelled)?;
                fetcher.fetch(range, part, task).await.map(|part| (idx, part))
            });
        }

        let mut parts: Vec<Option<PathBuf>> = vec![None; ranges.len()];
        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            match joined.map_err(DownloadError::from).and_then(|r| r) {
                Ok((idx, part)) => parts[idx] = Some(part),
                Err(e) if failure.is_none() => {
                    warn!(path = %path.display(), error = %e, "part failed, cancelling siblings");
                    cancel.cancel();
                    failure = Some(e);
                }
                Err(e) => debug!(error = %e, "sibling part stopped"),
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(parts.into_iter().flatten().collect())
    }

    /// Single request with the classifier retry loop, always via mirror 0.
    async fn fetch_bytes(&self, mirrors: &Mirrors, range: Option<ByteRange>) -> Result<Fetched> {
        let retry_limit = self.config.stream_retry;
        for attempt in 0..=retry_limit {
            if self.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let url = mirrors.get(0).await.ok_or_else(no_mirrors)?;

            let err = match self.request(&url, range).await {
                Ok((final_url, fetched)) => {
                    if final_url != url {
                        debug!(from = %url, to = %final_url, "mirror redirected");
                        mirrors.replace(0, final_url).await;
                    }
                    return Ok(fetched);
                }
                Err(err) => err,
            };

            let verdict = classify(&err, attempt);
            match (verdict.failure, verdict.backoff) {
                (Failure::Fatal, _) | (_, None) => {
                    return Err(DownloadError::RangeFetchFatal {
                        part: url.to_string(),
                        source: Box::new(err),
                    });
                }
                (_, Some(backoff)) if attempt < retry_limit => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                _ => {}
            }
        }

        let part = mirrors.get(0).await.map(|u| u.to_string()).unwrap_or_default();
        warn!(url = %part, attempts = retry_limit + 1, "request retries exhausted");
        Err(DownloadError::RangeFetchExhausted {
            part,
            attempts: retry_limit + 1,
        })
    }

    async fn request(&self, url: &Url, range: Option<ByteRange>) -> std::result::Result<(Url, Fetched), StreamError> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(header::RANGE, range.header_value());
        }
        let response = bounded(self.config.timeout(), request.send())
            .await??
            .error_for_status()?;
        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let body = bounded(self.config.timeout(), response.bytes()).await??;
        Ok((final_url, Fetched { headers, body }))
    }

    fn attach(&self, parent: Option<TaskId>, description: &str, total: u64) -> TaskId {
        match parent {
            Some(task) => {
                self.progress.grow_total(task, total);
                task
            }
            None => self.progress.add_task(description, Some(total)),
        }
    }

    fn finish(&self, task: TaskId, parent: Option<TaskId>, path: &Path) {
        if parent.is_none() {
            self.progress.update(task, TaskUpdate::hide());
            info!(path = %path.display(), "download completed");
        }
    }

    fn skipped(&self, path: PathBuf, parent: Option<TaskId>) -> Outcome {
        if parent.is_none() {
            info!(path = %path.display(), "already exists, skipped");
        }
        Outcome::Skipped(path)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn no_mirrors() -> DownloadError {
    DownloadError::ProbeFailed {
        url: String::new(),
        reason: "no mirror URLs given".to_string(),
    }
}
