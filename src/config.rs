use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Aggregate ceiling in bytes per second.
    pub speed_limit: Option<f64>,
    /// Retries per part after the first attempt.
    pub stream_retry: u32,
    /// Number of byte ranges a whole file is split into.
    pub split: usize,
    /// Parts streaming at once within one download.
    pub part_concurrency: usize,
    /// Per network attempt, applied to connect and to every read.
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
    pub ffmpeg: PathBuf,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            speed_limit: None,
            stream_retry: 5,
            split: 10,
            part_concurrency: 10,
            timeout_secs: Some(30),
            user_agent: format!("partdl/{}", env!("CARGO_PKG_VERSION")),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl DownloaderConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }
}
