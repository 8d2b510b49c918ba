//! Segmented, resumable, rate-limited HTTP downloads.
//!
//! A resource is split into byte ranges fetched in parallel into partial
//! files, then merged. Fragmented media can be downloaded by time window
//! through its segment index, and several inputs can be remuxed into one
//! container with an external tool.

pub mod classify;
pub mod clip;
pub mod config;
pub mod convert;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod merge;
pub mod progress;
pub mod range;
pub mod remux;
pub mod sidx;
pub mod speed;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::DownloaderConfig;
pub use downloader::{ClipSpec, Destination, Downloader, Outcome, Source};
pub use error::DownloadError;
