mod cli;
mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use partdl::clip::TimeWindow;
use partdl::progress::{CliProgress, Progress, SilentProgress};
use partdl::range::ByteRange;
use partdl::{ClipSpec, Downloader, DownloaderConfig};
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::CombineMode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sources to download; mirrors of one source are separated by '|'
    #[arg(index = 1)]
    sources: Vec<String>,

    /// File with one source per line, used when no source is given ('#' starts a comment)
    #[arg(short = 't', long = "tasks-file", default_value = "download.txt")]
    tasks_file: PathBuf,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Output file name inside the download directory (single, clip and combine runs)
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Maximum number of files downloaded at once (defaults to number of logical CPUs)
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    rate_limit: Option<f64>,

    /// Number of byte ranges per file
    #[arg(short = 's', long)]
    split: Option<usize>,

    /// Ranges of one file streaming at once
    #[arg(short = 'p', long)]
    part_concurrency: Option<usize>,

    /// Retries per range after the first attempt
    #[arg(long)]
    retry: Option<u32>,

    /// Per-attempt network timeout in seconds, 0 disables it
    #[arg(long)]
    timeout: Option<u64>,

    /// Download only this time window of a fragmented stream, e.g. 1:30-2:45
    #[arg(long, requires_all = ["init_range", "index_range"])]
    clip: Option<TimeWindow>,

    /// Byte range of the initialization segment, e.g. 0-999
    #[arg(long)]
    init_range: Option<ByteRange>,

    /// Byte range of the segment index box
    #[arg(long)]
    index_range: Option<ByteRange>,

    /// Download every source and remux them into one file
    #[arg(long, value_enum)]
    combine: Option<CombineMode>,

    /// Allow experimental codecs when muxing
    #[arg(long)]
    experimental: bool,

    /// Path of the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// JSON file with downloader settings; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// List resumable and completed downloads
    #[arg(short = 'l', long)]
    list: bool,

    /// Hide progress bars
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    fn downloader_config(&self) -> Result<DownloaderConfig> {
        let mut config = match &self.config {
            Some(path) => DownloaderConfig::load(path)?,
            None => DownloaderConfig::default(),
        };
        if let Some(limit) = self.rate_limit {
            config.speed_limit = Some(limit);
        }
        if let Some(split) = self.split {
            config.split = split;
        }
        if let Some(part_concurrency) = self.part_concurrency {
            config.part_concurrency = part_concurrency;
        }
        if let Some(retry) = self.retry {
            config.stream_retry = retry;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = Some(timeout);
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.ffmpeg = ffmpeg.clone();
        }
        Ok(config)
    }

    fn clip_spec(&self) -> Option<ClipSpec> {
        Some(ClipSpec {
            window: self.clip?,
            init: self.init_range?,
            index: self.index_range?,
        })
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let mut args = Args::parse();
    init_tracing(args.verbose);

    // Output dir might not exist yet, so we resolve it relative to current dir
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        if args.list {
            return commands::list_downloads(args.download_dir.clone()).await;
        }

        let progress: Arc<dyn Progress> = if args.quiet {
            Arc::new(SilentProgress::new())
        } else {
            Arc::new(CliProgress::new())
        };
        let downloader = Arc::new(Downloader::new(args.downloader_config()?, progress));

        let token = downloader.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping downloads; partial files are kept");
                token.cancel();
            }
        });

        let sources = if args.sources.is_empty() {
            commands::read_tasks_file(&args.tasks_file).await?
        } else {
            args.sources.clone()
        };

        let clip = args.clip_spec();
        if let Some(mode) = args.combine {
            commands::run_combined(
                &downloader,
                &sources,
                args.download_dir,
                args.output,
                mode.into(),
                args.experimental,
                clip,
            )
            .await
        } else if let Some(clip) = clip {
            commands::run_clip(&downloader, &sources, args.download_dir, args.output, clip).await
        } else if sources.len() == 1 {
            commands::run_single_download(&downloader, &sources[0], args.download_dir, args.output).await
        } else {
            commands::run_downloads(downloader, sources, args.download_dir, args.concurrency).await
        }
    })
}
