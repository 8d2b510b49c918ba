use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use indicatif::HumanBytes;
use partdl::remux::RemuxMode;
use partdl::utils::{get_filename_from_url, parse_part_name, sanitize_filename, PART_SUFFIX};
use partdl::{ClipSpec, Destination, Downloader, Outcome, Source};
use tokio::fs;
use tokio::sync::Semaphore;
use url::Url;

/// Mirrors of one source, written `url1|url2|...`.
pub fn parse_source(line: &str) -> Result<Vec<Url>> {
    let urls = line
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Url::parse(s).with_context(|| format!("Invalid URL {:?}", s)))
        .collect::<Result<Vec<_>>>()?;
    if urls.is_empty() {
        bail!("No URL in source {:?}", line);
    }
    Ok(urls)
}

pub async fn read_tasks_file(input: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to open input file: {:?}", input))?;
    Ok(parse_tasks(&content))
}

fn parse_tasks(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

async fn ensure_dir(output: &Path) -> Result<()> {
    if !output.exists() {
        fs::create_dir_all(output)
            .await
            .context("Failed to create output directory")?;
    }
    Ok(())
}

fn named_path(output: &Path, name: Option<String>, urls: &[Url]) -> PathBuf {
    let name = name.unwrap_or_else(|| urls.first().map(get_filename_from_url).unwrap_or_default());
    output.join(sanitize_filename(&name))
}

async fn report(outcome: &Outcome) {
    let Outcome::Skipped(path) = outcome else { return };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match fs::metadata(path).await {
        Ok(metadata) => {
            let date = metadata
                .modified()
                .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("{:>25} {:>17} Skipped {}", HumanBytes(metadata.len()).to_string(), date, name);
        }
        Err(_) => println!("Skipped {}", name),
    }
}

/// Download every source, `concurrency` files at a time.
///
/// A failed source does not stop the others; the run fails at the end if
/// any of them did.
pub async fn run_downloads(
    downloader: Arc<Downloader>,
    sources: Vec<String>,
    output: PathBuf,
    concurrency: Option<usize>,
) -> Result<()> {
    ensure_dir(&output).await?;
    if sources.is_empty() {
        bail!("Nothing to download");
    }

    let concurrency = concurrency.unwrap_or_else(num_cpus::get).max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut handles = vec![];

    for source in sources {
        let downloader = downloader.clone();
        let semaphore = semaphore.clone();
        let output = output.clone();

        let handle = tokio::spawn(async move {
            let result = async {
                let _permit = semaphore.acquire().await?;
                let urls = parse_source(&source)?;
                let outcome = downloader.get_file(urls, Destination::Dir(output), None).await?;
                report(&outcome).await;
                anyhow::Ok(())
            }
            .await;
            if let Err(e) = &result {
                eprintln!("Failed to download {}: {:#}", source, e);
            }
            result.is_ok()
        });
        handles.push(handle);
    }

    let total = handles.len();
    let mut failed = 0;
    for handle in handles {
        if !handle.await? {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{} of {} downloads failed", failed, total);
    }
    Ok(())
}

pub async fn run_single_download(
    downloader: &Downloader,
    source: &str,
    output: PathBuf,
    name: Option<String>,
) -> Result<()> {
    ensure_dir(&output).await?;
    let urls = parse_source(source)?;
    let dest = match name {
        Some(name) => Destination::File(output.join(sanitize_filename(&name))),
        None => Destination::Dir(output),
    };

    match downloader.get_file(urls, dest, None).await {
        Ok(outcome) => {
            report(&outcome).await;
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to download {}: {}", source, e);
            Err(e.into())
        }
    }
}

/// Download `clip.window` of each source; sources are fetched one after another.
pub async fn run_clip(
    downloader: &Downloader,
    sources: &[String],
    output: PathBuf,
    name: Option<String>,
    clip: ClipSpec,
) -> Result<()> {
    ensure_dir(&output).await?;
    if name.is_some() && sources.len() > 1 {
        bail!("--output names a single file but {} sources were given", sources.len());
    }

    for source in sources {
        let urls = parse_source(source)?;
        let path = named_path(&output, name.clone(), &urls);
        let outcome = downloader
            .get_media_clip(urls, path, &clip, None)
            .await
            .with_context(|| format!("Failed to download {} of {}", clip.window, source))?;
        report(&outcome).await;
    }
    Ok(())
}

/// Download all sources and remux them into one file.
pub async fn run_combined(
    downloader: &Downloader,
    sources: &[String],
    output: PathBuf,
    name: Option<String>,
    mode: RemuxMode,
    experimental: bool,
    clip: Option<ClipSpec>,
) -> Result<()> {
    ensure_dir(&output).await?;
    let sources = sources
        .iter()
        .map(|line| {
            Ok(Source {
                urls: parse_source(line)?,
                clip,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let Some(first) = sources.first() else {
        bail!("Nothing to combine");
    };
    let path = named_path(&output, name, &first.urls);

    let outcome = downloader
        .get_combined(sources, path, mode, experimental)
        .await
        .context("Failed to combine sources")?;
    report(&outcome).await;
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Resumable {
    parts: usize,
    bytes: u64,
}

/// Partial files grouped by final name, and finished files with their size.
async fn scan_downloads(output: &Path) -> Result<(BTreeMap<String, Resumable>, BTreeMap<String, u64>)> {
    let mut resumable: BTreeMap<String, Resumable> = BTreeMap::new();
    let mut completed: BTreeMap<String, u64> = BTreeMap::new();

    let mut entries = fs::read_dir(output).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        if let Some((name, _)) = parse_part_name(&filename) {
            let state = resumable.entry(name.to_string()).or_default();
            state.parts += 1;
            state.bytes += metadata.len();
        } else if filename != ".DS_Store" && !filename.ends_with(PART_SUFFIX) {
            completed.insert(filename, metadata.len());
        }
    }
    Ok((resumable, completed))
}

pub async fn list_downloads(output: PathBuf) -> Result<()> {
    if !output.exists() {
        println!("Output directory '{:?}' does not exist.", output);
        println!("Tip: If you used a custom output directory, please specify it with --download-dir");
        return Ok(());
    }

    let (resumable, completed) = scan_downloads(&output).await?;

    let on_disk: u64 = resumable.values().map(|r| r.bytes).sum::<u64>() + completed.values().sum::<u64>();
    println!(
        "Summary: Completed: {} | Resumable: {} | On disk: {}",
        completed.len(),
        resumable.len(),
        HumanBytes(on_disk)
    );
    println!();

    println!("{:<50} {:<15} {:<15} {:<15}", "Filename", "Status", "Parts", "Size");
    println!("{:-<50} {:-<15} {:-<15} {:-<15}", "", "", "", "");

    for (name, state) in &resumable {
        println!(
            "{:<50} {:<15} {:<15} {:<15}",
            name,
            "Resumable",
            state.parts,
            HumanBytes(state.bytes).to_string()
        );
    }
    for (name, size) in &completed {
        let status = if name.ends_with(".merged") { "Remux pending" } else { "Completed" };
        println!("{:<50} {:<15} {:<15} {:<15}", name, status, "-", HumanBytes(*size).to_string());
    }

    if resumable.is_empty() && completed.is_empty() {
        println!("No active or completed downloads found in '{:?}'.", output);
    }

    Ok(())
}
