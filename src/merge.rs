use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::DownloadError;
use crate::utils::with_name_suffix;

/// Concatenate `parts` in order into `dest`, then delete them.
///
/// Output goes to a temporary sibling that is renamed over `dest` only once
/// every part has been copied, so a failure never leaves a partial `dest`.
pub async fn merge_files(parts: &[PathBuf], dest: &Path) -> Result<(), DownloadError> {
    let tmp = with_name_suffix(dest, &format!(".{}.merge", uuid::Uuid::new_v4()));
    let failed = |source: io::Error| DownloadError::MergeFailed {
        path: dest.display().to_string(),
        source,
    };

    if let Err(e) = concat_into(parts, &tmp).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(failed(e));
    }
    fs::rename(&tmp, dest).await.map_err(failed)?;
    debug!(dest = %dest.display(), parts = parts.len(), "merged parts");

    for part in parts {
        fs::remove_file(part).await.map_err(failed)?;
    }
    Ok(())
}

async fn concat_into(parts: &[PathBuf], tmp: &Path) -> io::Result<()> {
    let mut out = File::create(tmp).await?;
    for part in parts {
        let mut input = File::open(part).await?;
        tokio::io::copy(&mut input, &mut out).await?;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_merge_in_order_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mut parts = vec![];
        for (i, chunk) in [&b"hello "[..], b"", b"partial ", b"world"].iter().enumerate() {
            let p = dir.path().join(format!("p{}", i));
            std::fs::write(&p, chunk).unwrap();
            parts.push(p);
        }
        let dest = dir.path().join("out.txt");

        merge_files(&parts, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"hello partial world");
        assert!(parts.iter().all(|p| !p.exists()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_part_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("p0");
        std::fs::write(&first, b"abc").unwrap();
        let parts = vec![first.clone(), dir.path().join("p1")];
        let dest = dir.path().join("out.bin");

        let err = merge_files(&parts, &dest).await.unwrap_err();

        assert!(matches!(err, DownloadError::MergeFailed { .. }));
        assert!(!dest.exists());
        assert!(first.exists());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("p0")]);
    }
}
