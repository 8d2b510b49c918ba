use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::DownloadError;

/// How several downloaded inputs become one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemuxMode {
    /// Separate streams (video + audio) muxed side by side.
    Mux,
    /// Ordered pieces of one stream joined end to end.
    Concat,
}

/// Runs the external remux tool with copy codecs.
#[derive(Debug, Clone)]
pub struct Remuxer {
    program: PathBuf,
}

impl Remuxer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Cut `[trim, trim + duration)` out of `input`.
    pub async fn trim(&self, trim: f64, duration: f64, input: &Path, output: &Path) -> Result<(), DownloadError> {
        self.run(trim_args(trim, duration, input, output)).await
    }

    pub async fn mux(&self, inputs: &[PathBuf], output: &Path, experimental: bool) -> Result<(), DownloadError> {
        self.run(mux_args(inputs, output, experimental)).await
    }

    /// Join `inputs` through a generated list file, removed afterwards.
    pub async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), DownloadError> {
        let list = output.with_extension("txt");
        tokio::fs::write(&list, concat_list(inputs)).await?;
        let result = self.run(concat_args(&list, output)).await;
        let _ = tokio::fs::remove_file(&list).await;
        result
    }

    async fn run(&self, args: Vec<OsString>) -> Result<(), DownloadError> {
        debug!(program = %self.program.display(), ?args, "running remux");
        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(DownloadError::RemuxFailed {
                program: self.program.display().to_string(),
                status,
            });
        }
        Ok(())
    }
}

fn os(parts: &[&str]) -> Vec<OsString> {
    parts.iter().map(OsString::from).collect()
}

pub fn trim_args(trim: f64, duration: f64, input: &Path, output: &Path) -> Vec<OsString> {
    let (trim, duration) = (trim.to_string(), duration.to_string());
    let mut args = os(&["-ss", trim.as_str(), "-t", duration.as_str(), "-i"]);
    args.push(input.into());
    args.extend(os(&["-codec", "copy", "-loglevel", "quiet", "-f", "mp4"]));
    args.push(output.into());
    args
}

pub fn mux_args(inputs: &[PathBuf], output: &Path, experimental: bool) -> Vec<OsString> {
    let mut args = vec![];
    for input in inputs {
        args.push(OsString::from("-i"));
        args.push(input.into());
    }
    args.extend(os(&["-codec", "copy", "-loglevel", "quiet"]));
    if experimental {
        // flac in mp4 is still experimental
        args.extend(os(&["-strict", "-2"]));
    }
    args.push(output.into());
    args
}

pub fn concat_args(list: &Path, output: &Path) -> Vec<OsString> {
    let mut args = os(&["-f", "concat", "-safe", "0", "-i"]);
    args.push(list.into());
    args.extend(os(&["-codec", "copy", "-loglevel", "quiet"]));
    args.push(output.into());
    args
}

/// Entries are file names, resolved relative to the list file.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .filter_map(|p| p.file_name())
        .map(|name| format!("file '{}'\n", name.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_trim_template() {
        let args = trim_args(1.5, 4.0, Path::new("/d/tmp"), Path::new("/d/clip.mp4"));
        assert_eq!(
            strings(args),
            vec!["-ss", "1.5", "-t", "4", "-i", "/d/tmp", "-codec", "copy", "-loglevel", "quiet", "-f", "mp4", "/d/clip.mp4"]
        );
    }

    #[test]
    fn test_mux_template() {
        let inputs = vec![PathBuf::from("v"), PathBuf::from("a")];
        assert_eq!(
            strings(mux_args(&inputs, Path::new("out.mp4"), false)),
            vec!["-i", "v", "-i", "a", "-codec", "copy", "-loglevel", "quiet", "out.mp4"]
        );
        assert!(strings(mux_args(&inputs, Path::new("out.mp4"), true)).contains(&"-strict".to_string()));
    }

    #[test]
    fn test_concat_template_and_list() {
        assert_eq!(
            strings(concat_args(Path::new("out.txt"), Path::new("out.mp4"))),
            vec!["-f", "concat", "-safe", "0", "-i", "out.txt", "-codec", "copy", "-loglevel", "quiet", "out.mp4"]
        );
        let list = concat_list(&[PathBuf::from("/d/show-0.flv"), PathBuf::from("/d/it's-1.flv")]);
        assert_eq!(list, "file 'show-0.flv'\nfile 'it'\\''s-1.flv'\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let err = Remuxer::new("false")
            .trim(0.0, 1.0, &dir.path().join("in"), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::RemuxFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concat_removes_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("joined.mp4");
        Remuxer::new("true")
            .concat(&[dir.path().join("a"), dir.path().join("b")], &output)
            .await
            .unwrap();
        assert!(!dir.path().join("joined.txt").exists());
    }
}
