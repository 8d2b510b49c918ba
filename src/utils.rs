use std::path::{Path, PathBuf};

use url::Url;

use crate::range::ByteRange;

pub const PART_SUFFIX: &str = "part";

pub fn get_filename_from_url(url: &Url) -> String {
    if let Some(segments) = url.path_segments() {
        if let Some(filename) = segments.last() {
            if !filename.is_empty() {
                return filename.to_string();
            }
        }
    }

    // Fallback if no filename found in path
    format!("download_{}", uuid::Uuid::new_v4())
}

/// Extension of the URL's last path segment, query excluded.
pub fn get_extension_from_url(url: &Url) -> Option<String> {
    let name = url.path_segments()?.last()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_string())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// `filename` parameter of a `Content-Disposition` header.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}

/// Partial file holding the prefix of `range` for the download at `path`.
pub fn part_path(path: &Path, range: ByteRange) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!("{}.{}.{}", name, range, PART_SUFFIX))
}

/// Split a partial file name back into the final file name and its range.
pub fn parse_part_name(filename: &str) -> Option<(&str, ByteRange)> {
    let stem = filename.strip_suffix(PART_SUFFIX)?.strip_suffix('.')?;
    let (name, range) = stem.rsplit_once('.')?;
    let range = range.parse().ok()?;
    if name.is_empty() {
        return None;
    }
    Some((name, range))
}

/// Sibling of `path` with `suffix` appended to its file name.
pub fn with_name_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!("{}{}", name, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        let url = Url::parse("https://cdn.example.com/a/b/video.m4s?token=abc").unwrap();
        assert_eq!(get_filename_from_url(&url), "video.m4s");
        let url = Url::parse("https://cdn.example.com/").unwrap();
        assert!(get_filename_from_url(&url).starts_with("download_"));
    }

    #[test]
    fn test_extension_from_url() {
        let url = Url::parse("https://i0.example.com/cover.jpg?size=large").unwrap();
        assert_eq!(get_extension_from_url(&url).as_deref(), Some("jpg"));
        let url = Url::parse("https://example.com/api/cover").unwrap();
        assert_eq!(get_extension_from_url(&url), None);
        let url = Url::parse("https://example.com/.hidden").unwrap();
        assert_eq!(get_extension_from_url(&url), None);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_filename("my video?.mp4"), "my_video_.mp4");
    }

    #[test]
    fn test_disposition() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="movie.mp4""#).as_deref(),
            Some("movie.mp4")
        );
        assert_eq!(
            filename_from_disposition("inline; FILENAME=clip.flv").as_deref(),
            Some("clip.flv")
        );
        assert_eq!(filename_from_disposition("attachment"), None);
        assert_eq!(filename_from_disposition(r#"attachment; filename="""#), None);
    }

    #[test]
    fn test_part_names_round_trip() {
        let path = Path::new("/tmp/out/movie.mp4");
        let part = part_path(path, ByteRange::new(100, 199));
        assert_eq!(part, PathBuf::from("/tmp/out/movie.mp4.100-199.part"));

        let name = part.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_part_name(name), Some(("movie.mp4", ByteRange::new(100, 199))));
        assert_eq!(parse_part_name("movie.mp4"), None);
        assert_eq!(parse_part_name("movie.mp4.x-y.part"), None);
    }
}
