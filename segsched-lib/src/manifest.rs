//! HLS media playlist reader
//!
//! Only what the benchmark needs: the ordered segment list with nominal
//! durations, URIs resolved against the manifest's directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ManifestError;

/// One media segment
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// URI as written in the playlist
    pub uri: String,
    /// URI resolved against the manifest directory
    pub path: PathBuf,
    /// Nominal playback duration from `#EXTINF`
    pub duration: Duration,
}

/// Parsed media playlist
#[derive(Debug, Clone, Default)]
pub struct MediaPlaylist {
    pub target_duration: Option<u64>,
    pub segments: Vec<Segment>,
}

impl MediaPlaylist {
    /// Total nominal duration of all segments
    pub fn total_duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Read and parse a playlist file
pub fn load_playlist<P: AsRef<Path>>(path: P) -> Result<MediaPlaylist, ManifestError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    parse_playlist(&content, base, &path.display().to_string())
}

/// Parse playlist text. `source` is only used in error messages.
pub fn parse_playlist(
    content: &str,
    base_dir: &Path,
    source: &str,
) -> Result<MediaPlaylist, ManifestError> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(n, l)| (n + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    match lines.next() {
        Some((_, "#EXTM3U")) => {}
        _ => return Err(ManifestError::MissingHeader),
    }

    let mut playlist = MediaPlaylist::default();
    let mut pending: Option<Duration> = None;

    for (line_no, line) in lines {
        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let value = rest.split(',').next().unwrap_or("").trim();
            let secs: f64 = value.parse().map_err(|_| ManifestError::InvalidDuration {
                line: line_no,
                value: value.to_string(),
            })?;
            let duration = Duration::try_from_secs_f64(secs).map_err(|_| ManifestError::InvalidDuration {
                line: line_no,
                value: value.to_string(),
            })?;
            pending = Some(duration);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            playlist.target_duration = rest.trim().parse().ok();
        } else if line.starts_with("#EXT-X-STREAM-INF") || line.starts_with("#EXT-X-I-FRAME-STREAM-INF") {
            return Err(ManifestError::NotMediaPlaylist(source.to_string()));
        } else if line.starts_with('#') {
            // Other tags and comments carry nothing the scheduler needs
            continue;
        } else {
            let duration = pending.take().ok_or(ManifestError::UriWithoutInfo(line_no))?;
            playlist.segments.push(Segment {
                uri: line.to_string(),
                path: base_dir.join(line),
                duration,
            });
        }
    }

    tracing::debug!(
        source,
        segments = playlist.segments.len(),
        "parsed media playlist"
    );

    Ok(playlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:2
#EXT-X-MEDIA-SEQUENCE:0

#EXTINF:2.000,
seg0.ts
#EXTINF:1.5,title
seg1.ts
#EXT-X-ENDLIST
";

    #[test]
    fn test_parse_media_playlist() {
        let pl = parse_playlist(MEDIA, Path::new("/media"), "test").unwrap();
        assert_eq!(pl.target_duration, Some(2));
        assert_eq!(pl.segments.len(), 2);
        assert_eq!(pl.segments[0].path, PathBuf::from("/media/seg0.ts"));
        assert_eq!(pl.segments[1].duration, Duration::from_millis(1500));
        assert_eq!(pl.total_duration(), Duration::from_millis(3500));
    }

    #[test]
    fn test_reject_master_playlist() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nlow.m3u8\n";
        assert!(matches!(
            parse_playlist(master, Path::new(""), "master.m3u8"),
            Err(ManifestError::NotMediaPlaylist(s)) if s == "master.m3u8"
        ));
    }

    #[test]
    fn test_reject_missing_header() {
        assert!(matches!(
            parse_playlist("#EXTINF:2,\nseg.ts\n", Path::new(""), "x"),
            Err(ManifestError::MissingHeader)
        ));
    }

    #[test]
    fn test_reject_bad_duration() {
        let bad = "#EXTM3U\n#EXTINF:-2,\nseg.ts\n";
        assert!(matches!(
            parse_playlist(bad, Path::new(""), "x"),
            Err(ManifestError::InvalidDuration { line: 2, .. })
        ));
        let bad = "#EXTM3U\n#EXTINF:abc,\nseg.ts\n";
        assert!(parse_playlist(bad, Path::new(""), "x").is_err());
    }

    #[test]
    fn test_reject_out_of_range_duration() {
        let bad = "#EXTM3U\n#EXTINF:1e300,\na.ts\n";
        assert!(matches!(
            parse_playlist(bad, Path::new(""), "x"),
            Err(ManifestError::InvalidDuration { line: 2, value }) if value == "1e300"
        ));
    }

    #[test]
    fn test_reject_uri_without_info() {
        let bad = "#EXTM3U\nseg.ts\n";
        assert!(matches!(
            parse_playlist(bad, Path::new(""), "x"),
            Err(ManifestError::UriWithoutInfo(2))
        ));
    }

    #[test]
    fn test_load_playlist_resolves_relative_uris() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MEDIA.as_bytes()).unwrap();
        let pl = load_playlist(file.path()).unwrap();
        let dir = file.path().parent().unwrap();
        assert_eq!(pl.segments[0].path, dir.join("seg0.ts"));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load_playlist("/nonexistent/dir/in.m3u8"),
            Err(ManifestError::Open { .. })
        ));
    }
}
