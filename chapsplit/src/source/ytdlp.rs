//! yt-dlp backed [`AssetSource`].

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{OutputStream, run_captured, run_streaming, tokio_command};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{AssetSource, FetchProgress, UrlKind, validate_url, watch_url};
use crate::config::AppConfig;
use crate::domain::{ChapterSpan, PlaylistEntry, PlaylistInfo, RemoteMetadata, VideoInfo};
use crate::{Error, Result};

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%(?:.*?\bat\s+(\S+))?").unwrap()
});

const METADATA_TIMEOUT: Duration = Duration::from_secs(120);
const UNKNOWN_TITLE: &str = "Unknown";
/// Leftovers yt-dlp writes next to an in-flight download.
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    chapters: Option<Vec<RawChapter>>,
    entries: Option<Vec<Option<RawEntry>>>,
}

#[derive(Debug, Deserialize)]
struct RawChapter {
    title: Option<String>,
    start_time: f64,
    end_time: f64,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
}

/// Parse `--dump-single-json` output into [`RemoteMetadata`].
pub fn parse_metadata(url: &str, json: &str) -> Result<RemoteMetadata> {
    let raw: RawInfo = serde_json::from_str(json)
        .map_err(|e| Error::fetch(url, format!("unreadable metadata: {e}")))?;

    let id = raw.id.unwrap_or_default();
    let title = raw
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

    if raw.kind.as_deref() == Some("playlist") {
        let entries = raw
            .entries
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let id = entry.id.filter(|id| !id.is_empty())?;
                Some((id, entry.title, entry.duration, entry.url))
            })
            .enumerate()
            .map(|(index, (id, entry_title, duration, entry_url))| PlaylistEntry {
                index,
                title: entry_title
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
                duration: duration.filter(|d| d.is_finite() && *d > 0.0),
                url: entry_url
                    .filter(|u| u.starts_with("http"))
                    .unwrap_or_else(|| watch_url(&id)),
                id,
            })
            .collect();

        return Ok(RemoteMetadata::Playlist(PlaylistInfo { id, title, entries }));
    }

    let mut chapters = Vec::new();
    for (i, raw_chapter) in raw.chapters.unwrap_or_default().into_iter().enumerate() {
        let chapter_title = raw_chapter
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Chapter {}", i + 1));
        match ChapterSpan::new(chapters.len(), chapter_title, raw_chapter.start_time, raw_chapter.end_time) {
            Ok(span) => chapters.push(span),
            Err(e) => warn!(index = i, error = %e, "Skipping malformed chapter"),
        }
    }

    let webpage_url = raw.webpage_url.unwrap_or_else(|| {
        if id.is_empty() {
            url.to_string()
        } else {
            watch_url(&id)
        }
    });

    Ok(RemoteMetadata::Video(VideoInfo {
        id,
        title,
        duration: raw.duration.filter(|d| d.is_finite() && *d > 0.0).unwrap_or(0.0),
        chapters,
        webpage_url,
    }))
}

/// Parse a `[download]  42.0% of ~3.5MiB at 1.2MiB/s ETA 00:02` line.
pub fn parse_progress_line(line: &str) -> Option<FetchProgress> {
    let caps = PROGRESS_LINE.captures(line.trim())?;
    let percent: f64 = caps.get(1)?.as_str().parse().ok()?;
    let speed = caps
        .get(2)
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.starts_with("Unknown"));
    Some(FetchProgress {
        percent: percent.clamp(0.0, 100.0),
        speed,
    })
}

fn is_partial(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// The one finished file in `dir`, when the tool did not print its path.
async fn find_downloaded(dir: &Path) -> Result<Option<PathBuf>> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && !is_partial(&path) {
            found.push(path);
        }
    }
    if found.len() == 1 {
        Ok(found.pop())
    } else {
        Ok(None)
    }
}

/// Drives the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    ytdlp_path: String,
    fetch_timeout: Duration,
}

impl YtDlpSource {
    pub fn new(ytdlp_path: impl Into<String>, fetch_timeout: Duration) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            fetch_timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.ytdlp_path.clone(), config.fetch_timeout())
    }

    pub fn ytdlp_path(&self) -> &str {
        &self.ytdlp_path
    }

    /// Returns the tool's version string, or an error when it cannot be run.
    pub async fn check_available(&self) -> Result<String> {
        let mut cmd = tokio_command(&self.ytdlp_path);
        cmd.arg("--version");
        let output = run_captured(&mut cmd, Duration::from_secs(30)).await?;
        if !output.success() {
            return Err(Error::external_tool(&self.ytdlp_path, output.stderr_tail(3)));
        }
        Ok(output.stdout.trim().to_string())
    }

    fn failure(url: &str, stderr_tail: String, fallback: &str) -> Error {
        if stderr_tail.is_empty() {
            Error::fetch(url, fallback)
        } else {
            Error::fetch(url, stderr_tail)
        }
    }
}

#[async_trait]
impl AssetSource for YtDlpSource {
    async fn fetch_metadata(&self, url: &str) -> Result<RemoteMetadata> {
        let kind = validate_url(url)?;
        let url = url.trim();

        let mut cmd = tokio_command(&self.ytdlp_path);
        cmd.args(["--dump-single-json", "--flat-playlist", "--no-warnings"]);
        if kind == UrlKind::Video {
            cmd.arg("--no-playlist");
        }
        cmd.arg(url);

        debug!(url, "Fetching metadata");
        let output = run_captured(&mut cmd, METADATA_TIMEOUT)
            .await
            .map_err(|e| Error::fetch(url, e.to_string()))?;
        if !output.success() {
            return Err(Self::failure(url, output.stderr_tail(2), "metadata lookup failed"));
        }

        let metadata = parse_metadata(url, &output.stdout)?;
        info!(url, title = metadata.title(), "Metadata fetched");
        Ok(metadata)
    }

    async fn fetch_asset(
        &self,
        url: &str,
        destination_dir: &Path,
        on_progress: &mut (dyn FnMut(FetchProgress) + Send),
    ) -> Result<PathBuf> {
        let url = url.trim();
        let template = destination_dir.join("%(id)s.%(ext)s");

        let mut cmd = tokio_command(&self.ytdlp_path);
        cmd.args(["-f", "bestaudio/best", "--no-playlist", "--no-warnings", "--newline", "--progress"])
            .arg("-o")
            .arg(&template)
            .args(["--print", "after_move:filepath"])
            .arg(url);

        let mut printed = Vec::new();
        let output = run_streaming(&mut cmd, self.fetch_timeout, |stream, line| {
            if let Some(progress) = parse_progress_line(line) {
                on_progress(progress);
            } else if stream == OutputStream::Stdout && !line.trim().is_empty() && !line.starts_with('[') {
                printed.push(PathBuf::from(line.trim()));
            }
        })
        .await
        .map_err(|e| Error::fetch(url, e.to_string()))?;

        if !output.success() {
            return Err(Self::failure(url, output.stderr_tail(2), "download failed"));
        }

        if let Some(path) = printed.into_iter().rev().find(|p| p.is_file()) {
            debug!(path = %path.display(), "Download finished");
            return Ok(path);
        }

        find_downloaded(destination_dir)
            .await?
            .ok_or_else(|| Error::fetch(url, "Downloaded file not found."))
    }
}
