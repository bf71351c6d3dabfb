//! Remote asset source: metadata lookup and media download.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::domain::RemoteMetadata;
use crate::{Error, Result};

mod ytdlp;

pub use ytdlp::{YtDlpSource, parse_metadata, parse_progress_line};

static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|m\.|music\.)?(youtube\.com/watch\?v=|youtu\.be/)[\w-]+").unwrap()
});

static PLAYLIST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|m\.|music\.)?youtube\.com/playlist\?list=[\w-]+").unwrap()
});

/// One download progress sample.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchProgress {
    /// 0.0 ..= 100.0
    pub percent: f64,
    /// Transfer rate as reported by the tool, e.g. `1.23MiB/s`.
    pub speed: Option<String>,
}

/// What kind of resource a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Video,
    Playlist,
}

/// Check that `url` is a supported video or playlist URL.
pub fn validate_url(url: &str) -> Result<UrlKind> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::validation("Please enter a URL."));
    }
    if PLAYLIST_URL.is_match(url) {
        return Ok(UrlKind::Playlist);
    }
    if VIDEO_URL.is_match(url) {
        return Ok(UrlKind::Video);
    }
    Err(Error::validation("Please enter a valid YouTube URL."))
}

/// Canonical watch URL for a video id.
pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}

/// Retrieves metadata and media for remote assets.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Resolve `url` to a single video or a playlist.
    async fn fetch_metadata(&self, url: &str) -> Result<RemoteMetadata>;

    /// Download the asset's audio into `destination_dir` and return its path.
    ///
    /// `on_progress` is called for every progress sample the tool reports;
    /// rate limiting is the caller's concern.
    async fn fetch_asset(
        &self,
        url: &str,
        destination_dir: &Path,
        on_progress: &mut (dyn FnMut(FetchProgress) + Send),
    ) -> Result<PathBuf>;
}
