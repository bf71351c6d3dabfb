//! Remote metadata as reported by the asset source.

use serde::Serialize;

use super::ChapterSpan;
use crate::{Error, Result};

/// A single remote video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    /// Total duration in seconds, `0.0` when unknown.
    pub duration: f64,
    pub chapters: Vec<ChapterSpan>,
    pub webpage_url: String,
}

impl VideoInfo {
    pub fn has_chapters(&self) -> bool {
        !self.chapters.is_empty()
    }

    /// The chapter list, or a fetch error for chapter-flow use.
    pub fn require_chapters(&self) -> Result<&[ChapterSpan]> {
        if self.chapters.is_empty() {
            return Err(Error::fetch(&self.webpage_url, "This video has no chapters."));
        }
        Ok(&self.chapters)
    }

    /// One span covering the whole video, named after it.
    pub fn full_span(&self) -> ChapterSpan {
        ChapterSpan::full_file(0, &self.title, self.duration)
    }
}

/// One entry of a playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistEntry {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub duration: Option<f64>,
    pub url: String,
}

impl PlaylistEntry {
    /// Full-file span for this entry; unknown duration means passthrough.
    pub fn span(&self) -> ChapterSpan {
        ChapterSpan::full_file(self.index, &self.title, self.duration.unwrap_or(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

/// What a URL resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RemoteMetadata {
    Video(VideoInfo),
    Playlist(PlaylistInfo),
}

impl RemoteMetadata {
    pub fn title(&self) -> &str {
        match self {
            Self::Video(v) => &v.title,
            Self::Playlist(p) => &p.title,
        }
    }
}
