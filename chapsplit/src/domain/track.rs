//! Track work items: one chapter to extract, name and tag.

use serde::{Deserialize, Serialize};

use super::ChapterSpan;
use crate::utils::filename::sanitize_filename;

/// Extension of every produced track.
pub const TRACK_EXTENSION: &str = "mp3";

/// Tag fields to write onto a produced file.
///
/// `None` means "leave whatever the file already has".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl TrackTags {
    /// Build tags from raw form input; blank strings become `None`.
    pub fn from_input(title: &str, artist: &str, album: &str) -> Self {
        Self {
            title: non_blank(title),
            artist: non_blank(artist),
            album: non_blank(album),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// One unit of extraction work.
///
/// Values are never edited in place. Renaming or retagging produces a new
/// item through [`with_filename`](Self::with_filename) or
/// [`with_metadata`](Self::with_metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTrackWorkItem")]
pub struct TrackWorkItem {
    span: ChapterSpan,
    destination_base_name: String,
    title: String,
    artist: String,
    album: String,
}

/// Wire shape of a [`TrackWorkItem`]; converted through the sanitizing constructor.
#[derive(Deserialize)]
struct RawTrackWorkItem {
    span: ChapterSpan,
    destination_base_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    album: String,
}

impl From<RawTrackWorkItem> for TrackWorkItem {
    fn from(raw: RawTrackWorkItem) -> Self {
        Self::new(raw.span, &raw.destination_base_name).with_metadata(&raw.title, &raw.artist, &raw.album)
    }
}

impl TrackWorkItem {
    /// Create an item; the base name is sanitized and never empty.
    pub fn new(span: ChapterSpan, destination_base_name: &str) -> Self {
        Self {
            span,
            destination_base_name: sanitize_filename(destination_base_name),
            title: String::new(),
            artist: String::new(),
            album: String::new(),
        }
    }

    /// Item named after the span's own title.
    pub fn from_span(span: ChapterSpan) -> Self {
        let name = span.title().to_string();
        Self::new(span, &name)
    }

    pub fn span(&self) -> &ChapterSpan {
        &self.span
    }

    pub fn destination_base_name(&self) -> &str {
        &self.destination_base_name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    /// The title to tag with: the explicit title, or the base name.
    pub fn effective_title(&self) -> &str {
        if self.title.is_empty() {
            &self.destination_base_name
        } else {
            &self.title
        }
    }

    /// `<base name>.mp3`
    pub fn destination_file_name(&self) -> String {
        format!("{}.{}", self.destination_base_name, TRACK_EXTENSION)
    }

    pub fn with_filename(&self, destination_base_name: &str) -> Self {
        Self {
            destination_base_name: sanitize_filename(destination_base_name),
            ..self.clone()
        }
    }

    /// Replace all three metadata fields.
    pub fn with_metadata(&self, title: &str, artist: &str, album: &str) -> Self {
        Self {
            title: title.trim().to_string(),
            artist: artist.trim().to_string(),
            album: album.trim().to_string(),
            ..self.clone()
        }
    }

    /// Apply bulk edits: blank fields keep the current value.
    pub fn with_bulk_metadata(&self, title: &str, artist: &str, album: &str) -> Self {
        let pick = |new: &str, current: &str| {
            let new = new.trim();
            if new.is_empty() {
                current.to_string()
            } else {
                new.to_string()
            }
        };

        Self {
            title: pick(title, &self.title),
            artist: pick(artist, &self.artist),
            album: pick(album, &self.album),
            ..self.clone()
        }
    }

    /// Tags to write: the effective title plus any non-blank artist/album.
    pub fn tags(&self) -> TrackTags {
        TrackTags {
            title: Some(self.effective_title().to_string()),
            artist: non_blank(&self.artist),
            album: non_blank(&self.album),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> ChapterSpan {
        ChapterSpan::new(2, "Part 3: Finale?", 120.0, 300.0).unwrap()
    }

    #[test]
    fn test_from_span_sanitizes_title() {
        let item = TrackWorkItem::from_span(span());
        assert_eq!(item.destination_base_name(), "Part 3_ Finale_");
        assert_eq!(item.destination_file_name(), "Part 3_ Finale_.mp3");
        assert_eq!(item.effective_title(), "Part 3_ Finale_");
    }

    #[test]
    fn test_effective_title_prefers_explicit_title() {
        let item = TrackWorkItem::from_span(span()).with_metadata("Finale", "Band", "");
        assert_eq!(item.effective_title(), "Finale");
        assert_eq!(
            item.tags(),
            TrackTags {
                title: Some("Finale".to_string()),
                artist: Some("Band".to_string()),
                album: None,
            }
        );
    }

    #[test]
    fn test_corrections_build_new_values() {
        let original = TrackWorkItem::from_span(span());
        let renamed = original.with_filename("finale");

        assert_eq!(original.destination_base_name(), "Part 3_ Finale_");
        assert_eq!(renamed.destination_base_name(), "finale");
        assert_eq!(renamed.span(), original.span());
    }

    #[test]
    fn test_bulk_metadata_keeps_blank_fields() {
        let item = TrackWorkItem::from_span(span()).with_metadata("Finale", "Band", "Live");
        let bulk = item.with_bulk_metadata("", "Other Band", "  ");

        assert_eq!(bulk.title(), "Finale");
        assert_eq!(bulk.artist(), "Other Band");
        assert_eq!(bulk.album(), "Live");
    }

    #[test]
    fn test_empty_filename_falls_back() {
        let item = TrackWorkItem::new(span(), "   ");
        assert_eq!(item.destination_base_name(), "untitled");
    }

    #[test]
    fn test_deserialized_items_are_sanitized() {
        let item = TrackWorkItem::from_span(span()).with_metadata("Finale", "Band", "");
        let mut json = serde_json::to_value(&item).unwrap();
        json["destination_base_name"] = serde_json::json!("../../etc/passwd?");

        let parsed: TrackWorkItem = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.destination_base_name(), "___etc_passwd_");
        assert_eq!(parsed.artist(), "Band");
        assert_eq!(parsed.span(), item.span());

        let blank: TrackWorkItem = serde_json::from_value(serde_json::json!({
            "span": serde_json::to_value(span()).unwrap(),
            "destination_base_name": "  ",
        }))
        .unwrap();
        assert_eq!(blank.destination_base_name(), "untitled");
    }

    #[test]
    fn test_tags_from_input() {
        let tags = TrackTags::from_input("A", "", "B");
        assert_eq!(tags.title.as_deref(), Some("A"));
        assert_eq!(tags.artist, None);
        assert_eq!(tags.album.as_deref(), Some("B"));
        assert!(TrackTags::from_input(" ", "", "").is_empty());
    }
}
