//! ID3 tag reading and writing through lofty.

use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::prelude::{Accessor, TagExt};
use lofty::probe::Probe;
use lofty::tag::Tag;
use tracing::debug;

use crate::domain::TrackTags;
use crate::{Error, Result};

/// Write the present fields of `tags` onto `path`.
///
/// Creates the file's primary tag when it has none. Fields that are `None`
/// are left exactly as they are on disk.
pub async fn apply_tags(path: &Path, tags: &TrackTags) -> Result<()> {
    let owned_path = path.to_path_buf();
    let tags = tags.clone();

    tokio::task::spawn_blocking(move || write_tags_blocking(&owned_path, &tags))
        .await
        .map_err(|e| Error::tag_write(path, format!("tag writer task failed: {e}")))?
}

/// Read the title, artist and album of `path`.
pub async fn read_tags(path: &Path) -> Result<TrackTags> {
    let owned_path: PathBuf = path.to_path_buf();

    tokio::task::spawn_blocking(move || read_tags_blocking(&owned_path))
        .await
        .map_err(|e| Error::tag_write(path, format!("tag reader task failed: {e}")))?
}

fn write_tags_blocking(path: &Path, tags: &TrackTags) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }

    let mut tagged_file = Probe::open(path)
        .and_then(|probe| probe.read())
        .map_err(|e| Error::tag_write(path, e.to_string()))?;

    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        debug!(path = %path.display(), ?tag_type, "Creating tag container");
        tagged_file.insert_tag(Tag::new(tag_type));
    }

    let tag = tagged_file
        .primary_tag_mut()
        .ok_or_else(|| Error::tag_write(path, "file has no writable tag container"))?;

    if let Some(title) = &tags.title {
        tag.set_title(title.clone());
    }
    if let Some(artist) = &tags.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(album) = &tags.album {
        tag.set_album(album.clone());
    }

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| Error::tag_write(path, e.to_string()))?;

    debug!(path = %path.display(), "Tags written");
    Ok(())
}

fn read_tags_blocking(path: &Path) -> Result<TrackTags> {
    let tagged_file = Probe::open(path)
        .and_then(|probe| probe.read())
        .map_err(|e| Error::tag_write(path, e.to_string()))?;

    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return Ok(TrackTags::default());
    };

    Ok(TrackTags {
        title: tag.title().map(|s| s.into_owned()),
        artist: tag.artist().map(|s| s.into_owned()),
        album: tag.album().map(|s| s.into_owned()),
    })
}
