//! Download jobs: one remote asset and the tracks cut from it.

use std::collections::HashSet;

use super::TrackWorkItem;
use crate::{Error, Result};

/// One fetch of one source asset followed by N extractions.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    source_url: String,
    tracks: Vec<TrackWorkItem>,
}

impl DownloadJob {
    /// Create a job. It must have at least one track and its destination
    /// names must be distinct.
    pub fn new(source_url: impl Into<String>, tracks: Vec<TrackWorkItem>) -> Result<Self> {
        let source_url = source_url.into();
        if tracks.is_empty() {
            return Err(Error::validation(format!(
                "A download job needs at least one track ({source_url})"
            )));
        }
        ensure_distinct_names(&tracks)?;

        Ok(Self { source_url, tracks })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn tracks(&self) -> &[TrackWorkItem] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Check a whole batch before it starts and return its total track count.
///
/// Destination names must be distinct across every job, since all tracks
/// land in the same output directory.
pub fn validate_batch(jobs: &[DownloadJob]) -> Result<usize> {
    if jobs.is_empty() {
        return Err(Error::validation("A batch needs at least one job"));
    }
    let all: Vec<TrackWorkItem> = jobs.iter().flat_map(|j| j.tracks.iter().cloned()).collect();
    ensure_distinct_names(&all)?;
    Ok(all.len())
}

fn ensure_distinct_names(tracks: &[TrackWorkItem]) -> Result<()> {
    let mut seen = HashSet::with_capacity(tracks.len());
    for track in tracks {
        if !seen.insert(track.destination_base_name().to_lowercase()) {
            return Err(Error::validation(format!(
                "Duplicate track filename: {}",
                track.destination_file_name()
            )));
        }
    }
    Ok(())
}
