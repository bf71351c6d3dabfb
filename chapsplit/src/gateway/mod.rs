//! Media Transform Gateway.
//!
//! The boundary between the pipelines and the external media tools. Every
//! operation is a single call with its own wall-clock timeout and no
//! concurrency of its own; the pipelines decide how many run at once.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;
use crate::domain::{TargetLoudness, TrackTags};

mod ffmpeg;
pub mod tags;

pub use ffmpeg::{
    FfmpegGateway, LoudnormReport, extract_args, measure_args, normalize_args, parse_loudnorm,
};

/// Operations the pipelines need from the media tools.
#[async_trait]
pub trait MediaGateway: Send + Sync {
    /// Extract `[start_time, end_time)` of `source` into `destination`.
    ///
    /// `start_time = 0` with `end_time <= 0` re-encodes the whole file
    /// without trimming.
    async fn extract_range(
        &self,
        source: &Path,
        start_time: f64,
        end_time: f64,
        destination: &Path,
    ) -> Result<PathBuf>;

    /// Write the present tag fields; absent fields keep their current value.
    async fn apply_tags(&self, path: &Path, tags: &TrackTags) -> Result<()>;

    /// Integrated loudness of `path` in LUFS.
    async fn measure_loudness(&self, path: &Path) -> Result<f64>;

    /// Re-encode `path` in place to `target`. All-or-nothing per file.
    async fn normalize_loudness(&self, path: &Path, target: TargetLoudness) -> Result<()>;
}
