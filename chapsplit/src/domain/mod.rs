//! Domain model: immutable work items and the values the pipelines report.

pub mod chapter;
pub mod job;
pub mod loudness;
pub mod media_file;
pub mod outcome;
pub mod track;
pub mod video;

pub use chapter::ChapterSpan;
pub use job::{DownloadJob, validate_batch};
pub use loudness::{LoudnessStats, TargetLoudness};
pub use media_file::MediaFileInfo;
pub use outcome::{BatchReport, BatchSummary, PipelineOutcome};
pub use track::{TRACK_EXTENSION, TrackTags, TrackWorkItem};
pub use video::{PlaylistEntry, PlaylistInfo, RemoteMetadata, VideoInfo};
