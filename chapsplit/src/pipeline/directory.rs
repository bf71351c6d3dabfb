//! Directory scan pipeline: list MP3 files, measure them, normalize them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipeline_common::{Completion, WorkerPool};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{DEFAULT_EVENT_CAPACITY, EventSink, Phase, PipelineEvent, Severity};
use crate::domain::{
    BatchReport, BatchSummary, LoudnessStats, MediaFileInfo, PipelineOutcome, TRACK_EXTENSION,
    TargetLoudness,
};
use crate::gateway::MediaGateway;
use crate::{Error, Result};

fn is_track_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(TRACK_EXTENSION))
}

/// Files of one directory with whatever loudness could be measured.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredFiles {
    /// Every scanned file in filename order; failed ones have no loudness.
    pub files: Vec<MediaFileInfo>,
    pub summary: BatchSummary,
}

impl MeasuredFiles {
    /// Mean and median over the files that were measured.
    pub fn stats(&self) -> Option<LoudnessStats> {
        LoudnessStats::from_files(&self.files)
    }
}

/// Normalization-only pipeline over a directory of MP3 files.
#[derive(Clone)]
pub struct DirectoryPipeline {
    gateway: Arc<dyn MediaGateway>,
    max_workers: usize,
    events: EventSink,
    cancellation_token: CancellationToken,
}

impl DirectoryPipeline {
    pub fn new(gateway: Arc<dyn MediaGateway>, max_workers: usize) -> Self {
        Self::with_capacity(gateway, max_workers, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(gateway: Arc<dyn MediaGateway>, max_workers: usize, event_capacity: usize) -> Self {
        let cancellation_token = CancellationToken::new();
        Self {
            gateway,
            max_workers: max_workers.max(1),
            events: EventSink::new(event_capacity, cancellation_token.clone()),
            cancellation_token,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn cancel(&self) {
        info!("Directory pipeline cancellation requested");
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check user input naming a directory of MP3 files.
    pub async fn validate_directory(input: &str) -> Result<PathBuf> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::validation("Please enter a directory path."));
        }
        let dir = PathBuf::from(input);
        let metadata = match tokio::fs::metadata(&dir).await {
            Ok(metadata) => metadata,
            Err(_) => return Err(Error::validation("Directory does not exist.")),
        };
        if !metadata.is_dir() {
            return Err(Error::validation("Path is not a directory."));
        }
        if list_tracks(&dir).await?.is_empty() {
            return Err(Error::validation("No MP3 files found in this directory."));
        }
        Ok(dir)
    }

    /// List the MP3 files of `dir`, ordered by filename.
    pub async fn scan(&self, dir: &Path) -> Result<Vec<MediaFileInfo>> {
        let files = list_tracks(dir).await?;
        info!(dir = %dir.display(), files = files.len(), "Directory scanned");
        self.events.log(
            Phase::Scanning,
            Severity::Info,
            format!("Found {} MP3 files in {}", files.len(), dir.display()),
        );
        Ok(files)
    }

    /// Measure every file in parallel.
    ///
    /// Order is preserved. A file whose measurement fails stays in the list
    /// without a loudness value.
    pub async fn measure_all(&self, files: Vec<MediaFileInfo>) -> MeasuredFiles {
        let total = files.len();
        let mut summary = BatchSummary::new(total);
        let mut measured = files.clone();

        let pool = WorkerPool::with_token(self.max_workers, self.cancellation_token.child_token());
        let gateway = self.gateway.clone();
        let mut completions = pool.run(
            files.into_iter().enumerate().collect(),
            move |(_, file): (usize, MediaFileInfo)| {
                let gateway = gateway.clone();
                async move { gateway.measure_loudness(file.path()).await }
            },
        );

        self.events.progress(0, total);
        while let Some(Completion { item: (index, file), result }) = completions.next().await {
            let (file, error) = match result {
                Ok(lufs) => {
                    debug!(file = file.display_name(), lufs, "Measured");
                    (file.with_loudness(lufs), None)
                }
                Err(e) => {
                    warn!(file = file.display_name(), error = %e, "Measurement failed");
                    (file, Some(e.to_string()))
                }
            };
            summary.record(error.is_none());
            measured[index] = file.clone();
            self.events.emit(PipelineEvent::FileMeasured { index, file, error });
            self.events.progress(summary.completed(), total);
        }
        completions.drain().await;

        summary.cancelled = self.is_cancelled();
        MeasuredFiles {
            files: measured,
            summary,
        }
    }

    /// Normalize every file in place to `target`.
    pub async fn normalize_all(
        &self,
        files: Vec<MediaFileInfo>,
        target: TargetLoudness,
    ) -> BatchReport<MediaFileInfo> {
        let total = files.len();
        self.events.log(
            Phase::Normalizing,
            Severity::Info,
            format!("Normalizing to {:.1} LUFS...", target.lufs()),
        );

        let pool = WorkerPool::with_token(self.max_workers, self.cancellation_token.child_token());
        let gateway = self.gateway.clone();
        let mut completions = pool.run(files, move |file: MediaFileInfo| {
            let gateway = gateway.clone();
            async move { gateway.normalize_loudness(file.path(), target).await }
        });

        let mut outcomes = Vec::with_capacity(total);
        self.events.progress(0, total);
        while let Some(Completion { item, result }) = completions.next().await {
            let outcome = match result {
                Ok(()) => {
                    self.events.log(
                        Phase::Normalizing,
                        Severity::Success,
                        format!("  Saved: {}", item.display_name()),
                    );
                    PipelineOutcome::success(item)
                }
                Err(e) => {
                    warn!(file = item.display_name(), error = %e, "Normalization failed");
                    let message = format!("{}: {e}", item.display_name());
                    self.events.log(
                        Phase::Normalizing,
                        Severity::Error,
                        format!("  Error: {} - {e}", item.display_name()),
                    );
                    PipelineOutcome::failure(item, message)
                }
            };
            outcomes.push(outcome.clone());
            self.events.emit(PipelineEvent::FileNormalized(outcome));
            self.events.progress(outcomes.len(), total);
        }
        completions.drain().await;

        let report = BatchReport::from_outcomes(outcomes, total, self.is_cancelled());
        if !report.summary.cancelled {
            info!(
                succeeded = report.summary.succeeded,
                failed = report.summary.failed,
                "Directory normalized"
            );
            self.events.log(Phase::Done, Severity::Success, "All done!");
            self.events.emit(PipelineEvent::Finished(report.summary));
        }
        report
    }
}

async fn list_tracks(dir: &Path) -> Result<Vec<MediaFileInfo>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_track_file(&path) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            files.push(MediaFileInfo::new(path, metadata.len()));
        }
    }
    files.sort_by(|a, b| a.display_name().cmp(b.display_name()));
    Ok(files)
}
