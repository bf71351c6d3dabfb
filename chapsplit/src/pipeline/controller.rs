//! Batch pipeline controller.
//!
//! Runs the jobs of one batch strictly one after another. Each job fetches
//! its source asset into a private scratch directory, fans its tracks out
//! to a [`WorkerPool`] for extraction and tagging, and optionally fans the
//! successful ones out again for loudness normalization. Every track ends
//! with exactly one [`PipelineOutcome`] unless the batch is cancelled first.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pipeline_common::{Completion, EmitThrottle, WorkerPool, default_concurrency};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{DEFAULT_EVENT_CAPACITY, EventSink, Phase, PipelineEvent, Severity};
use super::{BatchProgress, JobState};
use crate::config::AppConfig;
use crate::domain::{
    BatchReport, DownloadJob, PipelineOutcome, TargetLoudness, TrackWorkItem, validate_batch,
};
use crate::gateway::MediaGateway;
use crate::source::{AssetSource, FetchProgress};
use crate::{Error, Result};

const SCRATCH_PREFIX: &str = "chapsplit-";

/// Tunables for a [`BatchPipeline`].
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Where finished tracks are written.
    pub output_dir: PathBuf,
    /// Parent for per-job scratch directories; the system temp dir when unset.
    pub scratch_root: Option<PathBuf>,
    pub max_workers: usize,
    /// Minimum spacing between download progress events.
    pub progress_interval: Duration,
    pub event_capacity: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            scratch_root: None,
            max_workers: default_concurrency(),
            progress_interval: Duration::from_millis(500),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl BatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            scratch_root: None,
            max_workers: config.worker_count(),
            progress_interval: config.progress_interval(),
            event_capacity: config.event_capacity,
        }
    }
}

/// Drives download jobs through fetch, extract and normalize.
///
/// Cheap to clone; clones share the event channel and the cancellation
/// token. Cancellation is final for the instance.
#[derive(Clone)]
pub struct BatchPipeline {
    source: Arc<dyn AssetSource>,
    gateway: Arc<dyn MediaGateway>,
    settings: BatchSettings,
    events: EventSink,
    cancellation_token: CancellationToken,
}

/// Accumulates the outcomes of one run.
struct RunState {
    progress: BatchProgress,
    outcomes: Vec<PipelineOutcome<TrackWorkItem>>,
}

impl BatchPipeline {
    pub fn new(
        source: Arc<dyn AssetSource>,
        gateway: Arc<dyn MediaGateway>,
        settings: BatchSettings,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let events = EventSink::new(settings.event_capacity, cancellation_token.clone());
        Self {
            source,
            gateway,
            settings,
            events,
            cancellation_token,
        }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Subscribe to outcome, progress and log events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Stop dispatching new work. Outcomes already reported stand.
    pub fn cancel(&self) {
        info!("Batch cancellation requested");
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Validate `jobs` and run them on a background task.
    ///
    /// Validation errors are returned here, before anything starts.
    pub fn start(
        &self,
        jobs: Vec<DownloadJob>,
        target: Option<TargetLoudness>,
    ) -> Result<JoinHandle<Result<BatchReport<TrackWorkItem>>>> {
        validate_batch(&jobs)?;
        let pipeline = self.clone();
        Ok(tokio::spawn(async move { pipeline.run(jobs, target).await }))
    }

    /// Run every job to completion (or until cancelled) and report.
    pub async fn run(
        &self,
        jobs: Vec<DownloadJob>,
        target: Option<TargetLoudness>,
    ) -> Result<BatchReport<TrackWorkItem>> {
        let total = validate_batch(&jobs)?;
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;

        info!(
            jobs = jobs.len(),
            tracks = total,
            workers = self.settings.max_workers,
            target = ?target.map(|t| t.lufs()),
            "Starting batch"
        );

        let mut run = RunState {
            progress: BatchProgress::new(total),
            outcomes: Vec::with_capacity(total),
        };
        self.events.progress(0, total);

        let job_count = jobs.len();
        for (index, job) in jobs.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }
            self.run_job(index, job_count, job, target, &mut run).await?;
        }

        debug!(
            completed = run.progress.completed(),
            total = run.progress.total(),
            "Batch counter settled"
        );
        let cancelled = self.is_cancelled();
        let report = BatchReport::from_outcomes(run.outcomes, total, cancelled);
        let summary = report.summary;

        if cancelled {
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                incomplete = summary.incomplete(),
                "Batch cancelled"
            );
        } else {
            info!(succeeded = summary.succeeded, failed = summary.failed, "Batch finished");
            self.events.log(Phase::Done, Severity::Success, "All done!");
            self.events.emit(PipelineEvent::Finished(summary));
        }

        Ok(report)
    }

    async fn run_job(
        &self,
        index: usize,
        job_count: usize,
        job: &DownloadJob,
        target: Option<TargetLoudness>,
        run: &mut RunState,
    ) -> Result<()> {
        let mut state = JobState::Preparing;
        let url = job.source_url();

        self.transition(index, &mut state, JobState::Fetching)?;
        let fetched = match self.fetch(index, job_count, url).await {
            Some(Ok(fetched)) => fetched,
            Some(Err(e)) => {
                self.transition(index, &mut state, JobState::FailedFatal)?;
                self.fail_job(index, job, &e, run);
                return Ok(());
            }
            None => {
                self.transition(index, &mut state, JobState::Cancelled)?;
                return Ok(());
            }
        };
        let (_scratch, asset) = fetched;

        self.transition(index, &mut state, JobState::Extracting)?;
        let extracted = self.extract_all(job, &asset, target.is_some(), run).await;
        if self.is_cancelled() {
            self.transition(index, &mut state, JobState::Cancelled)?;
            return Ok(());
        }

        if let Some(target) = target {
            self.transition(index, &mut state, JobState::Normalizing)?;
            self.normalize_all(extracted, target, run).await;
            if self.is_cancelled() {
                self.transition(index, &mut state, JobState::Cancelled)?;
                return Ok(());
            }
        }

        self.transition(index, &mut state, JobState::Done)?;
        debug!(job = index, asset = %asset.display(), "Job finished");
        Ok(())
    }

    fn transition(&self, job: usize, state: &mut JobState, to: JobState) -> Result<()> {
        *state = state.transition_to(to)?;
        debug!(job, state = %state, "Job state changed");
        self.events.emit(PipelineEvent::JobStateChanged { job, state: to });
        Ok(())
    }

    /// Download the job's asset into a fresh scratch directory.
    ///
    /// `None` means the batch was cancelled while fetching. The scratch
    /// directory is removed when the returned guard drops.
    async fn fetch(&self, index: usize, job_count: usize, url: &str) -> Option<Result<(TempDir, PathBuf)>> {
        let message = if job_count > 1 {
            format!("Downloading video {}/{}...", index + 1, job_count)
        } else {
            "Downloading audio from YouTube...".to_string()
        };
        self.events.log(Phase::Fetching, Severity::Info, message);

        let scratch = match self.create_scratch() {
            Ok(dir) => dir,
            Err(e) => return Some(Err(e)),
        };
        debug!(job = index, scratch = %scratch.path().display(), "Created scratch directory");

        let mut throttle = EmitThrottle::new(self.settings.progress_interval);
        let events = self.events.clone();
        let mut on_progress = move |progress: FetchProgress| {
            if throttle.should_emit() {
                events.emit(PipelineEvent::Transfer {
                    job: index,
                    percent: progress.percent,
                    speed: progress.speed,
                });
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return None,
            result = self.source.fetch_asset(url, scratch.path(), &mut on_progress) => result,
        };

        match result {
            Ok(asset) => {
                self.events.log(Phase::Fetching, Severity::Success, "Download complete.");
                Some(Ok((scratch, asset)))
            }
            Err(e) => Some(Err(e)),
        }
    }

    fn create_scratch(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match &self.settings.scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Every track of a job whose fetch failed gets a failed outcome.
    fn fail_job(&self, index: usize, job: &DownloadJob, error: &Error, run: &mut RunState) {
        warn!(job = index, url = job.source_url(), error = %error, "Job fetch failed");
        self.events.log(Phase::Fetching, Severity::Error, format!("Fatal error: {error}"));
        self.events.emit(PipelineEvent::JobFailed {
            job: index,
            url: job.source_url().to_string(),
            message: error.to_string(),
        });
        for track in job.tracks() {
            let message = format!("{}: {error}", track.destination_file_name());
            self.record(PipelineOutcome::failure(track.clone(), message), run);
        }
    }

    /// Extract and tag every track of the job in parallel.
    ///
    /// When a normalization pass follows, successful tracks are returned
    /// for it instead of being recorded; their outcome is decided there.
    async fn extract_all(
        &self,
        job: &DownloadJob,
        asset: &Path,
        defer_success: bool,
        run: &mut RunState,
    ) -> Vec<(TrackWorkItem, PathBuf)> {
        let pool = WorkerPool::with_token(self.settings.max_workers, self.cancellation_token.child_token());
        let gateway = self.gateway.clone();
        let asset = Arc::new(asset.to_path_buf());
        let output_dir = Arc::new(self.settings.output_dir.clone());

        let mut completions = pool.run(job.tracks().to_vec(), move |track: TrackWorkItem| {
            let gateway = gateway.clone();
            let asset = asset.clone();
            let output_dir = output_dir.clone();
            async move { extract_and_tag(gateway.as_ref(), &asset, &output_dir, &track).await }
        });

        let mut extracted = Vec::new();
        while let Some(Completion { item, result }) = completions.next().await {
            match result {
                Ok(path) => {
                    let file_name = item.destination_file_name();
                    self.events
                        .log(Phase::Extracting, Severity::Success, format!("  Saved: {file_name}"));
                    if defer_success {
                        extracted.push((item, path));
                    } else {
                        self.record(PipelineOutcome::success(item), run);
                    }
                }
                Err(e) => self.record_failure(Phase::Extracting, item, &e, run),
            }
        }
        completions.drain().await;
        extracted
    }

    /// Normalize the extracted tracks of one job in place.
    async fn normalize_all(
        &self,
        extracted: Vec<(TrackWorkItem, PathBuf)>,
        target: TargetLoudness,
        run: &mut RunState,
    ) {
        if extracted.is_empty() {
            return;
        }
        self.events.log(
            Phase::Normalizing,
            Severity::Info,
            format!("Normalizing to {:.1} LUFS...", target.lufs()),
        );

        let pool = WorkerPool::with_token(self.settings.max_workers, self.cancellation_token.child_token());
        let gateway = self.gateway.clone();
        let mut completions = pool.run(extracted, move |(_, path): (TrackWorkItem, PathBuf)| {
            let gateway = gateway.clone();
            async move { gateway.normalize_loudness(&path, target).await }
        });

        while let Some(Completion { item: (item, _), result }) = completions.next().await {
            match result {
                Ok(()) => self.record(PipelineOutcome::success(item), run),
                Err(e) => self.record_failure(Phase::Normalizing, item, &e, run),
            }
        }
        completions.drain().await;
    }

    fn record_failure(&self, phase: Phase, item: TrackWorkItem, error: &Error, run: &mut RunState) {
        let file_name = item.destination_file_name();
        warn!(track = %file_name, phase = phase.as_str(), error = %error, "Track failed");
        self.events
            .log(phase, Severity::Error, format!("  Error: {file_name} - {error}"));
        let message = format!("{file_name}: {error}");
        self.record(PipelineOutcome::failure(item, message), run);
    }

    /// Post one outcome and advance the batch counter.
    fn record(&self, outcome: PipelineOutcome<TrackWorkItem>, run: &mut RunState) {
        let (completed, total) = run.progress.advance();
        self.events.emit(PipelineEvent::TrackFinished(outcome.clone()));
        self.events.progress(completed, total);
        run.outcomes.push(outcome);
    }
}

/// Cut one track out of the fetched asset and tag it.
///
/// A file that was written but could not be tagged stays on disk; the
/// track still counts as failed.
async fn extract_and_tag(
    gateway: &dyn MediaGateway,
    asset: &Path,
    output_dir: &Path,
    track: &TrackWorkItem,
) -> Result<PathBuf> {
    let destination = output_dir.join(track.destination_file_name());
    let span = track.span();
    debug!(
        track = %track.destination_file_name(),
        start = span.start_time(),
        end = span.end_time(),
        "Extracting track"
    );
    let path = gateway
        .extract_range(asset, span.start_time(), span.end_time(), &destination)
        .await?;
    gateway.apply_tags(&path, &track.tags()).await?;
    Ok(path)
}
