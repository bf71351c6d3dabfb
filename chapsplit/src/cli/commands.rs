//! Command flows behind the CLI subcommands and the interactive menu.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chapsplit::config::AppConfig;
use chapsplit::domain::{
    BatchReport, ChapterSpan, DownloadJob, MediaFileInfo, PlaylistInfo, RemoteMetadata,
    TargetLoudness, TrackWorkItem, VideoInfo,
};
use chapsplit::gateway::FfmpegGateway;
use chapsplit::pipeline::{BatchPipeline, BatchSettings, DirectoryPipeline};
use chapsplit::source::{AssetSource, YtDlpSource, validate_url};
use chapsplit::utils::filename::UniqueNames;
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::prompt::{self, EditMode, Mode};
use super::render::{self, ProgressRenderer};

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub url: Option<String>,
    pub all: bool,
    pub yes: bool,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub target: Option<TargetLoudness>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    pub dir: Option<PathBuf>,
    pub target: Option<TargetLoudness>,
    pub measure_only: bool,
    pub yes: bool,
}

/// Runs one CLI command against the configured tools.
pub struct CommandExecutor {
    config: AppConfig,
    gateway: Arc<FfmpegGateway>,
    source: Arc<YtDlpSource>,
    quiet: bool,
}

impl CommandExecutor {
    pub fn new(config: AppConfig, quiet: bool) -> Self {
        let gateway = Arc::new(FfmpegGateway::from_config(&config));
        let source = Arc::new(YtDlpSource::from_config(&config));
        Self {
            config,
            gateway,
            source,
            quiet,
        }
    }

    /// Menu loop used when no subcommand was given.
    pub async fn interactive(&self) -> Result<()> {
        loop {
            let Some(mode) = prompt::mode()? else {
                return Ok(());
            };
            let result = match mode {
                Mode::Extract => self.extract(ExtractOptions::default()).await,
                Mode::Normalize => self.normalize(NormalizeOptions::default()).await,
                Mode::Quit => return Ok(()),
            };
            if let Err(e) = result {
                warn!(error = %e, "Command failed");
                eprintln!("{} {e:#}", "Error:".red().bold());
            }
            println!();
        }
    }

    async fn check_ffmpeg(&self) -> Result<()> {
        match self.gateway.check_available().await {
            Ok(version) => {
                debug!(version = %version, "ffmpeg found");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "ffmpeg unavailable");
                bail!("ffmpeg is not installed. Please install it first.")
            }
        }
    }

    async fn check_ytdlp(&self) -> Result<()> {
        match self.source.check_available().await {
            Ok(version) => {
                debug!(version = %version, "yt-dlp found");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "yt-dlp unavailable");
                bail!("yt-dlp is not installed. Please install it first.")
            }
        }
    }

    pub async fn extract(&self, options: ExtractOptions) -> Result<()> {
        self.check_ffmpeg().await?;
        self.check_ytdlp().await?;

        let url = match &options.url {
            Some(url) => {
                validate_url(url)?;
                url.trim().to_string()
            }
            None => match prompt::url()? {
                Some(url) => url,
                None => return Ok(()),
            },
        };

        let pb = render::spinner("Fetching video info...");
        let metadata = self.source.fetch_metadata(&url).await;
        pb.finish_and_clear();
        let metadata = metadata.with_context(|| format!("Failed to fetch video info for {url}"))?;
        println!("\n{} {}", "Title:".green(), metadata.title().cyan());

        let Some(mut jobs) = (match metadata {
            RemoteMetadata::Video(video) => self.video_job(&video, &options)?,
            RemoteMetadata::Playlist(playlist) => self.playlist_jobs(&playlist, &options)?,
        }) else {
            return Ok(());
        };

        let Some(edited) = edit_tracks(&jobs, &options)? else {
            return Ok(());
        };
        jobs = edited;

        let target = match options.target {
            Some(target) => Some(target),
            None if options.yes => None,
            None => match prompt::confirm("Normalize loudness of the extracted tracks?", false)? {
                Some(true) => match prompt::target(self.config.default_target()?)? {
                    Some(target) => Some(target),
                    None => return Ok(()),
                },
                Some(false) => None,
                None => return Ok(()),
            },
        };
        if let Some(target) = target {
            render::print_target(target.lufs());
        }

        let pipeline = BatchPipeline::new(
            self.source.clone(),
            self.gateway.clone(),
            BatchSettings::from_config(&self.config),
        );
        let renderer = ProgressRenderer::spawn(pipeline.subscribe(), self.quiet);
        let interrupt = cancel_on_ctrl_c(pipeline.cancellation_token());

        println!(
            "\n{} {}",
            "Saving to".green(),
            self.config.output_dir.display().to_string().cyan()
        );
        let report = pipeline.run(jobs, target).await;
        interrupt.cancel();
        renderer.finish().await;

        let report = report?;
        render::print_summary(&report);
        report_exit(&report)
    }

    fn video_job(&self, video: &VideoInfo, options: &ExtractOptions) -> Result<Option<Vec<DownloadJob>>> {
        let spans: Vec<ChapterSpan> = if video.has_chapters() {
            let chapters = video.require_chapters()?;
            render::print_chapters(chapters);
            if options.all || options.yes {
                chapters.to_vec()
            } else {
                let labels = chapters.iter().map(render::chapter_label).collect();
                match prompt::select_many("Select chapters to extract:", labels, "chapter")? {
                    Some(indices) => indices.into_iter().map(|i| chapters[i].clone()).collect(),
                    None => return Ok(None),
                }
            }
        } else {
            println!("{}", "This video has no chapters.".yellow());
            let whole = options.yes
                || prompt::confirm("Save the whole video as a single track?", true)?.unwrap_or(false);
            if !whole {
                return Ok(None);
            }
            vec![video.full_span()]
        };

        let mut names = UniqueNames::new();
        let tracks = spans
            .into_iter()
            .map(|span| {
                let track = TrackWorkItem::from_span(span);
                let base = names.claim(track.destination_base_name());
                track.with_filename(&base)
            })
            .collect();
        Ok(Some(vec![DownloadJob::new(video.webpage_url.clone(), tracks)?]))
    }

    fn playlist_jobs(&self, playlist: &PlaylistInfo, options: &ExtractOptions) -> Result<Option<Vec<DownloadJob>>> {
        if playlist.entries.is_empty() {
            bail!("This playlist has no videos.");
        }
        render::print_entries(&playlist.entries);

        let indices: Vec<usize> = if options.all || options.yes {
            (0..playlist.entries.len()).collect()
        } else {
            let labels = playlist.entries.iter().map(render::entry_label).collect();
            match prompt::select_many("Select videos to extract:", labels, "video")? {
                Some(indices) => indices,
                None => return Ok(None),
            }
        };

        let mut names = UniqueNames::new();
        let mut jobs = Vec::with_capacity(indices.len());
        for i in indices {
            let entry = &playlist.entries[i];
            let track = TrackWorkItem::from_span(entry.span());
            let base = names.claim(track.destination_base_name());
            jobs.push(DownloadJob::new(entry.url.clone(), vec![track.with_filename(&base)])?);
        }
        Ok(Some(jobs))
    }

    pub async fn normalize(&self, options: NormalizeOptions) -> Result<()> {
        self.check_ffmpeg().await?;

        let dir = match &options.dir {
            Some(dir) => DirectoryPipeline::validate_directory(&dir.to_string_lossy()).await?,
            None => loop {
                let Some(input) = prompt::directory()? else {
                    return Ok(());
                };
                match DirectoryPipeline::validate_directory(&input).await {
                    Ok(dir) => break dir,
                    Err(chapsplit::Error::Validation(message)) => println!("{}", message.red()),
                    Err(e) => return Err(e.into()),
                }
            },
        };

        let pipeline = DirectoryPipeline::with_capacity(
            self.gateway.clone(),
            self.config.worker_count(),
            self.config.event_capacity,
        );
        let interrupt = cancel_on_ctrl_c(pipeline.cancellation_token());

        let renderer = ProgressRenderer::spawn(pipeline.subscribe(), self.quiet);
        let files = pipeline.scan(&dir).await?;
        let measured = pipeline.measure_all(files).await;
        renderer.finish().await;

        render::print_file_table(&measured.files);
        render::print_stats(measured.stats());
        if measured.summary.cancelled {
            interrupt.cancel();
            println!("{}", "Cancelled.".yellow());
            return Ok(());
        }
        if options.measure_only {
            interrupt.cancel();
            return Ok(());
        }

        let target = match options.target {
            Some(target) => target,
            None if options.yes => self.config.default_target()?,
            None => match prompt::target(self.config.default_target()?)? {
                Some(target) => target,
                None => {
                    interrupt.cancel();
                    return Ok(());
                }
            },
        };

        let files: Vec<MediaFileInfo> = measured.files;
        if !options.yes {
            let question = format!(
                "Normalize {} files to {:.1} LUFS? Files are overwritten in place.",
                files.len(),
                target.lufs()
            );
            if prompt::confirm(&question, true)? != Some(true) {
                interrupt.cancel();
                return Ok(());
            }
        }

        let renderer = ProgressRenderer::spawn(pipeline.subscribe(), self.quiet);
        let report = pipeline.normalize_all(files, target).await;
        interrupt.cancel();
        renderer.finish().await;

        render::print_summary(&report);
        report_exit(&report)
    }

    pub fn config_command(config_path: Option<&std::path::Path>, show: bool, reset: bool) -> Result<()> {
        if reset {
            let path = AppConfig::reset(config_path)?;
            println!("✓ Configuration reset to defaults ({})", path.display());
        } else if show {
            let config = AppConfig::load(config_path)?;
            println!("{}", config.show()?);
        } else {
            println!("Use --show to display current configuration or --reset to reset to defaults");
        }
        Ok(())
    }
}

/// Ask for new names/tags according to the chosen edit mode.
fn edit_tracks(jobs: &[DownloadJob], options: &ExtractOptions) -> Result<Option<Vec<DownloadJob>>> {
    let artist = options.artist.as_deref().unwrap_or_default();
    let album = options.album.as_deref().unwrap_or_default();
    let preset = |track: &TrackWorkItem| track.with_bulk_metadata("", artist, album);

    let mode = if options.yes {
        EditMode::Keep
    } else {
        match prompt::edit_mode()? {
            Some(mode) => mode,
            None => return Ok(None),
        }
    };

    let mut edited: Vec<(String, Vec<TrackWorkItem>)> = Vec::with_capacity(jobs.len());
    match mode {
        EditMode::Keep => {
            for job in jobs {
                edited.push((job.source_url().to_string(), job.tracks().iter().map(preset).collect()));
            }
        }
        EditMode::Bulk => {
            let Some(title) = prompt::optional_text("Title (every track):")? else {
                return Ok(None);
            };
            let Some(bulk_artist) = prompt::text("Artist:", artist)? else {
                return Ok(None);
            };
            let Some(bulk_album) = prompt::text("Album:", album)? else {
                return Ok(None);
            };
            for job in jobs {
                let tracks = job
                    .tracks()
                    .iter()
                    .map(|t| t.with_bulk_metadata(&title, &bulk_artist, &bulk_album))
                    .collect();
                edited.push((job.source_url().to_string(), tracks));
            }
        }
        EditMode::Individual => {
            for job in jobs {
                let mut tracks = Vec::with_capacity(job.len());
                for track in job.tracks() {
                    let track = preset(track);
                    println!("\n{}", track.span().title().green().bold());
                    let Some(filename) = prompt::text("Filename:", track.destination_base_name())? else {
                        return Ok(None);
                    };
                    let Some(title) = prompt::text("Title:", track.effective_title())? else {
                        return Ok(None);
                    };
                    let Some(track_artist) = prompt::text("Artist:", track.artist())? else {
                        return Ok(None);
                    };
                    let Some(track_album) = prompt::text("Album:", track.album())? else {
                        return Ok(None);
                    };
                    tracks.push(
                        track
                            .with_filename(&filename)
                            .with_metadata(&title, &track_artist, &track_album),
                    );
                }
                edited.push((job.source_url().to_string(), tracks));
            }
        }
    }

    // Edited names may collide again; keep destinations distinct.
    let mut names = UniqueNames::new();
    let mut result = Vec::with_capacity(edited.len());
    for (url, tracks) in edited {
        let tracks = tracks
            .into_iter()
            .map(|t| {
                let base = names.claim(t.destination_base_name());
                t.with_filename(&base)
            })
            .collect();
        result.push(DownloadJob::new(url, tracks)?);
    }
    Ok(Some(result))
}

/// Cancel `token` on Ctrl-C until the returned guard token is cancelled.
fn cancel_on_ctrl_c(token: CancellationToken) -> CancellationToken {
    let done = CancellationToken::new();
    let watcher = done.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = watcher.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("Received Ctrl+C, cancelling");
                    eprintln!("\n{}", "Cancelling... waiting for running tasks to finish.".yellow());
                    token.cancel();
                }
            }
        }
    });
    done
}

fn report_exit<T>(report: &BatchReport<T>) -> Result<()> {
    if report.summary.failed > 0 {
        bail!("{} of {} items failed", report.summary.failed, report.summary.total);
    }
    Ok(())
}
