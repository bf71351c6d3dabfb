//! Terminal rendering: progress bars fed by pipeline events, and tables.

use std::time::Duration;

use chapsplit::domain::{BatchReport, ChapterSpan, LoudnessStats, MediaFileInfo, PlaylistEntry};
use chapsplit::pipeline::{Phase, PipelineEvent, Severity};
use chapsplit::utils::format::{format_duration, format_lufs};
use colored::*;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// A spinner for short blocking steps such as metadata lookup.
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["▹▹▹▹▹", "▸▹▹▹▹", "▹▸▹▹▹", "▹▹▸▹▹", "▹▹▹▸▹", "▹▹▹▹▸", "▪▪▪▪▪"]),
    );
    pb.set_message(message.to_string());
    pb
}

/// Draws pipeline events on its own task.
///
/// The pipeline only ever posts to the channel; this side keeps up as best
/// it can and skips what it missed.
pub struct ProgressRenderer {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

impl ProgressRenderer {
    pub fn spawn(mut events: broadcast::Receiver<PipelineEvent>, quiet: bool) -> Self {
        let stop = CancellationToken::new();
        let stop_signal = stop.clone();

        let handle = tokio::spawn(async move {
            let pb = ProgressBar::new(0);
            if quiet {
                pb.set_draw_target(ProgressDrawTarget::hidden());
            }
            pb.set_style(bar_style());

            loop {
                let event = tokio::select! {
                    biased;
                    event = events.recv() => event,
                    _ = stop_signal.cancelled() => break,
                };
                match event {
                    Ok(event) => draw(&pb, event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Progress renderer lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            // Whatever is still queued after the stop signal.
            while let Ok(event) = events.try_recv() {
                draw(&pb, event);
            }
            pb.finish_and_clear();
        });

        Self { handle, stop }
    }

    /// Drain pending events and remove the bar.
    pub async fn finish(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

fn draw(pb: &ProgressBar, event: PipelineEvent) {
    match event {
        PipelineEvent::Log {
            severity, message, ..
        } => {
            let line = match severity {
                Severity::Info => message.normal(),
                Severity::Success => message.green(),
                Severity::Warning => message.yellow(),
                Severity::Error => message.red(),
            };
            pb.println(line.to_string());
        }
        PipelineEvent::Progress { completed, total } => {
            pb.set_length(total as u64);
            pb.set_position(completed as u64);
        }
        PipelineEvent::Transfer { percent, speed, .. } => {
            let speed = speed.unwrap_or_else(|| "?".to_string());
            pb.set_message(format!("Downloading audio... {percent:.1}% ({speed})"));
        }
        PipelineEvent::JobStateChanged { state, .. } => {
            pb.set_message(state.as_str().to_lowercase());
        }
        PipelineEvent::JobFailed { .. } | PipelineEvent::TrackFinished(_) => {}
        PipelineEvent::FileMeasured { .. } => {
            pb.set_message(format!(
                "Measuring loudness... {}/{}",
                pb.position() + 1,
                pb.length().unwrap_or(0)
            ));
        }
        PipelineEvent::FileNormalized(outcome) => {
            pb.set_message(outcome.item.display_name().to_string());
        }
        PipelineEvent::Finished(_) => pb.set_message(Phase::Done.as_str()),
    }
}

pub fn print_chapters(chapters: &[ChapterSpan]) {
    println!("\n{}", "Chapters:".green().bold());
    for chapter in chapters {
        println!(
            "  {:>3}. {} {}",
            chapter.index() + 1,
            chapter.title().cyan(),
            format!("[{}]", chapter.duration_label()).dimmed()
        );
    }
}

pub fn print_entries(entries: &[PlaylistEntry]) {
    println!("\n{}", "Playlist entries:".green().bold());
    for entry in entries {
        let duration = entry.duration.map(format_duration).unwrap_or_else(|| "?".to_string());
        println!(
            "  {:>3}. {} {}",
            entry.index + 1,
            entry.title.cyan(),
            format!("[{duration}]").dimmed()
        );
    }
}

pub fn chapter_label(chapter: &ChapterSpan) -> String {
    format!("{} [{}]", chapter.title(), chapter.duration_label())
}

pub fn entry_label(entry: &PlaylistEntry) -> String {
    match entry.duration {
        Some(d) => format!("{} [{}]", entry.title, format_duration(d)),
        None => entry.title.clone(),
    }
}

/// `# | Filename | Size | Loudness`
pub fn print_file_table(files: &[MediaFileInfo]) {
    let name_width = files
        .iter()
        .map(|f| f.display_name().chars().count())
        .max()
        .unwrap_or(0)
        .max("Filename".len());

    println!(
        "\n{:>3} | {:<name_width$} | {:>9} | {:>10}",
        "#".bold(),
        "Filename".bold(),
        "Size".bold(),
        "Loudness".bold()
    );
    for (i, file) in files.iter().enumerate() {
        let loudness = match file.loudness_label() {
            Some(label) => label.normal(),
            None => "Error".red(),
        };
        println!(
            "{:>3} | {:<name_width$} | {:>9} | {:>10}",
            i + 1,
            file.display_name(),
            file.size_label(),
            loudness
        );
    }
}

pub fn print_stats(stats: Option<LoudnessStats>) {
    match stats {
        Some(stats) => println!(
            "\n{}",
            format!("Average: {:.1} LUFS  |  Median: {:.1} LUFS", stats.mean, stats.median).bold()
        ),
        None => println!("\n{}", "No file could be measured.".yellow()),
    }
}

/// Final success/failure counts and the failures themselves.
pub fn print_summary<T>(report: &BatchReport<T>) {
    let summary = report.summary;
    println!();
    for failure in report.failures() {
        if let Some(message) = &failure.error_message {
            println!("  {} {}", "✗".red(), message);
        }
    }

    let mut line = format!(
        "{} succeeded, {} failed",
        summary.succeeded.to_string().green(),
        summary.failed.to_string().red()
    );
    if summary.incomplete() > 0 {
        line.push_str(&format!(", {} not processed", summary.incomplete().to_string().yellow()));
    }
    if summary.cancelled {
        println!("{} {}", "Cancelled:".yellow().bold(), line);
    } else if summary.all_succeeded() {
        println!("{} {}", "✓".green().bold(), line);
    } else {
        println!("{} {}", "Finished:".bold(), line);
    }
}

pub fn print_target(target_lufs: f64) {
    println!("{} {}", "Target:".green(), format_lufs(target_lufs).cyan());
}
