mod commands;
mod prompt;
mod render;

use std::path::PathBuf;

use chapsplit::config::AppConfig;
use chapsplit::domain::TargetLoudness;
use clap::{Parser, Subcommand};

pub use commands::{CommandExecutor, ExtractOptions, NormalizeOptions};

#[derive(Parser, Debug)]
#[command(
    name = "chapsplit",
    author,
    version,
    about = "Split YouTube chapters into tagged MP3 tracks and normalize loudness",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CHAPSPLIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write daily log files to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Directory for extracted tracks
    #[arg(short, long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Maximum parallel ffmpeg workers
    #[arg(short, long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,
}

impl Args {
    /// Apply per-run flag overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(jobs) = self.jobs {
            config.max_workers = Some(usize::from(jobs));
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract chapters (or playlist entries) from a YouTube URL into MP3 tracks
    Extract {
        /// Video or playlist URL
        url: Option<String>,

        /// Select every chapter or entry without asking
        #[arg(long)]
        all: bool,

        /// Accept all defaults without prompting
        #[arg(short, long)]
        yes: bool,

        /// Artist tag for every track
        #[arg(long)]
        artist: Option<String>,

        /// Album tag for every track
        #[arg(long)]
        album: Option<String>,

        /// Normalize the extracted tracks to this loudness (LUFS)
        #[arg(long, allow_negative_numbers = true, value_parser = parse_target)]
        target_lufs: Option<TargetLoudness>,
    },

    /// Measure and normalize the loudness of every MP3 in a directory
    Normalize {
        /// Directory containing MP3 files
        dir: Option<PathBuf>,

        /// Target loudness (LUFS)
        #[arg(long, allow_negative_numbers = true, value_parser = parse_target)]
        target_lufs: Option<TargetLoudness>,

        /// Only measure and print the loudness table
        #[arg(long)]
        measure_only: bool,

        /// Normalize without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Reset configuration to defaults
        #[arg(long, conflicts_with = "show")]
        reset: bool,
    },
}

fn parse_target(input: &str) -> Result<TargetLoudness, String> {
    TargetLoudness::parse(input).map_err(|e| match e {
        chapsplit::Error::Validation(message) => message,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_extract_flags() {
        let args = Args::try_parse_from([
            "chapsplit",
            "extract",
            "https://youtu.be/abc",
            "--all",
            "--artist",
            "Band",
            "--target-lufs",
            "-16",
            "-j",
            "2",
        ])
        .unwrap();

        let Some(Commands::Extract { url, all, artist, target_lufs, .. }) = args.command else {
            panic!("expected extract");
        };
        assert_eq!(url.as_deref(), Some("https://youtu.be/abc"));
        assert!(all);
        assert_eq!(artist.as_deref(), Some("Band"));
        assert_eq!(target_lufs.map(|t| t.lufs()), Some(-16.0));
        assert_eq!(args.jobs, Some(2));
    }

    #[test]
    fn test_target_out_of_range_is_rejected() {
        let err = Args::try_parse_from(["chapsplit", "normalize", "music", "--target-lufs", "-80"])
            .unwrap_err();
        assert!(err.to_string().contains("Target must be between -70.0 and 0.0 LUFS."));
    }

    #[test]
    fn test_zero_jobs_is_rejected() {
        assert!(Args::try_parse_from(["chapsplit", "-j", "0"]).is_err());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = Args::try_parse_from(["chapsplit", "-o", "/tmp/out", "-j", "3"]).unwrap();
        let mut config = AppConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.worker_count(), 3);
    }
}
