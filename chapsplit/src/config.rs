//! File-backed application configuration.
//!
//! Loaded from TOML (`--config PATH`, else `<config dir>/chapsplit/config.toml`),
//! then overridden from the environment, then validated. A missing file is
//! not an error: the defaults apply.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pipeline_common::default_concurrency;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::TargetLoudness;
use crate::domain::loudness::{DEFAULT_TARGET_LUFS, MAX_TARGET_LUFS, MIN_TARGET_LUFS};
use crate::{Error, Result};

pub const FFMPEG_PATH_ENV: &str = "FFMPEG_PATH";
pub const YTDLP_PATH_ENV: &str = "YTDLP_PATH";
pub const OUTPUT_DIR_ENV: &str = "CHAPSPLIT_OUTPUT_DIR";

const CONFIG_DIR_NAME: &str = "chapsplit";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// ffmpeg executable (name on PATH or absolute path).
    pub ffmpeg_path: String,
    /// yt-dlp executable.
    pub ytdlp_path: String,
    /// Where extracted tracks are written.
    pub output_dir: PathBuf,
    /// Worker pool size; `min(cores, 8)` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    pub default_target_lufs: f64,
    pub extract_timeout_secs: u64,
    pub measure_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Minimum spacing of download progress events.
    pub progress_interval_ms: u64,
    /// Capacity of the progress event channel.
    pub event_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            output_dir: PathBuf::from("output"),
            max_workers: None,
            default_target_lufs: DEFAULT_TARGET_LUFS,
            extract_timeout_secs: 300,
            measure_timeout_secs: 120,
            fetch_timeout_secs: 3600,
            progress_interval_ms: 500,
            event_capacity: 1024,
            log_filter: None,
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// `<config dir>/chapsplit/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    fn resolve_path(path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(p.to_path_buf()),
            None => Self::default_path()
                .ok_or_else(|| Error::config("Could not determine a configuration directory")),
        }
    }

    /// Load, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(path)?;

        let mut config = if path.is_file() {
            debug!(path = %path.display(), "Loading configuration");
            let content = std::fs::read_to_string(&path)?;
            Self::from_toml(&content)?
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Invalid configuration: {e}")))
    }

    /// Write this configuration as TOML, creating parent directories.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = Self::resolve_path(path)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.show()?)?;
        Ok(path)
    }

    /// Overwrite the configuration file with defaults.
    pub fn reset(path: Option<&Path>) -> Result<PathBuf> {
        Self::default().save(path)
    }

    /// The effective configuration as TOML.
    pub fn show(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize configuration: {e}")))
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; blank values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(ffmpeg) = get(FFMPEG_PATH_ENV) {
            self.ffmpeg_path = ffmpeg;
        }
        if let Some(ytdlp) = get(YTDLP_PATH_ENV) {
            self.ytdlp_path = ytdlp;
        }
        if let Some(output) = get(OUTPUT_DIR_ENV) {
            self.output_dir = PathBuf::from(output);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == Some(0) {
            return Err(Error::config("max_workers must be at least 1"));
        }
        if self.extract_timeout_secs == 0
            || self.measure_timeout_secs == 0
            || self.fetch_timeout_secs == 0
        {
            return Err(Error::config("timeouts must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(Error::config("event_capacity must be at least 1"));
        }
        if !self.default_target_lufs.is_finite()
            || !(MIN_TARGET_LUFS..=MAX_TARGET_LUFS).contains(&self.default_target_lufs)
        {
            return Err(Error::config(format!(
                "default_target_lufs must be between {MIN_TARGET_LUFS:.1} and {MAX_TARGET_LUFS:.1}"
            )));
        }
        if self.ffmpeg_path.trim().is_empty() || self.ytdlp_path.trim().is_empty() {
            return Err(Error::config("tool paths must not be empty"));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(default_concurrency).max(1)
    }

    pub fn default_target(&self) -> Result<TargetLoudness> {
        TargetLoudness::new(self.default_target_lufs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn measure_timeout(&self) -> Duration {
        Duration::from_secs(self.measure_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
