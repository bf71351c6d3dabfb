//! ffmpeg-backed implementation of the Media Transform Gateway.
//!
//! Extraction and normalization re-encode to MP3 with libmp3lame (VBR
//! quality 2). Loudness is measured with the `loudnorm` filter in analysis
//! mode, which reports its result as a JSON block on stderr.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use process_utils::{CapturedOutput, run_captured, tokio_command};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::MediaGateway;
use super::tags;
use crate::config::AppConfig;
use crate::domain::{TargetLoudness, TrackTags};
use crate::{Error, Result};

const TOOL_NAME: &str = "ffmpeg";

/// Default hard timeout for extraction and normalization.
pub const DEFAULT_TRANSCODE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default hard timeout for loudness measurement.
pub const DEFAULT_MEASURE_TIMEOUT: Duration = Duration::from_secs(120);

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Lines of stderr kept in error messages.
const DIAGNOSTIC_LINES: usize = 5;

/// The flat JSON object `loudnorm=print_format=json` prints.
static LOUDNORM_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{[^{}]*"input_i"[^{}]*\}"#).unwrap());

/// Loudness analysis reported by the `loudnorm` filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoudnormReport {
    /// Integrated loudness in LUFS.
    pub input_i: f64,
    pub input_tp: Option<f64>,
    pub input_lra: Option<f64>,
    pub input_thresh: Option<f64>,
}

/// Locate and parse the loudnorm JSON block in ffmpeg's stderr.
///
/// ffmpeg writes diagnostics to stderr whether or not it succeeds, so the
/// presence of a well-formed block is what counts as success. Values may be
/// JSON strings (`"-23.45"`) or numbers. A non-finite integrated loudness
/// (`-inf` for digital silence) is rejected.
pub fn parse_loudnorm(stderr: &str) -> std::result::Result<LoudnormReport, String> {
    let block = LOUDNORM_JSON
        .find(stderr)
        .ok_or_else(|| "no loudness data in ffmpeg output".to_string())?;

    let value: Value = serde_json::from_str(block.as_str())
        .map_err(|e| format!("malformed loudness data: {e}"))?;
    let field = |name: &str| value.get(name).and_then(json_number);

    let input_i = field("input_i")
        .ok_or_else(|| "input_i is missing or not a number".to_string())?;
    if !input_i.is_finite() {
        return Err(format!(
            "integrated loudness is {input_i} (silent or too short to measure)"
        ));
    }

    Ok(LoudnormReport {
        input_i,
        input_tp: field("input_tp"),
        input_lra: field("input_lra"),
        input_thresh: field("input_thresh"),
    })
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn seconds_arg(seconds: f64) -> String {
    format!("{seconds:.3}")
}

/// Build arguments for extracting `[start_time, end_time)` of `source`.
///
/// `start_time = 0, end_time <= 0` is a whole-file re-encode: no `-ss`/`-t`.
/// A positive start with no usable end trims only the head.
pub fn extract_args(source: &Path, start_time: f64, end_time: f64, destination: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
    ];
    args.extend(["-loglevel".to_string(), "error".to_string()]);

    let whole_file = start_time == 0.0 && end_time <= 0.0;

    if !whole_file && start_time > 0.0 {
        args.extend(["-ss".to_string(), seconds_arg(start_time)]);
    }

    args.extend(["-i".to_string(), source.to_string_lossy().into_owned()]);

    if !whole_file && end_time > start_time {
        args.extend(["-t".to_string(), seconds_arg(end_time - start_time)]);
    }

    // Audio only
    args.push("-vn".to_string());
    args.extend(["-codec:a".to_string(), "libmp3lame".to_string()]);
    args.extend(["-q:a".to_string(), "2".to_string()]);

    args.push(destination.to_string_lossy().into_owned());
    args
}

/// Build arguments for a loudnorm analysis pass.
pub fn measure_args(path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-nostats".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
        "-af".to_string(),
        "loudnorm=print_format=json".to_string(),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]
}

/// Build arguments for re-encoding `source` to `target` into `output`.
pub fn normalize_args(source: &Path, target: TargetLoudness, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
    ];
    args.extend(["-loglevel".to_string(), "error".to_string()]);
    args.extend(["-i".to_string(), source.to_string_lossy().into_owned()]);
    args.extend([
        "-af".to_string(),
        format!("loudnorm=I={:.1}:LRA=11:TP=-1.5", target.lufs()),
    ]);
    args.extend(["-codec:a".to_string(), "libmp3lame".to_string()]);
    args.extend(["-q:a".to_string(), "2".to_string()]);
    args.push(output.to_string_lossy().into_owned());
    args
}

/// Media Transform Gateway over the ffmpeg executable and lofty.
#[derive(Debug, Clone)]
pub struct FfmpegGateway {
    /// Path to ffmpeg binary.
    ffmpeg_path: String,
    transcode_timeout: Duration,
    measure_timeout: Duration,
}

impl FfmpegGateway {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            transcode_timeout: DEFAULT_TRANSCODE_TIMEOUT,
            measure_timeout: DEFAULT_MEASURE_TIMEOUT,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.ffmpeg_path.clone())
            .with_timeouts(config.extract_timeout(), config.measure_timeout())
    }

    pub fn with_timeouts(mut self, transcode: Duration, measure: Duration) -> Self {
        self.transcode_timeout = transcode;
        self.measure_timeout = measure;
        self
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }

    /// Verify ffmpeg can be launched. Returns its version banner line.
    pub async fn check_available(&self) -> Result<String> {
        let mut cmd = tokio_command(&self.ffmpeg_path);
        cmd.arg("-version");
        let output = run_captured(&mut cmd, VERSION_CHECK_TIMEOUT).await?;

        if !output.success() {
            return Err(Error::external_tool(
                TOOL_NAME,
                format!("`{} -version` exited with {}", self.ffmpeg_path, output.status),
            ));
        }

        Ok(output.stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    /// Run ffmpeg; spawn failures and timeouts become `ExternalTool` errors.
    async fn run(&self, args: &[String], timeout: Duration) -> Result<CapturedOutput> {
        let mut cmd = tokio_command(&self.ffmpeg_path);
        cmd.args(args);
        debug!(ffmpeg = %self.ffmpeg_path, ?args, "Running ffmpeg");

        run_captured(&mut cmd, timeout)
            .await
            .map_err(|e| Error::external_tool(TOOL_NAME, e.to_string()))
    }

    fn failure(output: &CapturedOutput) -> Error {
        let tail = output.stderr_tail(DIAGNOSTIC_LINES);
        let message = if tail.is_empty() {
            format!("exited with {}", output.status)
        } else {
            tail
        };
        Error::external_tool(TOOL_NAME, message)
    }
}

#[async_trait]
impl MediaGateway for FfmpegGateway {
    async fn extract_range(
        &self,
        source: &Path,
        start_time: f64,
        end_time: f64,
        destination: &Path,
    ) -> Result<PathBuf> {
        let args = extract_args(source, start_time, end_time, destination);
        let output = self.run(&args, self.transcode_timeout).await;

        let failure = match output {
            Ok(output) if output.success() => {
                debug!(
                    destination = %destination.display(),
                    elapsed_ms = output.duration.as_millis() as u64,
                    "Range extracted"
                );
                return Ok(destination.to_path_buf());
            }
            Ok(output) => Self::failure(&output),
            Err(e) => e,
        };

        // Nothing half-written is left behind under the final name.
        if let Err(e) = tokio::fs::remove_file(destination).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %destination.display(), error = %e, "Failed to remove partial output");
        }
        Err(failure)
    }

    async fn apply_tags(&self, path: &Path, tags: &TrackTags) -> Result<()> {
        tags::apply_tags(path, tags).await
    }

    async fn measure_loudness(&self, path: &Path) -> Result<f64> {
        let output = self
            .run(&measure_args(path), self.measure_timeout)
            .await
            .map_err(|e| Error::loudness(path, e.to_string()))?;

        match parse_loudnorm(&output.stderr) {
            Ok(report) => {
                debug!(path = %path.display(), lufs = report.input_i, "Loudness measured");
                Ok(report.input_i)
            }
            Err(reason) => {
                let tail = output.stderr_tail(2);
                let message = if tail.is_empty() {
                    reason
                } else {
                    format!("{reason}: {tail}")
                };
                Err(Error::loudness(path, message))
            }
        }
    }

    async fn normalize_loudness(&self, path: &Path, target: TargetLoudness) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let suffix = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_else(|| ".mp3".to_string());

        let permissions = tokio::fs::metadata(path).await?.permissions();

        // The temp file is deleted on drop unless it is persisted below.
        let temp = tempfile::Builder::new()
            .prefix(".chapsplit-norm-")
            .suffix(&suffix)
            .tempfile_in(dir)?;
        temp.as_file().set_permissions(permissions)?;
        let temp_path = temp.into_temp_path();

        let args = normalize_args(path, target, &temp_path);
        let output = self.run(&args, self.transcode_timeout).await?;
        if !output.success() {
            return Err(Self::failure(&output));
        }

        temp_path.persist(path).map_err(|e| Error::Io(e.error))?;

        info!(path = %path.display(), target = %target, "Normalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_args_trim() {
        let args = extract_args(Path::new("/tmp/src.webm"), 30.0, 90.0, Path::new("/out/a.mp3"));

        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        let t = args.iter().position(|a| a == "-t").unwrap();

        assert_eq!(args[ss + 1], "30.000");
        assert_eq!(args[t + 1], "60.000");
        // Input seeking: -ss goes before -i, -t after it
        assert!(ss < input && input < t);
        assert_eq!(args.last().map(String::as_str), Some("/out/a.mp3"));
        assert!(args.contains(&"libmp3lame".to_string()));
    }

    #[test]
    fn test_extract_args_whole_file_has_no_trim() {
        let args = extract_args(Path::new("/tmp/src.webm"), 0.0, 0.0, Path::new("/out/a.mp3"));
        assert!(!args.contains(&"-ss".to_string()));
        assert!(!args.contains(&"-t".to_string()));
        assert!(args.contains(&"/tmp/src.webm".to_string()));
    }

    #[test]
    fn test_extract_args_from_zero_keeps_duration() {
        let args = extract_args(Path::new("/s.m4a"), 0.0, 45.5, Path::new("/o.mp3"));
        assert!(!args.contains(&"-ss".to_string()));
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "45.500");
    }

    #[test]
    fn test_normalize_args() {
        let target = TargetLoudness::new(-16.0).unwrap();
        let args = normalize_args(Path::new("/m/a.mp3"), target, Path::new("/m/.tmp.mp3"));
        assert!(args.contains(&"loudnorm=I=-16.0:LRA=11:TP=-1.5".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/m/.tmp.mp3"));
    }

    #[test]
    fn test_measure_args() {
        let args = measure_args(Path::new("/m/a.mp3"));
        assert!(args.contains(&"loudnorm=print_format=json".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    const LOUDNORM_STDERR: &str = r#"Input #0, mp3, from 'a.mp3':
  Duration: 00:03:12.04, start: 0.025057, bitrate: 190 kb/s
[Parsed_loudnorm_0 @ 0x5581c6f0]
{
	"input_i" : "-23.45",
	"input_tp" : "-3.10",
	"input_lra" : "5.20",
	"input_thresh" : "-33.80",
	"output_i" : "-24.01",
	"normalization_type" : "dynamic",
	"target_offset" : "0.01"
}
"#;

    #[test]
    fn test_parse_loudnorm_block() {
        let report = parse_loudnorm(LOUDNORM_STDERR).unwrap();
        assert_eq!(report.input_i, -23.45);
        assert_eq!(report.input_tp, Some(-3.10));
        assert_eq!(report.input_thresh, Some(-33.80));
    }

    #[test]
    fn test_parse_loudnorm_numeric_values() {
        let report = parse_loudnorm(r#"noise {"input_i": -14.2} trailing"#).unwrap();
        assert_eq!(report.input_i, -14.2);
        assert_eq!(report.input_lra, None);
    }

    #[test]
    fn test_parse_loudnorm_failures() {
        assert!(parse_loudnorm("a.mp3: Invalid data found when processing input").is_err());
        assert!(parse_loudnorm(r#"{"input_i" : "loud"}"#).is_err());
        assert!(parse_loudnorm(r#"{"input_i" : }"#).is_err());

        let silent = parse_loudnorm(r#"{"input_i" : "-inf", "input_tp" : "-inf"}"#).unwrap_err();
        assert!(silent.contains("silent"));
    }

    #[cfg(unix)]
    mod with_fake_ffmpeg {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Writes every argument, one per line, into the output file.
        const ECHO_ARGS: &str = r#"for last; do :; done
printf '%s\n' "$@" > "$last""#;

        /// Leaves a partial output behind and fails.
        const CRASH: &str = r#"for last; do :; done
printf 'partial' > "$last"
echo 'Conversion failed: simulated crash' >&2
exit 1"#;

        const NORMALIZE_OK: &str = r#"for last; do :; done
printf 'normalized' > "$last""#;

        const MEASURE_OK: &str = r#"cat >&2 <<'JSON'
[Parsed_loudnorm_0 @ 0x55]
{
	"input_i" : "-23.45",
	"input_tp" : "-3.10"
}
JSON"#;

        fn fake_ffmpeg(dir: &TempDir, body: &str) -> FfmpegGateway {
            let path = dir.path().join("fake-ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            FfmpegGateway::new(path.to_string_lossy().into_owned())
        }

        fn dir_entries(dir: &Path) -> Vec<String> {
            let mut names: Vec<String> = std::fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }

        #[tokio::test]
        async fn test_extract_range_passes_trim_window() {
            let tools = TempDir::new().unwrap();
            let work = TempDir::new().unwrap();
            let gateway = fake_ffmpeg(&tools, ECHO_ARGS);
            let dest = work.path().join("Intro.mp3");

            let produced = gateway
                .extract_range(Path::new("/src/a.webm"), 30.0, 90.0, &dest)
                .await
                .unwrap();

            assert_eq!(produced, dest);
            let args = std::fs::read_to_string(&dest).unwrap();
            let lines: Vec<&str> = args.lines().collect();
            assert!(lines.windows(2).any(|w| w == ["-ss", "30.000"]));
            assert!(lines.windows(2).any(|w| w == ["-t", "60.000"]));
        }

        #[tokio::test]
        async fn test_extract_failure_reports_diagnostics_and_cleans_up() {
            let tools = TempDir::new().unwrap();
            let work = TempDir::new().unwrap();
            let gateway = fake_ffmpeg(&tools, CRASH);
            let dest = work.path().join("Intro.mp3");

            let err = gateway
                .extract_range(Path::new("/src/a.webm"), 0.0, 10.0, &dest)
                .await
                .unwrap_err();

            match &err {
                Error::ExternalTool { tool, message } => {
                    assert_eq!(tool, "ffmpeg");
                    assert!(message.contains("simulated crash"));
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert!(!dest.exists());
        }

        #[tokio::test]
        async fn test_extract_timeout_is_external_tool_error() {
            let tools = TempDir::new().unwrap();
            let work = TempDir::new().unwrap();
            let gateway = fake_ffmpeg(&tools, "sleep 5")
                .with_timeouts(Duration::from_millis(100), Duration::from_millis(100));

            let err = gateway
                .extract_range(Path::new("/src/a.webm"), 0.0, 10.0, &work.path().join("a.mp3"))
                .await
                .unwrap_err();

            assert!(matches!(err, Error::ExternalTool { .. }));
            assert!(err.to_string().contains("did not finish"));
        }

        #[tokio::test]
        async fn test_measure_loudness_reads_stderr_block() {
            let tools = TempDir::new().unwrap();
            let gateway = fake_ffmpeg(&tools, MEASURE_OK);

            let lufs = gateway.measure_loudness(Path::new("/m/a.mp3")).await.unwrap();
            assert_eq!(lufs, -23.45);
        }

        #[tokio::test]
        async fn test_measure_loudness_without_block_fails() {
            let tools = TempDir::new().unwrap();
            let gateway = fake_ffmpeg(&tools, "echo 'moov atom not found' >&2; exit 1");

            let err = gateway.measure_loudness(Path::new("/m/b.mp3")).await.unwrap_err();
            assert!(matches!(err, Error::LoudnessMeasurement { .. }));
            assert!(err.to_string().contains("b.mp3"));
        }

        #[tokio::test]
        async fn test_failed_normalization_leaves_original_untouched() {
            let tools = TempDir::new().unwrap();
            let music = TempDir::new().unwrap();
            let gateway = fake_ffmpeg(&tools, CRASH);
            let song = music.path().join("song.mp3");
            std::fs::write(&song, b"original bytes").unwrap();

            let err = gateway
                .normalize_loudness(&song, TargetLoudness::default())
                .await
                .unwrap_err();

            assert!(matches!(err, Error::ExternalTool { .. }));
            assert_eq!(std::fs::read(&song).unwrap(), b"original bytes");
            assert_eq!(dir_entries(music.path()), vec!["song.mp3".to_string()]);
        }

        #[tokio::test]
        async fn test_normalization_replaces_file_and_keeps_permissions() {
            let tools = TempDir::new().unwrap();
            let music = TempDir::new().unwrap();
            let gateway = fake_ffmpeg(&tools, NORMALIZE_OK);
            let song = music.path().join("song.mp3");
            std::fs::write(&song, b"original bytes").unwrap();
            std::fs::set_permissions(&song, std::fs::Permissions::from_mode(0o640)).unwrap();

            gateway
                .normalize_loudness(&song, TargetLoudness::new(-14.0).unwrap())
                .await
                .unwrap();

            assert_eq!(std::fs::read(&song).unwrap(), b"normalized");
            let mode = std::fs::metadata(&song).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o640);
            assert_eq!(dir_entries(music.path()), vec!["song.mp3".to_string()]);
        }

        #[tokio::test]
        async fn test_check_available_reports_missing_tool() {
            let gateway = FfmpegGateway::new("/nonexistent/ffmpeg-for-tests");
            let err = gateway.check_available().await.unwrap_err();
            assert!(matches!(err, Error::Process(_)));
        }

        #[tokio::test]
        async fn test_check_available_returns_banner() {
            let tools = TempDir::new().unwrap();
            let gateway = fake_ffmpeg(&tools, "echo 'ffmpeg version 7.1 Copyright (c)'");
            let banner = gateway.check_available().await.unwrap();
            assert!(banner.starts_with("ffmpeg version 7.1"));
        }
    }
}
