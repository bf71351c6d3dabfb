//! Small process-related helpers shared across the workspace.
//!
//! Every external tool the pipeline drives (ffmpeg, yt-dlp) goes through
//! [`run_captured`] or [`run_streaming`], so all of them share the same
//! hard wall-clock timeout, kill-on-drop behaviour and error shape.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Errors raised while launching or supervising a child process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed while waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.no_window();
    cmd
}

/// Which pipe a streamed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Result of a finished child process with its decoded output.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The last `max_lines` non-empty stderr lines, for short diagnostics.
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

fn program_name(command: &Command) -> String {
    command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned()
}

/// Run a command to completion, capturing stdout and stderr.
///
/// The child is killed if `timeout` elapses first. A non-zero exit status is
/// not an error here; callers decide what the status means for their tool.
pub async fn run_captured(
    command: &mut Command,
    timeout: Duration,
) -> Result<CapturedOutput, ProcessError> {
    let program = program_name(command);
    let start = Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?,
        Err(_) => {
            warn!(program = %program, timeout_secs = timeout.as_secs(), "Process timed out, killed");
            return Err(ProcessError::Timeout { program, timeout });
        }
    };

    let duration = start.elapsed();
    debug!(
        program = %program,
        status = %output.status,
        elapsed_ms = duration.as_millis() as u64,
        "Process finished"
    );

    Ok(CapturedOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration,
    })
}

/// Run a command while handing every output line to `on_line` as it arrives.
///
/// Both pipes are still collected into the returned [`CapturedOutput`].
pub async fn run_streaming<F>(
    command: &mut Command,
    timeout: Duration,
    mut on_line: F,
) -> Result<CapturedOutput, ProcessError>
where
    F: FnMut(OutputStream, &str) + Send,
{
    let program = program_name(command);
    let start = Instant::now();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    let (tx, mut rx) = mpsc::unbounded_channel::<(OutputStream, String)>();

    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx.send((OutputStream::Stdout, line));
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx.send((OutputStream::Stderr, line));
            }
        });
    }

    // Readers hold the remaining senders; the channel closes once both pipes hit EOF.
    drop(tx);

    let mut stdout = String::new();
    let mut stderr = String::new();

    let supervised = async {
        while let Some((stream, line)) = rx.recv().await {
            on_line(stream, &line);
            let buffer = match stream {
                OutputStream::Stdout => &mut stdout,
                OutputStream::Stderr => &mut stderr,
            };
            buffer.push_str(&line);
            buffer.push('\n');
        }
        child.wait().await
    };

    let status = match tokio::time::timeout(timeout, supervised).await {
        Ok(result) => result.map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?,
        Err(_) => {
            warn!(program = %program, timeout_secs = timeout.as_secs(), "Process timed out, killing");
            let _ = child.start_kill();
            return Err(ProcessError::Timeout { program, timeout });
        }
    };

    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = tokio_command("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_run_captured_collects_both_pipes() {
        let output = run_captured(&mut sh("echo out; echo err 1>&2"), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_captured_reports_exit_status() {
        let output = run_captured(&mut sh("echo boom 1>&2; exit 3"), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr_tail(5), "boom");
    }

    #[tokio::test]
    async fn test_run_captured_times_out() {
        let err = run_captured(&mut sh("sleep 5"), Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Timeout { ref program, .. } if program == "sh"));
    }

    #[tokio::test]
    async fn test_spawn_failure_names_program() {
        let mut cmd = tokio_command("/nonexistent/definitely-not-a-tool");
        let err = run_captured(&mut cmd, Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.to_string().contains("definitely-not-a-tool"));
    }

    #[tokio::test]
    async fn test_run_streaming_delivers_lines_in_order() {
        let mut seen = Vec::new();
        let output = run_streaming(
            &mut sh("echo one; echo two; echo three"),
            Duration::from_secs(5),
            |stream, line| {
                if stream == OutputStream::Stdout {
                    seen.push(line.to_string());
                }
            },
        )
        .await
        .unwrap();

        assert!(output.success());
        assert_eq!(seen, vec!["one", "two", "three"]);
        assert_eq!(output.stdout, "one\ntwo\nthree\n");
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let output = CapturedOutput {
            status: std::process::Command::new("true").status().unwrap(),
            stdout: String::new(),
            stderr: "a\n\nb\nc\n".to_string(),
            duration: Duration::ZERO,
        };
        assert_eq!(output.stderr_tail(2), "b\nc");
    }
}
