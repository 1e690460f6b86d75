//! Supervised subprocess execution with streaming output

use super::sink::{LogLine, LogSink};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Substring marking a diagnostic line, matched case-insensitively
const ERROR_MARKER: &str = "error";

/// Environment variables layered onto the inherited environment of one
/// spawned command. The service's own environment is never modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: Vec<(String, String)>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable; a later value for the same key wins
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((key.into(), value.into()));
        self
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn apply(&self, cmd: &mut Command) {
        for (key, value) in &self.vars {
            cmd.env(key, value);
        }
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, Default)]
pub struct ExitReport {
    pub success: bool,
    /// None when terminated by a signal
    pub code: Option<i32>,
    /// Captured stderr, newline-joined
    pub stderr: String,
    /// Lines from either stream containing the error marker
    pub error_lines: Vec<String>,
}

impl ExitReport {
    /// Error text for a failed run: stderr, or a generic exit-code message
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.code {
            Some(code) => format!("failed with code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

async fn pump<R>(reader: R, sink: &dyn LogSink, to_line: fn(String) -> LogLine) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut seen = Vec::new();

    // Undecodable bytes are replaced so the pipe is always drained to EOF
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                seen.push(line.clone());
                sink.line(to_line(line));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read process output");
                break;
            }
        }
    }

    seen
}

fn is_error_line(line: &str) -> bool {
    line.to_ascii_lowercase().contains(ERROR_MARKER)
}

/// Spawn `program args` in `cwd` and stream both output streams to `sink`
/// line by line until the process exits.
///
/// Returns Err only when the process could not be spawned.
pub async fn run_streaming(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &EnvOverlay,
    sink: &dyn LogSink,
) -> std::io::Result<ExitReport> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    env.apply(&mut cmd);

    let mut child = cmd.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr not captured"))?;

    let (out_lines, err_lines, status) = tokio::join!(
        pump(stdout, sink, |l| LogLine::stdout(l)),
        pump(stderr, sink, |l| LogLine::stderr(l)),
        child.wait()
    );
    let status = status?;

    let error_lines = out_lines
        .iter()
        .chain(err_lines.iter())
        .filter(|l| is_error_line(l))
        .cloned()
        .collect();

    Ok(ExitReport {
        success: status.success(),
        code: status.code(),
        stderr: err_lines.join("\n"),
        error_lines,
    })
}
