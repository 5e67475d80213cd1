// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs the source registry against the local OS.
//!
//! Each source yields one [`CaptureResult`]. Failures are logged and recorded but
//! never stop the remaining sources; only a missing staging directory fails the
//! whole capture.

use crate::error::LogPullError;
use crate::sources::{OutputSink, Source, SourceRegistry};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, error, warn};

/// Longest stderr text kept in a [`CaptureResult`].
const STDERR_EXCERPT_LIMIT: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub source_id: String,
    /// `None` when the program never ran or was killed by a signal.
    pub exit_code: Option<i32>,
    pub succeeded: bool,
    pub stderr_excerpt: String,
}

impl CaptureResult {
    fn ok(source_id: &str, exit_code: Option<i32>) -> Self {
        Self {
            source_id: source_id.to_string(),
            exit_code,
            succeeded: true,
            stderr_excerpt: String::new(),
        }
    }

    fn failed(source_id: &str, exit_code: Option<i32>, stderr: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            exit_code,
            succeeded: false,
            stderr_excerpt: excerpt(stderr, STDERR_EXCERPT_LIMIT).to_string(),
        }
    }
}

/// Per-source results of one capture, in registry order.
#[derive(Debug, Clone, Default)]
pub struct CaptureReport {
    pub results: Vec<CaptureResult>,
}

impl CaptureReport {
    /// Outcome of the last source processed.
    ///
    /// This is the historical run-level flag: earlier failures are not reflected.
    pub fn last_succeeded(&self) -> bool {
        self.results.last().is_some_and(|result| result.succeeded)
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|result| result.succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaptureResult> {
        self.results.iter().filter(|result| !result.succeeded)
    }
}

pub struct CaptureExecutor {
    staging_dir: PathBuf,
}

impl CaptureExecutor {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    /// Produces one artifact per source inside the staging directory.
    pub async fn capture_all(
        &self,
        registry: &SourceRegistry,
    ) -> Result<CaptureReport, LogPullError> {
        match fs::metadata(&self.staging_dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(LogPullError::StagingUnavailable(self.staging_dir.clone())),
        }

        let mut report = CaptureReport::default();
        for source in registry.sources() {
            let result = match source {
                Source::FileCopy { path } => self.copy_file(path).await,
                Source::Command { id, argv, sink } => self.run_command(id, argv, *sink).await,
            };
            report.results.push(result);
        }

        debug!(
            "LOGPULL | Captured {} sources, {} failed",
            report.results.len(),
            report.failures().count()
        );
        Ok(report)
    }

    async fn copy_file(&self, path: &Path) -> CaptureResult {
        let source_id = path.to_string_lossy();
        let Some(name) = path.file_name() else {
            error!("LOGPULL | Cannot copy {source_id}: path has no file name");
            return CaptureResult::failed(&source_id, None, "");
        };
        debug!("LOGPULL | Gathering file: {source_id}");

        if !fs::try_exists(path).await.unwrap_or(false) {
            warn!("LOGPULL | File does not exist: {source_id}");
            return CaptureResult::failed(&source_id, None, "file does not exist");
        }

        // procfs reports a zero size, so read the content rather than relying on copy
        let copied = match fs::read(path).await {
            Ok(content) => fs::write(self.staging_dir.join(name), content).await,
            Err(e) => Err(e),
        };
        match copied {
            Ok(()) => CaptureResult::ok(&source_id, None),
            Err(e) => {
                error!("LOGPULL | Error copying file {source_id}: {e}");
                CaptureResult::failed(&source_id, None, &e.to_string())
            }
        }
    }

    async fn run_command(&self, id: &str, argv: &[String], sink: OutputSink) -> CaptureResult {
        let Some((program, args)) = argv.split_first() else {
            error!("LOGPULL | Command {id} has no program to run");
            return CaptureResult::failed(id, None, "");
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match sink {
            OutputSink::Stdout => command.stdout(Stdio::piped()),
            OutputSink::SelfWritten => command.stdout(Stdio::null()),
        };

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("LOGPULL | Failed to start {id} ({program}): {e}");
                return CaptureResult::failed(id, None, &e.to_string());
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let output_path = self.staging_dir.join(id);

        let (copied, stderr_text) = tokio::join!(
            async {
                match stdout {
                    Some(stdout) => write_lines(stdout, &output_path).await.map(Some),
                    None => Ok(None),
                }
            },
            read_to_string_lossy(stderr),
        );

        if let Err(e) = &copied {
            error!("LOGPULL | Error writing output of {id}: {e}");
            // stop the program rather than let it block on a pipe nobody reads
            if let Err(kill_err) = child.start_kill() {
                debug!("LOGPULL | Could not kill {id}: {kill_err}");
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                error!("LOGPULL | Error waiting for {id}: {e}");
                return CaptureResult::failed(id, None, &stderr_text);
            }
        };

        match copied {
            Ok(written) => {
                if let Some(bytes) = written {
                    debug!("LOGPULL | {id} wrote {bytes} bytes");
                }
            }
            Err(e) => {
                return CaptureResult::failed(id, status.code(), &e.to_string());
            }
        }

        if status.success() {
            CaptureResult::ok(id, status.code())
        } else {
            error!(
                "LOGPULL | {id} failed with exit code {:?}, errMsg: {}",
                status.code(),
                stderr_text.trim_end()
            );
            CaptureResult::failed(id, status.code(), &stderr_text)
        }
    }
}

/// Copies `stdout` into `output` one line at a time, normalising line endings to `\n`.
async fn write_lines(stdout: ChildStdout, output: &Path) -> io::Result<u64> {
    let file = fs::File::create(output).await?;
    let mut writer = BufWriter::new(file);
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    let mut written = 0u64;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        line.push(b'\n');
        writer.write_all(&line).await?;
        written += line.len() as u64;
    }

    writer.flush().await?;
    Ok(written)
}

async fn read_to_string_lossy<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        debug!("LOGPULL | Error reading stderr: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn excerpt(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
