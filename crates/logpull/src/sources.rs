// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The fixed catalogue of diagnostic sources captured by a log pull.
//!
//! A source is either a file copied verbatim (mostly `/proc` entries) or an external
//! command whose output lands in the staging directory. Every source produces at most
//! one file, named by [`Source::output_name`], and output names are unique within a
//! [`SourceRegistry`].

use crate::error::LogPullError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Files copied as-is into the staging directory.
pub const PROC_FILES: [&str; 6] = [
    "/proc/stat",
    "/proc/meminfo",
    "/proc/loadavg",
    "/proc/net/dev",
    "/proc/mtd",
    "/proc/sys/fs/file-nr",
];

/// Commands whose stdout is captured, keyed by output file name.
const STDOUT_COMMANDS: &[(&str, &[&str])] = &[
    ("uname_-a", &["uname", "-a"]),
    ("uptime", &["uptime"]),
    ("date", &["date"]),
    ("ps_-A", &["ps", "-A"]),
    ("free", &["free"]),
    ("dmesg", &["dmesg"]),
    ("lspci", &["lspci"]),
    ("ifconfig_-a", &["ifconfig", "-a"]),
    ("ip_a", &["ip", "a"]),
    ("ip_-d_link_show", &["ip", "-d", "link", "show"]),
    ("ip_neigh_show", &["ip", "neigh", "show"]),
    ("ip_address", &["ip", "address"]),
    ("lsmod", &["lsmod"]),
    ("mount", &["mount"]),
    ("top_-n_1_-b", &["top", "-n", "1", "-b"]),
    ("netstat_-nep", &["netstat", "-nep"]),
    ("netstat_-nlp", &["netstat", "-nlp"]),
    ("netstat_-atp", &["netstat", "-atp"]),
    ("lsof", &["lsof"]),
    // set-top box specific
    ("dumpsys", &["dumpsys"]),
    ("getprop", &["getprop"]),
    ("pm_list_packages", &["pm", "list", "packages"]),
];

pub const LOGCAT_ID: &str = "logcat";
const LOGCAT_BINARY: &str = "/system/bin/logcat";
/// Number of rotated logcat files kept.
pub const LOGCAT_ROTATIONS: u32 = 20;
/// Size of a single logcat rotation, in bytes.
pub const LOGCAT_ROTATION_SIZE: u64 = 5 * 1024 * 1024;
/// Capture timeout handed to logcat, in milliseconds.
pub const LOGCAT_TIMEOUT_MS: u64 = 10_000;

/// Where a command's output ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSink {
    /// Stdout is captured into `staging/<id>`.
    Stdout,
    /// The program writes `staging/<id>` itself; stdout is discarded.
    SelfWritten,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    FileCopy {
        path: PathBuf,
    },
    Command {
        id: String,
        argv: Vec<String>,
        sink: OutputSink,
    },
}

impl Source {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Source::FileCopy { path: path.into() }
    }

    pub fn command(id: &str, argv: &[&str]) -> Self {
        Source::Command {
            id: id.to_string(),
            argv: argv.iter().map(ToString::to_string).collect(),
            sink: OutputSink::Stdout,
        }
    }

    /// Name of the file this source produces in the staging directory.
    ///
    /// Returns `None` for a file copy whose path has no final component.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Source::FileCopy { path } => path.file_name().and_then(|name| name.to_str()),
            Source::Command { id, .. } => Some(id.as_str()),
        }
    }
}

/// Immutable, validated list of sources.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    /// Builds a registry, rejecting empty argv, unnamed files and duplicate output names.
    pub fn new(sources: Vec<Source>) -> Result<Self, LogPullError> {
        let mut seen = HashSet::new();
        for source in &sources {
            let name = source.output_name().ok_or_else(|| {
                LogPullError::InvalidConfig(format!("Source {source:?} has no output name"))
            })?;
            if let Source::Command { argv, .. } = source {
                if argv.is_empty() {
                    return Err(LogPullError::InvalidConfig(format!(
                        "Command source '{name}' has an empty argument vector"
                    )));
                }
            }
            if !seen.insert(name.to_string()) {
                return Err(LogPullError::InvalidConfig(format!(
                    "Duplicate source output name '{name}'"
                )));
            }
        }
        Ok(Self { sources })
    }

    /// The built-in catalogue: `/proc` snapshots, system commands and logcat.
    ///
    /// logcat is pointed at `staging_dir` so its rotated files are archived with the rest.
    pub fn default_catalogue(staging_dir: &Path) -> Self {
        let mut sources: Vec<Source> = PROC_FILES.iter().map(Source::file).collect();
        sources.extend(
            STDOUT_COMMANDS
                .iter()
                .map(|(id, argv)| Source::command(id, argv)),
        );
        sources.push(logcat_source(staging_dir));
        Self { sources }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn logcat_source(staging_dir: &Path) -> Source {
    let output = staging_dir.join(LOGCAT_ID);
    let argv = vec![
        LOGCAT_BINARY.to_string(),
        "-b".to_string(),
        "all".to_string(),
        "-v".to_string(),
        "threadtime".to_string(),
        "-v".to_string(),
        "usec".to_string(),
        "-v".to_string(),
        "printable".to_string(),
        "-D".to_string(),
        "-f".to_string(),
        output.to_string_lossy().into_owned(),
        format!("-r{LOGCAT_ROTATION_SIZE}"),
        format!("-n{LOGCAT_ROTATIONS}"),
        "-t".to_string(),
        LOGCAT_TIMEOUT_MS.to_string(),
    ];
    Source::Command {
        id: LOGCAT_ID.to_string(),
        argv,
        sink: OutputSink::SelfWritten,
    }
}
