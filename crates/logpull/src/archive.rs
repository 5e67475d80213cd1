// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Builds the aggregate gzip-compressed tar archive from the staging directory.
//!
//! # Phases
//!
//! 1. **Pre-compression**: every regular file strictly larger than the per-file
//!    threshold is tarred and gzipped on its own into `<name>.tar.gz`, and the
//!    original is removed.
//! 2. **Aggregation**: the (re-listed) staging files are appended to a single tar
//!    stream wrapped once in gzip. A running total of entry sizes is kept and the
//!    loop stops as soon as the total exceeds the budget.
//!
//! The budget is a soft cap: the entry that crosses it is written in full, so the
//! archive content can exceed the budget by at most one entry.
//!
//! Everything here is blocking file I/O; async callers should run it on the
//! blocking pool.

use crate::error::LogPullError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct Archive {
    pub path: PathBuf,
    pub entries: Vec<ArchiveEntry>,
    /// Sum of the entry sizes written.
    pub total_bytes: u64,
    /// Whether aggregation stopped early because the budget was exceeded.
    pub budget_exceeded: bool,
}

pub struct ArchiveBuilder {
    staging_dir: PathBuf,
    max_file_size: u64,
    max_archive_size: u64,
}

impl ArchiveBuilder {
    pub fn new(staging_dir: impl Into<PathBuf>, max_file_size: u64, max_archive_size: u64) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            max_file_size,
            max_archive_size,
        }
    }

    /// Writes the aggregate archive to `output`.
    ///
    /// On error the partially written output is left on disk for the cleaner.
    pub fn build(&self, output: &Path) -> Result<Archive, LogPullError> {
        let file = File::create(output).map_err(|e| {
            LogPullError::io(
                format!("Failed to create archive {}", output.display()),
                e,
            )
        })?;
        let mut tar = tar::Builder::new(GzEncoder::new(
            BufWriter::new(file),
            Compression::default(),
        ));

        self.precompress_oversized()?;

        let mut archive = Archive {
            path: output.to_path_buf(),
            entries: Vec::new(),
            total_bytes: 0,
            budget_exceeded: false,
        };

        for (path, name) in list_files(&self.staging_dir)? {
            let size = append_file(&mut tar, &path, &name)?;
            archive.total_bytes += size;
            archive.entries.push(ArchiveEntry {
                name: name.to_string_lossy().into_owned(),
                size,
            });
            if archive.total_bytes > self.max_archive_size {
                error!(
                    "LOGPULL | Total size exceeds {} bytes. Compression stopped.",
                    self.max_archive_size
                );
                archive.budget_exceeded = true;
                break;
            }
        }

        finish(tar).map_err(|e| {
            LogPullError::io(
                format!("Failed to finish archive {}", output.display()),
                e,
            )
        })?;

        info!(
            "LOGPULL | Total size of {} is {} B ({} entries)",
            output.display(),
            archive.total_bytes,
            archive.entries.len()
        );
        Ok(archive)
    }

    /// Phase 1: replaces every file above the per-file threshold with `<name>.tar.gz`.
    ///
    /// Returns the paths of the compressed siblings that were created.
    pub fn precompress_oversized(&self) -> Result<Vec<PathBuf>, LogPullError> {
        let mut compressed = Vec::new();
        for (path, name) in list_files(&self.staging_dir)? {
            let size = fs::metadata(&path)
                .map_err(|e| LogPullError::io(format!("Failed to stat {}", path.display()), e))?
                .len();
            if size > self.max_file_size {
                compressed.push(compress_and_delete(&path, &name)?);
            }
        }
        Ok(compressed)
    }
}

fn compress_and_delete(path: &Path, name: &OsStr) -> Result<PathBuf, LogPullError> {
    let mut compressed_name = OsString::from(name);
    compressed_name.push(".tar.gz");
    let compressed = path.with_file_name(compressed_name);

    let file = File::create(&compressed).map_err(|e| {
        LogPullError::io(format!("Failed to create {}", compressed.display()), e)
    })?;
    let mut tar = tar::Builder::new(GzEncoder::new(
        BufWriter::new(file),
        Compression::default(),
    ));
    append_file(&mut tar, path, name)?;
    finish(tar)
        .map_err(|e| LogPullError::io(format!("Failed to finish {}", compressed.display()), e))?;
    debug!("LOGPULL | File processed: {}", name.to_string_lossy());

    match fs::remove_file(path) {
        Ok(()) => debug!(
            "LOGPULL | Deleted original file: {}",
            name.to_string_lossy()
        ),
        Err(e) => error!(
            "LOGPULL | Failed to delete original file {}: {e}",
            name.to_string_lossy()
        ),
    }
    Ok(compressed)
}

/// Appends `path` as an entry called `name` and returns the entry size.
fn append_file<W: Write>(
    tar: &mut tar::Builder<W>,
    path: &Path,
    name: &OsStr,
) -> Result<u64, LogPullError> {
    let file = File::open(path)
        .map_err(|e| LogPullError::io(format!("Failed to open {}", path.display()), e))?;
    let metadata = file
        .metadata()
        .map_err(|e| LogPullError::io(format!("Failed to stat {}", path.display()), e))?;
    let size = metadata.len();

    let mut header = tar::Header::new_gnu();
    header.set_metadata(&metadata);
    header.set_size(size);

    // never read past the size recorded in the header
    tar.append_data(&mut header, Path::new(name), file.take(size))
        .map_err(|e| LogPullError::io(format!("Failed to archive {}", path.display()), e))?;
    Ok(size)
}

fn finish<W: Write>(tar: tar::Builder<GzEncoder<BufWriter<W>>>) -> std::io::Result<()> {
    let mut writer = tar.into_inner()?.finish()?;
    writer.flush()
}

/// Regular files directly inside `dir`, sorted by name.
fn list_files(dir: &Path) -> Result<Vec<(PathBuf, OsString)>, LogPullError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| LogPullError::io(format!("Failed to list {}", dir.display()), e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| LogPullError::io(format!("Failed to list {}", dir.display()), e))?;
        let is_file = entry
            .file_type()
            .map_err(|e| LogPullError::io(format!("Failed to stat {:?}", entry.path()), e))?
            .is_file();
        if is_file {
            files.push((entry.path(), entry.file_name()));
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}
