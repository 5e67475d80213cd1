// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error};

/// What a cleanup pass removed and what it could not.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub archive_removed: bool,
    pub files_removed: usize,
    pub failures: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Removes the archive and every regular file directly inside the staging directory.
///
/// Sub-directories and the staging directory itself are left alone. Failures are
/// logged and recorded, never returned; running it twice leaves the same state.
pub async fn clean_session(archive_path: &Path, staging_dir: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();

    match fs::remove_file(archive_path).await {
        Ok(()) => {
            debug!("LOGPULL | Deleted archive {}", archive_path.display());
            report.archive_removed = true;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            error!(
                "LOGPULL | Failed to delete archive {}: {e}",
                archive_path.display()
            );
            report.failures.push(archive_path.to_path_buf());
        }
    }

    let mut entries = match fs::read_dir(staging_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return report,
        Err(e) => {
            error!(
                "LOGPULL | Failed to list staging directory {}: {e}",
                staging_dir.display()
            );
            report.failures.push(staging_dir.to_path_buf());
            return report;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                error!(
                    "LOGPULL | Failed to list staging directory {}: {e}",
                    staging_dir.display()
                );
                report.failures.push(staging_dir.to_path_buf());
                break;
            }
        };

        let path = entry.path();
        match entry.file_type().await {
            Ok(file_type) if file_type.is_file() => {}
            Ok(_) => continue,
            Err(e) => {
                error!("LOGPULL | Failed to stat {}: {e}", path.display());
                report.failures.push(path);
                continue;
            }
        }

        match fs::remove_file(&path).await {
            Ok(()) => report.files_removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                error!("LOGPULL | Failed to delete {}: {e}", path.display());
                report.failures.push(path);
            }
        }
    }

    debug!(
        "LOGPULL | Removed {} file(s) from {}",
        report.files_removed,
        staging_dir.display()
    );
    report
}
