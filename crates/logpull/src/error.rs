// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

/// Errors that can occur while running a log pull
#[derive(Debug, thiserror::Error)]
pub enum LogPullError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid upload token '{0}': must be a plain file name")]
    InvalidToken(String),

    #[error("Staging directory {} is missing or not a directory", .0.display())]
    StagingUnavailable(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive task failed: {0}")]
    ArchiveTask(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upload rejected with status {status}: {message}")]
    UploadRejected { status: u16, message: String },

    #[error("A log pull is already in progress")]
    RunInProgress,
}

impl LogPullError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LogPullError::Io {
            context: context.into(),
            source,
        }
    }
}
