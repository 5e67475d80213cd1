// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::LogPullError;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CACHE_DIR: &str = "/data/local/tmp/logpull";
/// Files strictly larger than this are compressed on their own before archiving.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;
/// Soft budget for the aggregate archive.
pub const MAX_LOGPULL_SIZE: u64 = 20 * 1024 * 1024;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 60;

pub const STAGING_DIR_NAME: &str = "logs";
pub const CERTS_DIR_NAME: &str = "certs";
pub const CA_FILE_NAME: &str = "opensync_ca.pem";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// What the coordinator does with the upload phase when the archive could not be built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFailurePolicy {
    /// Upload whatever ended up at the archive path, if anything.
    #[default]
    UploadAnyway,
    /// Go straight to cleanup.
    SkipUpload,
}

/// Process-level configuration shared by every run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of the cache; staging, certs and archives live under it
    pub cache_dir: PathBuf,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Per-file pre-compression threshold, in bytes
    pub max_file_size: u64,
    /// Aggregate archive budget, in bytes
    pub max_archive_size: u64,
    /// Timeout for the upload request
    pub upload_timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    pub archive_failure_policy: ArchiveFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            log_level: "info".to_string(),
            max_file_size: MAX_FILE_SIZE,
            max_archive_size: MAX_LOGPULL_SIZE,
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            https_proxy: None,
            archive_failure_policy: ArchiveFailurePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Config rooted at `cache_dir` with every other setting at its default.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, LogPullError> {
        let cache_dir = env::var("LOGPULL_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_DIR));
        let log_level = env::var("LOGPULL_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());
        let max_file_size = env::var("LOGPULL_MAX_FILE_SIZE")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(MAX_FILE_SIZE);
        let max_archive_size = env::var("LOGPULL_MAX_ARCHIVE_SIZE")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(MAX_LOGPULL_SIZE);
        let upload_timeout = env::var("LOGPULL_UPLOAD_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(
                Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
                Duration::from_secs,
            );
        let https_proxy = env::var("LOGPULL_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();
        let archive_failure_policy = match env::var("LOGPULL_SKIP_UPLOAD_ON_ARCHIVE_FAILURE") {
            Ok(val) if val.to_lowercase() == "true" => ArchiveFailurePolicy::SkipUpload,
            _ => ArchiveFailurePolicy::UploadAnyway,
        };

        let config = Self {
            cache_dir,
            log_level,
            max_file_size,
            max_archive_size,
            upload_timeout,
            https_proxy,
            archive_failure_policy,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LogPullError> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(LogPullError::InvalidConfig(
                "LOGPULL_CACHE_DIR cannot be empty".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(LogPullError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if self.max_file_size == 0 || self.max_archive_size == 0 {
            return Err(LogPullError::InvalidConfig(
                "Archive size limits must be greater than 0".to_string(),
            ));
        }

        if self.max_file_size > self.max_archive_size {
            return Err(LogPullError::InvalidConfig(format!(
                "Per-file threshold ({}) cannot exceed the archive budget ({})",
                self.max_file_size, self.max_archive_size
            )));
        }

        if self.upload_timeout.is_zero() {
            return Err(LogPullError::InvalidConfig(
                "Upload timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.cache_dir.join(STAGING_DIR_NAME)
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.cache_dir.join(CERTS_DIR_NAME).join(CA_FILE_NAME)
    }

    /// Where the archive for `token` is written and read back from.
    pub fn archive_path(&self, token: &UploadToken) -> PathBuf {
        self.cache_dir.join(token.as_str())
    }
}

/// Caller-supplied identifier, used as the archive file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadToken(String);

impl UploadToken {
    pub fn parse(token: &str) -> Result<Self, LogPullError> {
        // the token names a file in the cache dir and is quoted in the upload body
        let is_plain_name = !token.is_empty()
            && token != "."
            && token != ".."
            && token != STAGING_DIR_NAME
            && token != CERTS_DIR_NAME
            && !token.contains(['/', '\\', '"'])
            && !token.chars().any(char::is_control)
            && Path::new(token).file_name().is_some();
        if !is_plain_name {
            return Err(LogPullError::InvalidToken(token.to_string()));
        }
        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Everything that varies between two runs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub upload_location: reqwest::Url,
    pub upload_token: UploadToken,
}

impl RunRequest {
    pub fn new(upload_location: &str, upload_token: &str) -> Result<Self, LogPullError> {
        let upload_location = reqwest::Url::parse(upload_location.trim()).map_err(|e| {
            LogPullError::InvalidConfig(format!(
                "Invalid upload location '{upload_location}': {e}"
            ))
        })?;
        Ok(Self {
            upload_location,
            upload_token: UploadToken::parse(upload_token)?,
        })
    }
}
