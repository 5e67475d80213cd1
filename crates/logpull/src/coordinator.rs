// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drives one log pull end to end.
//!
//! # State machine
//!
//! ```text
//! Idle → Capturing → Archiving → Uploading → CleaningUp → Idle
//!                         └──(SkipUpload on failure)──┘
//! ```
//!
//! Every transition is logged. Stage errors are logged and recorded in the
//! [`RunOutcome`]; they never abort the run, so cleanup always happens and the
//! coordinator always returns to `Idle`.
//!
//! Only one run may use the staging directory at a time. A second call to
//! [`LogPull::run`] while a run is in flight fails with
//! [`LogPullError::RunInProgress`].

use crate::archive::{Archive, ArchiveBuilder};
use crate::capture::{CaptureExecutor, CaptureReport};
use crate::cleanup::{clean_session, CleanupReport};
use crate::config::{ArchiveFailurePolicy, PipelineConfig, RunRequest};
use crate::error::LogPullError;
use crate::sources::SourceRegistry;
use crate::upload::{UploadReceipt, Uploader};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

#[cfg(unix)]
const STAGING_DIR_MODE: u32 = 0o774;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Archiving,
    Uploading,
    CleaningUp,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "Idle",
            PipelineState::Capturing => "Capturing",
            PipelineState::Archiving => "Archiving",
            PipelineState::Uploading => "Uploading",
            PipelineState::CleaningUp => "CleaningUp",
        };
        f.write_str(name)
    }
}

/// Per-phase results of a single run.
#[derive(Debug)]
pub struct RunOutcome {
    pub capture: Result<CaptureReport, LogPullError>,
    pub archive: Result<Archive, LogPullError>,
    /// `None` when the upload was skipped by [`ArchiveFailurePolicy::SkipUpload`].
    pub upload: Option<Result<UploadReceipt, LogPullError>>,
    pub cleanup: CleanupReport,
}

impl RunOutcome {
    /// True when the archive was built and accepted by the collector.
    pub fn succeeded(&self) -> bool {
        self.archive.is_ok() && matches!(self.upload, Some(Ok(_)))
    }

    /// The historical run-level capture flag: the result of the last source processed.
    pub fn capture_flag(&self) -> bool {
        self.capture
            .as_ref()
            .map(CaptureReport::last_succeeded)
            .unwrap_or(false)
    }
}

/// Result of a trigger, as reported back to the request router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerResponse {
    pub err_code: String,
    pub err_msg: String,
}

impl TriggerResponse {
    pub fn new(err_code: &str, err_msg: impl Into<String>) -> Self {
        Self {
            err_code: err_code.to_string(),
            err_msg: err_msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err_code == "200"
    }
}

pub struct LogPull {
    config: PipelineConfig,
    registry: SourceRegistry,
    state: Mutex<PipelineState>,
}

impl LogPull {
    /// Creates a coordinator capturing the built-in source catalogue.
    ///
    /// The staging directory is created (mode `rwxrwxr--`) if it does not exist yet.
    pub fn new(config: PipelineConfig) -> Result<Self, LogPullError> {
        let registry = SourceRegistry::default_catalogue(&config.staging_dir());
        Self::with_registry(config, registry)
    }

    pub fn with_registry(
        config: PipelineConfig,
        registry: SourceRegistry,
    ) -> Result<Self, LogPullError> {
        config.validate()?;
        ensure_staging_dir(&config.staging_dir())?;
        Ok(Self {
            config,
            registry,
            state: Mutex::new(PipelineState::Idle),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn state(&self) -> PipelineState {
        *self.lock_state()
    }

    /// Runs capture, archive, upload and cleanup for `request`.
    ///
    /// Returns `Err` only when another run is already in flight.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome, LogPullError> {
        let _guard = self.begin_run()?;
        let staging_dir = self.config.staging_dir();
        let archive_path = self.config.archive_path(&request.upload_token);
        info!(
            "LOGPULL | Starting log pull for token {}",
            request.upload_token.as_str()
        );

        let capture = CaptureExecutor::new(&staging_dir)
            .capture_all(&self.registry)
            .await;
        match &capture {
            Ok(report) => {
                let failed = report.failures().count();
                if failed > 0 {
                    warn!(
                        "LOGPULL | {failed} of {} source(s) failed to capture",
                        report.results.len()
                    );
                }
                debug!(
                    "LOGPULL | Capture flag: {} (all succeeded: {})",
                    report.last_succeeded(),
                    report.all_succeeded()
                );
            }
            Err(e) => error!("LOGPULL | Capture failed: {e}"),
        }

        self.transition(PipelineState::Archiving);
        let builder = ArchiveBuilder::new(
            staging_dir.clone(),
            self.config.max_file_size,
            self.config.max_archive_size,
        );
        let output = archive_path.clone();
        let archive = match tokio::task::spawn_blocking(move || builder.build(&output)).await {
            Ok(result) => result,
            Err(e) => Err(LogPullError::ArchiveTask(e.to_string())),
        };
        if let Err(e) = &archive {
            error!("LOGPULL | Failed to build archive: {e}");
        }

        let upload = if archive.is_err()
            && self.config.archive_failure_policy == ArchiveFailurePolicy::SkipUpload
        {
            warn!("LOGPULL | Skipping upload since the archive could not be built");
            None
        } else {
            self.transition(PipelineState::Uploading);
            let result = Uploader::new(&self.config)
                .upload(&archive_path, &request.upload_location)
                .await;
            if let Err(e) = &result {
                error!("LOGPULL | File upload failed: {e}");
            }
            Some(result)
        };

        self.transition(PipelineState::CleaningUp);
        let cleanup = clean_session(&archive_path, &staging_dir).await;

        let outcome = RunOutcome {
            capture,
            archive,
            upload,
            cleanup,
        };
        info!(
            "LOGPULL | Log pull for token {} finished, succeeded: {}",
            request.upload_token.as_str(),
            outcome.succeeded()
        );
        Ok(outcome)
    }

    /// Trigger entry point: validates the raw request, runs it and maps the result
    /// to an error code.
    ///
    /// `"200"` means the run went through all phases, not that every phase succeeded.
    /// An invalid location or token yields `"400"` and a run already in flight `"409"`.
    pub async fn run_log_pull(&self, upload_location: &str, upload_token: &str) -> TriggerResponse {
        let request = match RunRequest::new(upload_location, upload_token) {
            Ok(request) => request,
            Err(e) => {
                error!("LOGPULL | Rejected log pull request: {e}");
                return TriggerResponse::new("400", e.to_string());
            }
        };

        match self.run(&request).await {
            Ok(_) => TriggerResponse::new("200", ""),
            Err(e @ LogPullError::RunInProgress) => {
                warn!("LOGPULL | {e}");
                TriggerResponse::new("409", e.to_string())
            }
            Err(e) => TriggerResponse::new("500", e.to_string()),
        }
    }

    fn begin_run(&self) -> Result<RunGuard<'_>, LogPullError> {
        let mut state = self.lock_state();
        if *state != PipelineState::Idle {
            return Err(LogPullError::RunInProgress);
        }
        info!(
            "LOGPULL | {} -> {}",
            PipelineState::Idle,
            PipelineState::Capturing
        );
        *state = PipelineState::Capturing;
        Ok(RunGuard { owner: self })
    }

    fn transition(&self, next: PipelineState) {
        let mut state = self.lock_state();
        info!("LOGPULL | {} -> {}", *state, next);
        *state = next;
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the coordinator to `Idle` when the run ends, however it ends.
struct RunGuard<'a> {
    owner: &'a LogPull,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.owner.transition(PipelineState::Idle);
    }
}

fn ensure_staging_dir(staging_dir: &Path) -> Result<(), LogPullError> {
    if staging_dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(staging_dir).map_err(|e| {
        LogPullError::io(
            format!("Failed to create staging directory {}", staging_dir.display()),
            e,
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(
            staging_dir,
            std::fs::Permissions::from_mode(STAGING_DIR_MODE),
        )
        .map_err(|e| {
            LogPullError::io(
                format!("Failed to set permissions on {}", staging_dir.display()),
                e,
            )
        })?;
    }

    debug!(
        "LOGPULL | Created staging directory {}",
        staging_dir.display()
    );
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sources::Source;
    use std::os::unix::fs::PermissionsExt;

    fn registry() -> SourceRegistry {
        SourceRegistry::new(vec![
            Source::command("uname_-a", &["echo", "Linux stb 5.4.0"]),
            Source::command("missing_tool", &["/nonexistent/logpull-missing-tool"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_new_creates_staging_dir() {
        let cache = tempfile::tempdir().unwrap();
        let config = PipelineConfig::with_cache_dir(cache.path().join("cache"));
        let staging = config.staging_dir();

        let log_pull = LogPull::new(config).unwrap();

        let mode = std::fs::metadata(&staging).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o774);
        assert_eq!(log_pull.state(), PipelineState::Idle);
        assert!(!log_pull.registry().is_empty());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let cache = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            max_file_size: 0,
            ..PipelineConfig::with_cache_dir(cache.path())
        };
        assert!(matches!(
            LogPull::new(config),
            Err(LogPullError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_overlapping_run_is_refused() {
        let cache = tempfile::tempdir().unwrap();
        let log_pull =
            LogPull::with_registry(PipelineConfig::with_cache_dir(cache.path()), registry())
                .unwrap();
        let request = RunRequest::new("http://127.0.0.1:9/upload", "token").unwrap();

        let guard = log_pull.begin_run().unwrap();
        assert!(matches!(
            log_pull.run(&request).await,
            Err(LogPullError::RunInProgress)
        ));
        let response = log_pull
            .run_log_pull("http://127.0.0.1:9/upload", "token")
            .await;
        assert_eq!(response.err_code, "409");

        drop(guard);
        assert_eq!(log_pull.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_bad_token_is_a_400() {
        let cache = tempfile::tempdir().unwrap();
        let log_pull =
            LogPull::with_registry(PipelineConfig::with_cache_dir(cache.path()), registry())
                .unwrap();

        let response = log_pull
            .run_log_pull("http://127.0.0.1:9/upload", "../etc/passwd")
            .await;
        assert_eq!(response.err_code, "400");
        let response = log_pull.run_log_pull("not a url", "token").await;
        assert_eq!(response.err_code, "400");
    }

    #[tokio::test]
    async fn test_skip_upload_policy() {
        let cache = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            archive_failure_policy: ArchiveFailurePolicy::SkipUpload,
            ..PipelineConfig::with_cache_dir(cache.path())
        };
        let log_pull = LogPull::with_registry(config, registry()).unwrap();
        // a directory in place of the archive makes the build fail
        std::fs::create_dir(cache.path().join("blocked")).unwrap();
        let request = RunRequest::new("http://127.0.0.1:9/upload", "blocked").unwrap();

        let outcome = log_pull.run(&request).await.unwrap();

        assert!(outcome.archive.is_err());
        assert!(outcome.upload.is_none());
        assert!(!outcome.succeeded());
        assert_eq!(outcome.cleanup.files_removed, 1);
        assert_eq!(log_pull.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_upload_anyway_policy_attempts_upload() {
        let cache = tempfile::tempdir().unwrap();
        let log_pull =
            LogPull::with_registry(PipelineConfig::with_cache_dir(cache.path()), registry())
                .unwrap();
        std::fs::create_dir(cache.path().join("blocked")).unwrap();
        let request = RunRequest::new("http://127.0.0.1:9/upload", "blocked").unwrap();

        let outcome = log_pull.run(&request).await.unwrap();

        assert!(outcome.archive.is_err());
        assert!(matches!(outcome.upload, Some(Err(_))));
        // the missing tool ran last
        assert!(!outcome.capture_flag());
        assert_eq!(log_pull.state(), PipelineState::Idle);
    }
}
