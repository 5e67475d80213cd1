// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

mod common;

use common::helpers::{file_names, shell, split_multipart, tar_gz_entries};
use common::mock_server::MockServer;
use logpull::config::{PipelineConfig, RunRequest};
use logpull::coordinator::{LogPull, PipelineState};
use logpull::error::LogPullError;
use logpull::sources::{Source, SourceRegistry};
use logpull::upload::multipart_content_type;

const THREE_MIB: usize = 3 * 1024 * 1024;

fn log_pull(cache: &std::path::Path, sources: Vec<Source>) -> LogPull {
    let registry = SourceRegistry::new(sources).expect("valid registry");
    LogPull::with_registry(PipelineConfig::with_cache_dir(cache), registry)
        .expect("coordinator")
}

#[tokio::test]
async fn test_small_and_large_capture_uploaded() {
    let server = MockServer::start(200, "accepted\nid=7").await;
    let cache = tempfile::tempdir().unwrap();
    let log_pull = log_pull(
        cache.path(),
        vec![
            // 199 digits plus the newline
            shell("uname_-a", "printf '%0199d\\n' 0"),
            shell(
                "dumpsys",
                &format!("yes 'SurfaceFlinger: layer state ok.' | head -c {THREE_MIB}"),
            ),
        ],
    );
    let request = RunRequest::new(&server.upload_url(), "token-a").unwrap();

    let outcome = log_pull.run(&request).await.unwrap();

    assert!(outcome.succeeded());
    assert!(outcome.capture_flag());
    let archive = outcome.archive.as_ref().unwrap();
    assert!(!archive.budget_exceeded);
    assert_eq!(outcome.upload.as_ref().unwrap().as_ref().unwrap().status, 200);

    let requests = server.get_requests();
    assert_eq!(requests.len(), 1);
    let upload = &requests[0];
    assert_eq!(upload.method, "POST");
    assert_eq!(upload.path, "/upload");
    assert_eq!(upload.header("accept"), Some("*/*"));
    assert_eq!(
        upload.header("content-type"),
        Some(multipart_content_type().as_str())
    );

    let (file_name, payload) = split_multipart(&upload.body);
    assert_eq!(file_name, "token-a");
    assert!(payload.len() < 20 * 1024 * 1024);

    let entries = tar_gz_entries(&payload);
    let names: Vec<_> = entries.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["dumpsys.tar.gz", "uname_-a"]);
    assert_eq!(entries[1].1.len(), 200);

    let inner = tar_gz_entries(&entries[0].1);
    assert_eq!(inner.len(), 1);
    assert_eq!(inner[0].0, "dumpsys");
    assert_eq!(inner[0].1.len(), THREE_MIB);

    assert!(file_names(&log_pull.config().staging_dir()).is_empty());
    assert!(!cache.path().join("token-a").exists());
    assert_eq!(log_pull.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_rejected_upload_still_cleans_up() {
    let server = MockServer::start(500, "Internal Server Error").await;
    let cache = tempfile::tempdir().unwrap();
    let log_pull = log_pull(
        cache.path(),
        vec![
            shell("uptime", "echo ' 10:00:00 up 3 days'"),
            shell("free", "echo 'Mem: 2048 1024 1024'"),
        ],
    );
    let request = RunRequest::new(&server.upload_url(), "token-b").unwrap();

    let outcome = log_pull.run(&request).await.unwrap();

    assert!(outcome.archive.is_ok());
    assert!(matches!(
        outcome.upload,
        Some(Err(LogPullError::UploadRejected { status: 500, .. }))
    ));
    assert!(!outcome.succeeded());
    assert_eq!(server.get_requests().len(), 1);

    assert!(outcome.cleanup.is_clean());
    assert!(outcome.cleanup.archive_removed);
    assert_eq!(outcome.cleanup.files_removed, 2);
    assert!(file_names(&log_pull.config().staging_dir()).is_empty());
    assert_eq!(log_pull.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_missing_program_does_not_stop_the_run() {
    let server = MockServer::start(200, "ok").await;
    let cache = tempfile::tempdir().unwrap();
    let log_pull = log_pull(
        cache.path(),
        vec![
            shell("date", "echo 'Thu Jan  1 00:00:00 UTC 1970'"),
            Source::command("lspci", &["/nonexistent/bin/lspci"]),
            Source::file(cache.path().join("no-such-proc-file")),
            shell("lsmod", "echo 'wifi 1024 0'"),
        ],
    );
    let request = RunRequest::new(&server.upload_url(), "token-c").unwrap();

    let outcome = log_pull.run(&request).await.unwrap();

    let capture = outcome.capture.as_ref().unwrap();
    let failed: Vec<_> = capture
        .failures()
        .map(|result| result.source_id.as_str())
        .collect();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0], "lspci");
    assert!(failed[1].ends_with("no-such-proc-file"));
    // the last source succeeded, so the historical flag is set
    assert!(capture.last_succeeded());
    assert!(!capture.all_succeeded());
    assert!(outcome.succeeded());

    let (_, payload) = split_multipart(&server.get_requests()[0].body);
    let names: Vec<_> = tar_gz_entries(&payload)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["date", "lsmod"]);
}

#[tokio::test]
async fn test_unreachable_collector() {
    // bind then drop to get a port nothing listens on
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let cache = tempfile::tempdir().unwrap();
    let log_pull = log_pull(cache.path(), vec![shell("mount", "echo '/dev/root on /'")]);
    let request = RunRequest::new(&format!("http://{addr}/upload"), "token-d").unwrap();

    let outcome = log_pull.run(&request).await.unwrap();

    assert!(matches!(outcome.upload, Some(Err(LogPullError::Http(_)))));
    assert!(outcome.cleanup.archive_removed);
    assert_eq!(log_pull.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_trigger_runs_are_repeatable() {
    let server = MockServer::start(200, "ok").await;
    let cache = tempfile::tempdir().unwrap();
    let log_pull = log_pull(cache.path(), vec![shell("getprop", "echo '[ro.build]: [1]'")]);

    for token in ["first", "second"] {
        let response = log_pull.run_log_pull(&server.upload_url(), token).await;
        assert!(response.is_ok(), "{response:?}");
        assert_eq!(response.err_msg, "");
    }

    let uploaded: Vec<_> = server
        .get_requests()
        .iter()
        .map(|request| split_multipart(&request.body).0)
        .collect();
    assert_eq!(uploaded, vec!["first", "second"]);
}
