// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use flate2::read::GzDecoder;
use logpull::upload::BOUNDARY;
use std::io::Read;
use std::path::Path;

/// A command source running `script` through `sh -c`
pub fn shell(id: &str, script: &str) -> logpull::sources::Source {
    logpull::sources::Source::command(id, &["sh", "-c", script])
}

/// Extract the file name and payload from a single-part multipart body
pub fn split_multipart(body: &[u8]) -> (String, Vec<u8>) {
    let head_end = body
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("multipart head terminator")
        + 4;
    let head = std::str::from_utf8(&body[..head_end]).expect("utf-8 multipart head");
    assert!(head.starts_with(&format!("--{BOUNDARY}\r\n")));
    assert!(head.contains("Content-Disposition: form-data; name=\"filename\"; "));
    assert!(head.contains("Content-Type: application/octet-stream\r\n"));

    let file_name = head
        .split("filename=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .expect("filename parameter")
        .to_string();

    let tail = format!("\r\n--{BOUNDARY}--\r\n");
    assert!(body.ends_with(tail.as_bytes()), "missing closing boundary");
    let payload = body[head_end..body.len() - tail.len()].to_vec();
    (file_name, payload)
}

/// Decode a gzip-wrapped tar into `(entry name, contents)` pairs
pub fn tar_gz_entries(data: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    archive
        .entries()
        .expect("tar entries")
        .map(|entry| {
            let mut entry = entry.expect("tar entry");
            let name = entry
                .path()
                .expect("entry path")
                .to_string_lossy()
                .into_owned();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).expect("entry contents");
            (name, contents)
        })
        .collect()
}

/// Names of the regular files directly inside `dir`
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("readable dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
