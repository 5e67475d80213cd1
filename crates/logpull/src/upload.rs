// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships the aggregate archive to the collector.
//!
//! The archive is read fully into memory and POSTed as a single-part
//! `multipart/form-data` body with a fixed boundary. The HTTP client is built per
//! run so that the bundled CA at `<cacheDir>/certs/opensync_ca.pem` is read fresh
//! each time and never installed process-wide.

use crate::config::PipelineConfig;
use crate::error::LogPullError;
use logpull_fips::reqwest_adapter::create_reqwest_client_builder;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Multipart boundary expected by the collector.
pub const BOUNDARY: &str = "------------------------a7381b8e4edcb37e";
const FORM_FIELD_NAME: &str = "filename";

/// A successful (HTTP 200) upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Uploader {
    ca_cert_path: PathBuf,
    timeout: Duration,
    https_proxy: Option<String>,
}

impl Uploader {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            ca_cert_path: config.ca_cert_path(),
            timeout: config.upload_timeout,
            https_proxy: config.https_proxy.clone(),
        }
    }

    /// Uploads the archive at `archive_path` to `location`.
    ///
    /// Only HTTP 200 counts as success; any other status is returned as
    /// [`LogPullError::UploadRejected`]. There is no retry.
    pub async fn upload(
        &self,
        archive_path: &Path,
        location: &Url,
    ) -> Result<UploadReceipt, LogPullError> {
        let contents = tokio::fs::read(archive_path).await.map_err(|e| {
            LogPullError::io(
                format!("Failed to read archive {}", archive_path.display()),
                e,
            )
        })?;
        let file_name = archive_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let client = self.build_client()?;
        debug!(
            "LOGPULL | Uploading {} ({} B) to {}",
            file_name,
            contents.len(),
            location
        );

        let response = client
            .post(location.clone())
            .header(ACCEPT, "*/*")
            .header(CONTENT_TYPE, multipart_content_type())
            .body(multipart_body(&file_name, &contents))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(LogPullError::UploadRejected {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let body = response.text().await?;
        for line in body.lines() {
            info!("LOGPULL | {line}");
        }
        info!(
            "LOGPULL | File uploaded successfully. Response Code: {}",
            status.as_u16()
        );
        Ok(UploadReceipt {
            status: status.as_u16(),
            body,
        })
    }

    fn build_client(&self) -> Result<reqwest::Client, LogPullError> {
        let ca_cert_path = if self.ca_cert_path.is_file() {
            Some(self.ca_cert_path.as_path())
        } else {
            warn!(
                "LOGPULL | CA bundle {} not found, using built-in trust roots",
                self.ca_cert_path.display()
            );
            None
        };

        let mut builder = create_reqwest_client_builder(ca_cert_path)
            .map_err(|e| LogPullError::HttpClient(e.to_string()))?
            .timeout(self.timeout);

        if let Some(proxy) = &self.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }

        Ok(builder.build()?)
    }
}

/// Value of the request `Content-Type` header.
#[must_use]
pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// Frames `contents` as the single part of a multipart body.
#[must_use]
pub fn multipart_body(file_name: &str, contents: &[u8]) -> Vec<u8> {
    let head = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{FORM_FIELD_NAME}\"; filename=\"{file_name}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    );
    let tail = format!("\r\n--{BOUNDARY}--\r\n");

    let mut body = Vec::with_capacity(head.len() + contents.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(contents);
    body.extend_from_slice(tail.as_bytes());
    body
}
