// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! On-device diagnostics log pull.
//!
//! A log pull captures a fixed catalogue of system outputs into a staging
//! directory, packs them into one size-bounded `tar.gz`, POSTs the archive to a
//! collector and then removes everything it wrote.
//!
//! ```rust,ignore
//! use logpull::{config::PipelineConfig, coordinator::LogPull};
//!
//! let log_pull = LogPull::new(PipelineConfig::from_env()?)?;
//! let response = log_pull
//!     .run_log_pull("https://collector.example.com/upload", "f3b1c2d4")
//!     .await;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod archive;
pub mod capture;
pub mod cleanup;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod logger;
pub mod sources;
pub mod upload;
