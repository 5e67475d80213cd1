// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logpull::{
    config::PipelineConfig, coordinator::LogPull, dispatch::Dispatcher, logger::Formatter,
};

#[tokio::main]
pub async fn main() {
    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid log pull configuration: {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .event_format(Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    if let Err(e) = logpull_fips::prepare_client_provider() {
        error!("{e}");
        return;
    }

    let log_pull = match LogPull::new(config) {
        Ok(log_pull) => Arc::new(log_pull),
        Err(e) => {
            error!("Failed to initialize log pull: {e}");
            return;
        }
    };
    info!(
        "Log pull agent ready, cache dir {}",
        log_pull.config().cache_dir.display()
    );

    if let Err(e) = serve(Dispatcher::new(log_pull)).await {
        error!("Request loop stopped: {e}");
    }
}

/// Answers newline-delimited JSON requests from stdin, one response line each.
///
/// Requests are handled in order, so two log pulls never overlap.
async fn serve(dispatcher: Dispatcher) -> io::Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        debug!("IN: {request}");
        let response = dispatcher.dispatch(request).await;
        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    debug!("stdin closed, shutting down");
    Ok(())
}
