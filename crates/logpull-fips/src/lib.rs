// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TLS client construction for log uploads.
//!
//! Builds `reqwest` client builders whose trust anchors come from a bundled CA
//! file rather than from any process-wide trust store. With the `fips` feature
//! the TLS configuration is assembled on the installed FIPS crypto provider.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod reqwest_adapter;

/// Installs the FIPS crypto provider as the process default for rustls.
///
/// Must run before any client is built with the `fips` feature enabled.
#[cfg(feature = "fips")]
pub fn prepare_client_provider() -> std::io::Result<()> {
    rustls::crypto::default_fips_provider()
        .install_default()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Failed to set up fips provider: {e:?}"),
            )
        })
}

/// No-op outside FIPS builds; reqwest's rustls provider is used.
#[cfg(not(feature = "fips"))]
#[allow(clippy::unnecessary_wraps)]
pub fn prepare_client_provider() -> std::io::Result<()> {
    Ok(())
}
