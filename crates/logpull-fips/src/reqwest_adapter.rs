// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::ClientBuilder;
use std::error::Error;
use std::path::Path;
use tracing::debug;

/// Creates a reqwest client builder with TLS configuration.
///
/// When `ca_cert_path` is given, every certificate in that PEM bundle is added as a
/// trust anchor and the built-in roots are disabled, so the bundle is the only thing
/// the client trusts. Without a path, reqwest's default rustls roots are used.
#[cfg(not(feature = "fips"))]
pub fn create_reqwest_client_builder(
    ca_cert_path: Option<&Path>,
) -> Result<ClientBuilder, Box<dyn Error>> {
    let builder = reqwest::Client::builder().use_rustls_tls();

    let Some(path) = ca_cert_path else {
        return Ok(builder);
    };

    let pem = std::fs::read(path)
        .map_err(|e| format!("Failed to read CA bundle {}: {e}", path.display()))?;
    let certs = reqwest::Certificate::from_pem_bundle(&pem)?;
    if certs.is_empty() {
        return Err(format!("No certificates found in CA bundle {}", path.display()).into());
    }

    debug!(
        "Trusting {} certificate(s) from {}",
        certs.len(),
        path.display()
    );

    let mut builder = builder.tls_built_in_root_certs(false);
    for cert in certs {
        builder = builder.add_root_certificate(cert);
    }
    Ok(builder)
}

/// Creates a reqwest client builder with FIPS-compliant TLS configuration.
///
/// Trust anchors come from `ca_cert_path` when given, otherwise from the native root
/// store. The runtime crypto provider must already be installed, e.g. with
/// `rustls::crypto::default_fips_provider().install_default()`.
#[cfg(feature = "fips")]
pub fn create_reqwest_client_builder(
    ca_cert_path: Option<&Path>,
) -> Result<ClientBuilder, Box<dyn Error>> {
    use rustls::pki_types::{pem::PemObject, CertificateDer};

    let provider =
        rustls::crypto::CryptoProvider::get_default().ok_or("No crypto provider configured")?;

    if !provider.fips() {
        return Err("Crypto provider is not FIPS-compliant".into());
    }

    let mut root_cert_store = rustls::RootCertStore::empty();
    let mut valid_count = 0;
    match ca_cert_path {
        Some(path) => {
            let pem = std::fs::read(path)
                .map_err(|e| format!("Failed to read CA bundle {}: {e}", path.display()))?;
            for cert in CertificateDer::pem_slice_iter(&pem) {
                match cert.map_err(|e| format!("{e:?}")).and_then(|cert| {
                    root_cert_store.add(cert).map_err(|e| format!("{e:?}"))
                }) {
                    Ok(()) => valid_count += 1,
                    Err(err) => debug!("Failed to parse certificate: {}", err),
                }
            }
        }
        None => {
            let native_certs = rustls_native_certs::load_native_certs();
            for cert in native_certs.certs {
                match root_cert_store.add(cert) {
                    Ok(()) => valid_count += 1,
                    Err(err) => {
                        debug!("Failed to parse certificate: {:?}", err);
                    }
                }
            }
        }
    }
    if valid_count == 0 {
        return Err("No valid certificates found for the upload trust store".into());
    }

    let versions = rustls::ALL_VERSIONS.to_vec();
    let config_builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&versions)
        .map_err(|_| "Failed to set protocol versions")?;

    let config = config_builder
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    if !config.fips() {
        return Err("The final TLS configuration is not FIPS-compliant".into());
    }
    debug!("Client builder is configured with FIPS.");

    Ok(reqwest::Client::builder().use_preconfigured_tls(config))
}
