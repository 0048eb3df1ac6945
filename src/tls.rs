//! Mutual-TLS material loading.
//!
//! Clusters and the coordination store can each carry their own PEM
//! material. Files are read once at startup; the same material is shared
//! by a cluster's control-plane client and its direct-node fallback.

use crate::config::TlsConfig;
use crate::error::{Result, SwitchError};
use std::fs;
use std::time::Duration;

/// PEM material loaded from disk.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl TlsMaterial {
    /// Load CA, certificate and key files referenced by the config.
    pub fn load(config: &TlsConfig) -> Result<Self> {
        let ca = read_pem(&config.ca, "ca")?;
        let cert = read_pem(&config.cert, "cert")?;
        let key = read_pem(&config.key, "key")?;
        Ok(Self { ca, cert, key })
    }

    /// Certificate and key concatenated, as rustls identity input.
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut pem = self.cert.clone();
        if !pem.ends_with(b"\n") {
            pem.push(b'\n');
        }
        pem.extend_from_slice(&self.key);
        pem
    }
}

fn read_pem(path: &str, what: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        SwitchError::Config(format!("Failed to read TLS {} file {}: {}", what, path, e))
    })
}

/// Build an HTTP client for a cluster endpoint.
///
/// The client carries the per-call request timeout and, when TLS material
/// is configured, the cluster's CA and client identity.
pub fn build_http_client(
    tls: Option<&TlsConfig>,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(request_timeout);

    if let Some(tls) = tls {
        let material = TlsMaterial::load(tls)?;
        let ca = reqwest::Certificate::from_pem(&material.ca)
            .map_err(|e| SwitchError::Config(format!("Invalid TLS CA certificate: {}", e)))?;
        let identity = reqwest::Identity::from_pem(&material.identity_pem())
            .map_err(|e| SwitchError::Config(format!("Invalid TLS client identity: {}", e)))?;
        builder = builder.add_root_certificate(ca).identity(identity);
    }

    builder
        .build()
        .map_err(|e| SwitchError::Internal(format!("Failed to build HTTP client: {}", e)))
}
