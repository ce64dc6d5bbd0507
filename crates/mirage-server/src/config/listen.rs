//! Listener and TLS configuration.

use serde::{Deserialize, Serialize};

/// TLS material for https environments
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_path: String,
    /// Path to TLS private key file (PEM format)
    pub key_path: String,
}

pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}
