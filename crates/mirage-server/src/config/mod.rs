//! Engine configuration and environment file loading.

mod listen;

pub use listen::TlsConfig;

use crate::environment::Environment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings shared by every environment the engine runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Address environments bind to
    #[serde(default = "listen::default_host")]
    pub host: String,
    /// Request log capacity per environment
    #[serde(default = "default_max_logs")]
    pub max_logs_per_environment: usize,
    /// Certificate and key used by https environments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    /// Upper bound for one proxied upstream exchange
    #[serde(default = "default_proxy_timeout_secs")]
    pub proxy_timeout_secs: u64,
}

fn default_max_logs() -> usize {
    100
}

fn default_proxy_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: listen::default_host(),
            max_logs_per_environment: default_max_logs(),
            tls: None,
            proxy_timeout_secs: default_proxy_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.host.trim().is_empty() {
            anyhow::bail!("'host' must not be empty");
        }
        if self.proxy_timeout_secs == 0 {
            anyhow::bail!("'proxy_timeout_secs' must be greater than zero");
        }
        if let Some(tls) = &self.tls {
            if tls.cert_path.trim().is_empty() || tls.key_path.trim().is_empty() {
                anyhow::bail!(
                    "TLS configuration requires both 'tls.cert_path' and 'tls.key_path'"
                );
            }
        }
        Ok(())
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }
}

/// Load environments from a JSON or YAML file.
///
/// The file may hold a single environment or a list of them.
pub fn load_environments<P: AsRef<Path>>(path: P) -> Result<Vec<Environment>, anyhow::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<Environment>),
        One(Box<Environment>),
    }

    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read environment file '{}': {e}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed: OneOrMany = if is_json {
        serde_json::from_str(&contents)?
    } else {
        serde_yaml::from_str(&contents)?
    };

    let mut environments = match parsed {
        OneOrMany::Many(list) => list,
        OneOrMany::One(env) => vec![*env],
    };
    for env in &mut environments {
        env.refresh_duplicates();
    }
    Ok(environments)
}
