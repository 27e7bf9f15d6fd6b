//! Server configuration: YAML file with environment variable overrides,
//! converted into `voice_core::GatewayConfig`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use voice_core::GatewayConfig;

/// Server-binary-level configuration wrapper. Deserializes into the same
/// shape as `GatewayConfig` since the server has no config concerns the
/// core library doesn't already model; it exists as its own type so
/// YAML/CLI loading stays out of the library crate.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides (`VOICE_GATEWAY_*`, see `voice_core::config`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.gateway.apply_env_overrides();
        Ok(config)
    }
}
