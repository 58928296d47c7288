//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{InitialFill, LimiterSettings, RegistryKind, DEFAULT_BURST, DEFAULT_RATE};

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Per-client rate limiting configuration.
///
/// Read once at startup; changing it requires a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Sustained rate in tokens per second
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Burst capacity (maximum tokens held by one client)
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Token count a client starts with
    #[serde(default)]
    pub initial_fill: InitialFill,

    /// Registry implementation backing the client map
    #[serde(default)]
    pub registry: RegistryKind,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
            initial_fill: InitialFill::default(),
            registry: RegistryKind::default(),
        }
    }
}

fn default_rate() -> f64 {
    DEFAULT_RATE
}

fn default_burst() -> u32 {
    DEFAULT_BURST
}

impl RateLimitingConfig {
    /// Limiter settings shared by every client bucket.
    pub fn settings(&self) -> LimiterSettings {
        LimiterSettings {
            rate: self.rate,
            burst: self.burst,
            initial_fill: self.initial_fill,
        }
    }
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Reject settings that would produce a limiter that can never admit.
    pub fn validate(&self) -> Result<()> {
        let rate = self.rate_limiting.rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(GatekeeperError::Config(format!(
                "rate must be a positive number of tokens per second, got {}",
                rate
            )));
        }
        if self.rate_limiting.burst == 0 {
            return Err(GatekeeperError::Config(
                "burst must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
