//! Configuration types

use crate::telemetry::LogConfig;
use serde::Deserialize;

/// Default southbound listen address
pub const DEFAULT_LISTEN: &str = "0.0.0.0:6653";

/// Default interval between statistics dumps
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 30;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub logging: Option<LogConfig>,
    #[serde(default)]
    pub load_balancer: Option<LoadBalancerConfig>,
    #[serde(default)]
    pub firewall: FirewallConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub stats_interval_secs: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            stats_interval_secs: None,
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadBalancerConfig {
    pub virtual_ip: String,
    #[serde(default)]
    pub selection: SelectionConfig,
    /// Devices the balancer runs on; absent means every device
    #[serde(default)]
    pub devices: Option<Vec<u64>>,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionConfig {
    #[default]
    MacParity,
    RoundRobin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub ip: String,
    pub mac: String,
    pub port: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FirewallConfig {
    /// Host pairs whose traffic is dropped, in either direction
    #[serde(default)]
    pub blocked: Vec<[String; 2]>,
    /// Host pairs switched without load-balancer handling
    #[serde(default)]
    pub allowed: Vec<[String; 2]>,
}
