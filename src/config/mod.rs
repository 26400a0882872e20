//! Configuration management
//!
//! config.toml is deserialized into raw [`Config`] values, checked by
//! [`validate`], and turned into typed runtime [`Settings`].

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::dataplane::{Backend, HostPair, LoadBalancer, PolicyEngine, Selection, VirtualService};
use crate::flow::DeviceId;
use crate::protocol::MacAddr;
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

/// Parse configuration from TOML text
pub fn parse(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

pub(crate) fn parse_ipv4(field: &str, value: &str) -> Result<Ipv4Addr> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{}: invalid IPv4 address '{}'", field, value)))
}

pub(crate) fn parse_mac(field: &str, value: &str) -> Result<MacAddr> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{}: '{}': {}", field, value, e)))
}

/// Typed runtime settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub stats_interval: Duration,
    pub logging: Option<LogConfig>,
    pub service: VirtualService,
    pub selection: Selection,
    pub devices: Option<Vec<DeviceId>>,
    pub policy: PolicyEngine,
}

impl Settings {
    /// Build settings, failing on any validation error
    pub fn from_config(config: &Config) -> Result<Self> {
        let result = validate(config);
        if result.has_errors() {
            return Err(Error::Config(result.errors.join("; ")));
        }

        let lb = config
            .load_balancer
            .as_ref()
            .ok_or_else(|| Error::Config("load_balancer: section is required".into()))?;

        let virtual_ip = parse_ipv4("load_balancer.virtual_ip", &lb.virtual_ip)?;
        let backends = lb
            .backends
            .iter()
            .map(|b| {
                Ok(Backend {
                    ip: parse_ipv4("load_balancer.backends.ip", &b.ip)?,
                    mac: parse_mac("load_balancer.backends.mac", &b.mac)?,
                    port: b.port,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let service = VirtualService::new(virtual_ip, backends).ok_or_else(|| {
            Error::Config("load_balancer.backends: at least one backend is required".into())
        })?;

        let selection = match lb.selection {
            SelectionConfig::MacParity => Selection::MacParity,
            SelectionConfig::RoundRobin => Selection::RoundRobin,
        };

        let listen = config.controller.listen.parse().map_err(|_| {
            Error::Config(format!(
                "controller.listen: '{}' is not a socket address",
                config.controller.listen
            ))
        })?;
        let stats_interval = Duration::from_secs(
            config
                .controller
                .stats_interval_secs
                .unwrap_or(DEFAULT_STATS_INTERVAL_SECS),
        );

        let policy = PolicyEngine::new(
            host_pairs("firewall.blocked", &config.firewall.blocked)?,
            host_pairs("firewall.allowed", &config.firewall.allowed)?,
        );

        Ok(Self {
            listen,
            stats_interval,
            logging: config.logging.clone(),
            service,
            selection,
            devices: lb.devices.clone(),
            policy,
        })
    }

    pub fn load_balancer(&self) -> LoadBalancer {
        let lb = LoadBalancer::new(self.service.clone(), self.selection);
        match &self.devices {
            Some(devices) => lb.with_devices(devices.iter().copied()),
            None => lb,
        }
    }
}

fn host_pairs(field: &str, pairs: &[[String; 2]]) -> Result<Vec<HostPair>> {
    pairs
        .iter()
        .map(|[a, b]| Ok(HostPair::new(parse_ipv4(field, a)?, parse_ipv4(field, b)?)))
        .collect()
}
