//! Configuration validation

use super::{parse_ipv4, parse_mac, Config, SelectionConfig, DEFAULT_STATS_INTERVAL_SECS};
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_controller(config, &mut result);
    validate_logging(config, &mut result);
    validate_load_balancer(config, &mut result);
    validate_firewall(config, &mut result);

    result
}

fn validate_controller(config: &Config, result: &mut ValidationResult) {
    let controller = &config.controller;

    if controller.listen.parse::<SocketAddr>().is_err() {
        result.error(format!(
            "controller.listen: '{}' is not a socket address",
            controller.listen
        ));
    }

    match controller.stats_interval_secs {
        None => result.warn(format!(
            "controller.stats_interval_secs not specified, using default {}",
            DEFAULT_STATS_INTERVAL_SECS
        )),
        Some(0) => result.error("controller.stats_interval_secs: must be greater than zero"),
        Some(_) => {}
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    let Some(logging) = &config.logging else {
        return;
    };

    if logging.level().is_none() {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            logging.level
        ));
    }
    if logging.format().is_none() {
        result.warn(format!(
            "logging.format: unknown format '{}', using pretty",
            logging.format
        ));
    }
}

fn validate_load_balancer(config: &Config, result: &mut ValidationResult) {
    let Some(lb) = &config.load_balancer else {
        result.error("load_balancer: section is required");
        return;
    };

    let virtual_ip = match parse_ipv4("load_balancer.virtual_ip", &lb.virtual_ip) {
        Ok(ip) => Some(ip),
        Err(e) => {
            result.error(e.to_string());
            None
        }
    };

    if lb.backends.is_empty() {
        result.error("load_balancer.backends: at least one backend is required");
    }

    let mut macs = HashSet::new();
    for (i, backend) in lb.backends.iter().enumerate() {
        let field = format!("load_balancer.backends[{}]", i);

        match parse_ipv4(&format!("{}.ip", field), &backend.ip) {
            Ok(ip) if Some(ip) == virtual_ip => {
                result.error(format!("{}.ip: backend cannot use the virtual IP", field))
            }
            Ok(_) => {}
            Err(e) => result.error(e.to_string()),
        }

        match parse_mac(&format!("{}.mac", field), &backend.mac) {
            Ok(mac) if !mac.is_unicast() => {
                result.error(format!("{}.mac: {} is not a unicast address", field, mac))
            }
            Ok(mac) => {
                if !macs.insert(mac) {
                    result.error(format!("{}.mac: {} is used by another backend", field, mac));
                }
            }
            Err(e) => result.error(e.to_string()),
        }
    }

    if lb.selection == SelectionConfig::MacParity && lb.backends.len() > 2 {
        result.warn(format!(
            "load_balancer.selection: mac-parity only reaches the first two of {} backends",
            lb.backends.len()
        ));
    }

    if lb.devices.as_ref().is_some_and(|d| d.is_empty()) {
        result.warn("load_balancer.devices: empty list, the balancer runs on no device");
    }
}

fn validate_firewall(config: &Config, result: &mut ValidationResult) {
    let blocked = parse_pairs("firewall.blocked", &config.firewall.blocked, result);
    let allowed = parse_pairs("firewall.allowed", &config.firewall.allowed, result);

    for (a, b) in allowed.iter() {
        let overlaps = blocked
            .iter()
            .any(|(x, y)| (x, y) == (a, b) || (x, y) == (b, a));
        if overlaps {
            result.warn(format!(
                "firewall: pair ({}, {}) is both blocked and allowed, blocking wins",
                a, b
            ));
        }
    }
}

fn parse_pairs(
    field: &str,
    pairs: &[[String; 2]],
    result: &mut ValidationResult,
) -> Vec<(Ipv4Addr, Ipv4Addr)> {
    let mut parsed = Vec::new();

    for (i, [a, b]) in pairs.iter().enumerate() {
        let entry = format!("{}[{}]", field, i);
        match (parse_ipv4(&entry, a), parse_ipv4(&entry, b)) {
            (Ok(a), Ok(b)) => {
                if a == b {
                    result.warn(format!("{}: pair names the same host {} twice", entry, a));
                }
                parsed.push((a, b));
            }
            (Err(e), _) | (_, Err(e)) => result.error(e.to_string()),
        }
    }

    parsed
}
