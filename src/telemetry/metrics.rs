//! Metrics collection for controller statistics.
//!
//! Provides thread-safe counters for tracking frame handling and rule
//! installation at both the global and per-device level.

use crate::flow::DeviceId;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-device statistics.
#[derive(Debug, Default)]
pub struct DeviceStats {
    /// Frames delivered by the device.
    pub frames_received: Counter,
    /// Rule installs sent to the device.
    pub rules_installed: Counter,
    /// Frames emitted through the device.
    pub frames_emitted: Counter,
    /// Rules the device refused.
    pub rules_rejected: Counter,
    /// Times the device reached the ready state.
    pub sessions: Counter,
}

/// Global metrics registry for the controller.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Per-device statistics, ordered by device id for stable export.
    devices: RwLock<BTreeMap<DeviceId, DeviceStats>>,

    // Frame intake
    /// Frames received from any device.
    pub frames_received: Counter,
    /// Frames that failed to decode.
    pub frames_malformed: Counter,
    /// Topology discovery frames discarded.
    pub frames_ignored: Counter,
    /// Events for devices that are not ready.
    pub unknown_device_events: Counter,

    // Policy
    /// Frames discarded by the firewall.
    pub policy_drops: Counter,

    // Load balancer
    /// ARP replies sent on behalf of the virtual IP.
    pub arp_replies_sent: Counter,
    /// Forward/reverse rule pairs installed.
    pub redirects_installed: Counter,

    // Switching
    /// Frames flooded for an unknown destination.
    pub frames_flooded: Counter,
    /// Frames forwarded to a learned port.
    pub frames_forwarded: Counter,

    // Southbound
    /// Rule installs sent to devices.
    pub rules_installed: Counter,
    /// Rule installs refused by devices.
    pub rules_rejected: Counter,

    /// Current number of ready devices.
    pub devices_ready: AtomicU64,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn devices_read(&self) -> RwLockReadGuard<'_, BTreeMap<DeviceId, DeviceStats>> {
        self.devices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn devices_write(&self) -> RwLockWriteGuard<'_, BTreeMap<DeviceId, DeviceStats>> {
        self.devices.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a device for statistics tracking.
    pub fn register_device(&self, device: DeviceId) {
        self.devices_write().entry(device).or_default();
    }

    /// Runs `f` against a device's stats if it is registered.
    pub fn with_device(&self, device: DeviceId, f: impl FnOnce(&DeviceStats)) {
        if let Some(stats) = self.devices_read().get(&device) {
            f(stats);
        }
    }

    /// Updates the ready devices gauge.
    pub fn set_devices_ready(&self, count: usize) {
        self.devices_ready.store(count as u64, Ordering::Relaxed);
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = vec![
            ("frames_received".into(), self.frames_received.get()),
            ("frames_malformed".into(), self.frames_malformed.get()),
            ("frames_ignored".into(), self.frames_ignored.get()),
            (
                "unknown_device_events".into(),
                self.unknown_device_events.get(),
            ),
            ("policy_drops".into(), self.policy_drops.get()),
            ("arp_replies_sent".into(), self.arp_replies_sent.get()),
            ("redirects_installed".into(), self.redirects_installed.get()),
            ("frames_flooded".into(), self.frames_flooded.get()),
            ("frames_forwarded".into(), self.frames_forwarded.get()),
            ("rules_installed".into(), self.rules_installed.get()),
            ("rules_rejected".into(), self.rules_rejected.get()),
            (
                "devices_ready".into(),
                self.devices_ready.load(Ordering::Relaxed),
            ),
        ];

        for (device, stats) in self.devices_read().iter() {
            result.extend([
                (
                    format!("device{}_frames_received", device),
                    stats.frames_received.get(),
                ),
                (
                    format!("device{}_rules_installed", device),
                    stats.rules_installed.get(),
                ),
                (
                    format!("device{}_frames_emitted", device),
                    stats.frames_emitted.get(),
                ),
                (
                    format!("device{}_rules_rejected", device),
                    stats.rules_rejected.get(),
                ),
                (format!("device{}_sessions", device), stats.sessions.get()),
            ]);
        }

        result
    }
}
