//! Static host-pair firewall policy
//!
//! Classifies IPv4 flows by their (source, destination) host pair. Pairs are
//! unordered: a rule for (A, B) covers traffic in both directions.

use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Policy verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Discard the frame, install nothing
    Drop,
    /// Skip virtual-IP handling and switch normally
    Allow,
    /// No policy applies
    Unspecified,
}

/// Unordered pair of host addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPair {
    low: Ipv4Addr,
    high: Ipv4Addr,
}

impl HostPair {
    pub fn new(a: Ipv4Addr, b: Ipv4Addr) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn hosts(&self) -> (Ipv4Addr, Ipv4Addr) {
        (self.low, self.high)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    blocked: HashSet<HostPair>,
    allowed: HashSet<HostPair>,
}

impl PolicyEngine {
    pub fn new(
        blocked: impl IntoIterator<Item = HostPair>,
        allowed: impl IntoIterator<Item = HostPair>,
    ) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Classify a flow. Blocking takes precedence over allowing.
    pub fn classify(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Verdict {
        let pair = HostPair::new(src, dst);

        if self.blocked.contains(&pair) {
            Verdict::Drop
        } else if self.allowed.contains(&pair) {
            Verdict::Allow
        } else {
            Verdict::Unspecified
        }
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    pub fn allowed_count(&self) -> usize {
        self.allowed.len()
    }
}
