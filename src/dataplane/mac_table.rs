//! MAC learning table
//!
//! One table per device. Provides:
//! - MAC address learning from received frames (last write wins)
//! - Lookup for forwarding decisions
//! - Unknown unicast/broadcast flooding
//!
//! There is no aging: a binding lives until it is overwritten or the
//! device disconnects.

use crate::flow::PortNo;
use crate::protocol::MacAddr;
use std::collections::HashMap;

/// Result of a L2 forwarding decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2ForwardAction {
    /// Destination learned on another port
    Forward { port: PortNo },
    /// Unknown unicast, broadcast or multicast
    Flood,
    /// Destination sits behind the ingress port
    Filter,
}

#[derive(Debug, Default)]
pub struct MacTable {
    entries: HashMap<MacAddr, PortNo>,
}

impl MacTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `mac` is reachable through `port`
    ///
    /// Returns the previous port when the binding moved.
    pub fn learn(&mut self, mac: MacAddr, port: PortNo) -> Option<PortNo> {
        self.entries
            .insert(mac, port)
            .filter(|&previous| previous != port)
    }

    pub fn lookup(&self, mac: &MacAddr) -> Option<PortNo> {
        self.entries.get(mac).copied()
    }

    /// Make a forwarding decision for a frame
    pub fn forward(&self, dst_mac: &MacAddr, ingress_port: PortNo) -> L2ForwardAction {
        if dst_mac.is_multicast() {
            return L2ForwardAction::Flood;
        }

        match self.lookup(dst_mac) {
            Some(port) if port == ingress_port => L2ForwardAction::Filter,
            Some(port) => L2ForwardAction::Forward { port },
            None => L2ForwardAction::Flood,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC1: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    const MAC2: MacAddr = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x56]);

    #[test]
    fn test_learn_and_lookup() {
        let mut table = MacTable::new();

        assert_eq!(table.learn(MAC1, 1), None);
        assert_eq!(table.lookup(&MAC1), Some(1));
        assert_eq!(table.lookup(&MAC2), None);
    }

    #[test]
    fn test_lookup_independent_of_other_macs() {
        let mut table = MacTable::new();

        table.learn(MAC1, 1);
        table.learn(MAC2, 2);
        table.learn(MAC2, 3);

        assert_eq!(table.lookup(&MAC1), Some(1));
        assert_eq!(table.lookup(&MAC2), Some(3));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_mac_move_reports_previous_port() {
        let mut table = MacTable::new();

        table.learn(MAC1, 1);
        assert_eq!(table.learn(MAC1, 1), None);
        assert_eq!(table.learn(MAC1, 2), Some(1));
        assert_eq!(table.lookup(&MAC1), Some(2));
    }

    #[test]
    fn test_forward_known_unicast() {
        let mut table = MacTable::new();
        table.learn(MAC2, 2);

        assert_eq!(table.forward(&MAC2, 1), L2ForwardAction::Forward { port: 2 });
    }

    #[test]
    fn test_forward_unknown_unicast_floods() {
        let table = MacTable::new();
        assert_eq!(table.forward(&MAC2, 1), L2ForwardAction::Flood);
    }

    #[test]
    fn test_forward_broadcast_floods() {
        let mut table = MacTable::new();
        table.learn(MacAddr::BROADCAST, 3);

        assert_eq!(table.forward(&MacAddr::BROADCAST, 1), L2ForwardAction::Flood);
    }

    #[test]
    fn test_forward_same_port_filters() {
        let mut table = MacTable::new();
        table.learn(MAC1, 1);

        assert_eq!(table.forward(&MAC1, 1), L2ForwardAction::Filter);
    }

    #[test]
    fn test_clear() {
        let mut table = MacTable::new();
        table.learn(MAC1, 1);
        table.clear();

        assert!(table.is_empty());
        assert_eq!(table.lookup(&MAC1), None);
    }
}
