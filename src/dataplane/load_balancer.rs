//! Virtual-IP load balancer
//!
//! Answers ARP for the virtual address on behalf of a backend, then
//! installs a forward and a reverse rewrite rule per client so the rest of
//! the flow stays on the device.

use crate::flow::{priority, DeviceId, FlowAction, FlowMatch, FlowRule, Output, PortNo, RuleKey};
use crate::protocol::arp::{ArpOp, ArpPacket};
use crate::protocol::{self, EtherType, MacAddr};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// A real server behind the virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backend {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    /// Device port the backend is reachable through
    pub port: PortNo,
}

/// The virtual address and its fixed, non-empty backend list
#[derive(Debug, Clone)]
pub struct VirtualService {
    virtual_ip: Ipv4Addr,
    backends: Vec<Backend>,
}

impl VirtualService {
    /// Returns `None` when `backends` is empty
    pub fn new(virtual_ip: Ipv4Addr, backends: Vec<Backend>) -> Option<Self> {
        if backends.is_empty() {
            return None;
        }
        Some(Self {
            virtual_ip,
            backends,
        })
    }

    pub fn virtual_ip(&self) -> Ipv4Addr {
        self.virtual_ip
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn backend_by_mac(&self, mac: &MacAddr) -> Option<&Backend> {
        self.backends.iter().find(|b| b.mac == *mac)
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// Even requester MAC picks backend 0, odd picks backend 1
    #[default]
    MacParity,
    /// Rotating cursor, advanced once per ARP request
    RoundRobin,
}

/// Identifies a client's redirect rule pair on one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingFlowKey {
    pub device: DeviceId,
    pub client_mac: MacAddr,
    pub client_ip: Ipv4Addr,
    pub virtual_ip: Ipv4Addr,
    pub ip_proto: u8,
}

/// Outcome of offering an ARP packet to the load balancer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArpDecision {
    /// Not a request for the virtual address
    NotHandled,
    /// Send this reply out the ingress port
    Reply { frame: Vec<u8>, backend: Backend },
}

/// A client frame addressed to the virtual IP
#[derive(Debug, Clone, Copy)]
pub struct RedirectRequest {
    pub device: DeviceId,
    pub ingress_port: PortNo,
    pub client_mac: MacAddr,
    pub client_ip: Ipv4Addr,
    pub ip_proto: u8,
}

#[derive(Debug)]
pub struct LoadBalancer {
    service: VirtualService,
    selection: Selection,
    cursor: usize,
    /// Devices the balancer runs on; `None` means all of them
    devices: Option<HashSet<DeviceId>>,
}

impl LoadBalancer {
    pub fn new(service: VirtualService, selection: Selection) -> Self {
        Self {
            service,
            selection,
            cursor: 0,
            devices: None,
        }
    }

    /// Restrict the balancer to the given devices
    pub fn with_devices(mut self, devices: impl IntoIterator<Item = DeviceId>) -> Self {
        self.devices = Some(devices.into_iter().collect());
        self
    }

    pub fn service(&self) -> &VirtualService {
        &self.service
    }

    pub fn virtual_ip(&self) -> Ipv4Addr {
        self.service.virtual_ip
    }

    pub fn applies_to(&self, device: DeviceId) -> bool {
        self.devices
            .as_ref()
            .map_or(true, |devices| devices.contains(&device))
    }

    /// Pick the backend that answers for this requester
    pub fn select_backend(&mut self, requester_mac: &MacAddr) -> Backend {
        let backends = &self.service.backends;
        let index = match self.selection {
            Selection::MacParity => {
                let parity = (requester_mac.to_u64() % 2) as usize;
                parity.min(backends.len() - 1)
            }
            Selection::RoundRobin => {
                let index = self.cursor % backends.len();
                self.cursor = self.cursor.wrapping_add(1);
                index
            }
        };
        backends[index]
    }

    /// Build the reply a backend would send, but sourced from the virtual IP
    pub fn build_arp_reply(
        &self,
        requester_ip: Ipv4Addr,
        requester_mac: MacAddr,
        backend: &Backend,
    ) -> Vec<u8> {
        protocol::encode_arp_reply(
            backend.mac,
            self.service.virtual_ip,
            requester_mac,
            requester_ip,
        )
    }

    /// Answer an ARP request for the virtual IP
    pub fn handle_arp(&mut self, arp: &ArpPacket) -> ArpDecision {
        if arp.operation != ArpOp::Request || arp.target_ip != self.service.virtual_ip {
            return ArpDecision::NotHandled;
        }

        let backend = self.select_backend(&arp.sender_mac);
        let frame = self.build_arp_reply(arp.sender_ip, arp.sender_mac, &backend);
        ArpDecision::Reply { frame, backend }
    }

    /// Forward and reverse rules steering a client to `backend`
    pub fn redirect_rules(&self, request: &RedirectRequest, backend: &Backend) -> [FlowRule; 2] {
        let virtual_ip = self.service.virtual_ip;

        let forward = FlowRule::new(
            priority::LOAD_BALANCER,
            FlowMatch::any()
                .in_port(request.ingress_port)
                .eth_type(EtherType::Ipv4 as u16)
                .ip_proto(request.ip_proto)
                .ipv4_dst(virtual_ip),
            vec![
                FlowAction::SetIpv4Dst(backend.ip),
                FlowAction::Output(Output::Port(backend.port)),
            ],
        )
        .with_key(RuleKey::LbForward);

        let reverse = FlowRule::new(
            priority::LOAD_BALANCER,
            FlowMatch::any()
                .in_port(backend.port)
                .eth_type(EtherType::Ipv4 as u16)
                .ip_proto(request.ip_proto)
                .ipv4_src(backend.ip)
                .eth_dst(request.client_mac),
            vec![
                FlowAction::SetIpv4Src(virtual_ip),
                FlowAction::Output(Output::Port(request.ingress_port)),
            ],
        )
        .with_key(RuleKey::LbReverse);

        [forward, reverse]
    }

    /// Derive the redirect rules for a client unless they already exist
    ///
    /// `pending` is the device's record of redirects already installed.
    /// Returns no rules on a repeat call for the same key.
    pub fn install_redirect(
        &self,
        pending: &mut HashSet<PendingFlowKey>,
        request: &RedirectRequest,
        backend: &Backend,
    ) -> Vec<FlowRule> {
        let key = self.pending_key(request);
        if !pending.insert(key) {
            return Vec::new();
        }
        self.redirect_rules(request, backend).into()
    }

    pub fn pending_key(&self, request: &RedirectRequest) -> PendingFlowKey {
        PendingFlowKey {
            device: request.device,
            client_mac: request.client_mac,
            client_ip: request.client_ip,
            virtual_ip: self.service.virtual_ip,
            ip_proto: request.ip_proto,
        }
    }
}
