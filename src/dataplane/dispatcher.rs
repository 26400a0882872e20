//! Controller dispatcher
//!
//! Owns every device's state and turns device events into southbound
//! commands. Each event runs to completion; nothing here performs I/O.
//!
//! Frame pipeline for a ready device:
//! 1. Decode, dropping malformed and topology discovery frames
//! 2. Learn the source MAC on the ingress port
//! 3. Classify the host pair against the firewall policy
//! 4. Offer ARP, then virtual-IP traffic, to the load balancer
//! 5. Fall back to the learning switch

use super::load_balancer::{ArpDecision, LoadBalancer, PendingFlowKey, RedirectRequest};
use super::mac_table::{L2ForwardAction, MacTable};
use super::policy::{PolicyEngine, Verdict};
use crate::flow::{
    priority, Command, DeviceId, FlowAction, FlowMatch, FlowRule, FramePayload, Output, PortNo,
    RuleKey,
};
use crate::protocol::{self, MacAddr, Packet};
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Session lifecycle of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Session open, handshake not finished
    Connecting,
    Ready,
}

/// Events delivered by the southbound layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(DeviceId),
    Ready(DeviceId),
    FrameReceived {
        device: DeviceId,
        in_port: PortNo,
        data: Vec<u8>,
        /// Set when the device kept a copy of the frame
        buffer_id: Option<u32>,
    },
    RuleRejected {
        device: DeviceId,
        rule_key: Option<RuleKey>,
        reason: String,
    },
    Disconnected(DeviceId),
}

impl DeviceEvent {
    pub fn device(&self) -> DeviceId {
        match self {
            DeviceEvent::Connected(device)
            | DeviceEvent::Ready(device)
            | DeviceEvent::Disconnected(device)
            | DeviceEvent::FrameReceived { device, .. }
            | DeviceEvent::RuleRejected { device, .. } => *device,
        }
    }
}

/// Controller-side state of one forwarding device
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    state: DeviceState,
    mac_table: MacTable,
    pending_flows: HashSet<PendingFlowKey>,
    /// Load-balancer rules sent to the device, by priority and match
    lb_rules: HashSet<(u16, FlowMatch)>,
}

impl Device {
    fn new(id: DeviceId) -> Self {
        Self {
            id,
            state: DeviceState::Connecting,
            mac_table: MacTable::new(),
            pending_flows: HashSet::new(),
            lb_rules: HashSet::new(),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn mac_table(&self) -> &MacTable {
        &self.mac_table
    }

    pub fn pending_flows(&self) -> &HashSet<PendingFlowKey> {
        &self.pending_flows
    }

    fn reset(&mut self) {
        self.state = DeviceState::Connecting;
        self.mac_table.clear();
        self.forget_redirects();
    }

    fn forget_redirects(&mut self) {
        self.pending_flows.clear();
        self.lb_rules.clear();
    }

    /// Learning-switch decision for a frame no other stage claimed
    fn switch(
        &self,
        packet: &Packet,
        in_port: PortNo,
        data: Vec<u8>,
        buffer_id: Option<u32>,
        metrics: &MetricsRegistry,
    ) -> Vec<Command> {
        match self.mac_table.forward(&packet.dst_mac, in_port) {
            L2ForwardAction::Forward { port } => {
                metrics.frames_forwarded.inc();
                trace!(
                    "device {}: {} -> {} via port {}",
                    self.id,
                    packet.src_mac,
                    packet.dst_mac,
                    port
                );

                let rule = FlowRule::new(
                    priority::LEARNED_UNICAST,
                    FlowMatch::any()
                        .in_port(in_port)
                        .eth_src(packet.src_mac)
                        .eth_dst(packet.dst_mac),
                    vec![FlowAction::Output(Output::Port(port))],
                )
                .with_key(RuleKey::Learned);

                let mut commands = vec![Command::InstallRule {
                    device: self.id,
                    rule,
                    buffer_id,
                }];
                // A buffered frame is released by the rule itself
                if buffer_id.is_none() {
                    commands.push(Command::EmitFrame {
                        device: self.id,
                        in_port: Some(in_port),
                        output: Output::Port(port),
                        payload: FramePayload::Data(data),
                    });
                }
                commands
            }
            L2ForwardAction::Flood => {
                metrics.frames_flooded.inc();
                trace!("device {}: flooding frame for {}", self.id, packet.dst_mac);

                let payload = match buffer_id {
                    Some(id) => FramePayload::Buffered(id),
                    None => FramePayload::Data(data),
                };
                vec![Command::EmitFrame {
                    device: self.id,
                    in_port: Some(in_port),
                    output: Output::Flood,
                    payload,
                }]
            }
            L2ForwardAction::Filter => {
                trace!(
                    "device {}: {} is behind ingress port {}, dropping",
                    self.id,
                    packet.dst_mac,
                    in_port
                );
                Vec::new()
            }
        }
    }
}

/// Sequences policy, load balancing and switching per device event
pub struct Dispatcher {
    devices: HashMap<DeviceId, Device>,
    policy: PolicyEngine,
    load_balancer: LoadBalancer,
    metrics: Arc<MetricsRegistry>,
}

impl Dispatcher {
    pub fn new(
        policy: PolicyEngine,
        load_balancer: LoadBalancer,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            devices: HashMap::new(),
            policy,
            load_balancer,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn ready_devices(&self) -> usize {
        self.devices
            .values()
            .filter(|d| d.state == DeviceState::Ready)
            .count()
    }

    /// Record a MAC binding on a ready device
    pub fn learn(&mut self, device: DeviceId, mac: MacAddr, port: PortNo) -> Result<()> {
        let device = self.ready_device_mut(device)?;
        device.mac_table.learn(mac, port);
        Ok(())
    }

    /// Port a MAC was last seen on, if the device is ready and knows it
    pub fn lookup(&self, device: DeviceId, mac: &MacAddr) -> Option<PortNo> {
        self.devices
            .get(&device)
            .filter(|d| d.state == DeviceState::Ready)
            .and_then(|d| d.mac_table.lookup(mac))
    }

    fn ready_device_mut(&mut self, id: DeviceId) -> Result<&mut Device> {
        self.devices
            .get_mut(&id)
            .filter(|d| d.state == DeviceState::Ready)
            .ok_or(Error::UnknownDevice(id))
    }

    /// Process one event to completion
    pub fn handle(&mut self, event: DeviceEvent) -> Vec<Command> {
        let commands = match event {
            DeviceEvent::Connected(id) => {
                self.on_connected(id);
                Vec::new()
            }
            DeviceEvent::Ready(id) => self.on_ready(id),
            DeviceEvent::FrameReceived {
                device,
                in_port,
                data,
                buffer_id,
            } => self.on_frame(device, in_port, data, buffer_id),
            DeviceEvent::RuleRejected {
                device,
                rule_key,
                reason,
            } => {
                self.on_rule_rejected(device, rule_key, &reason);
                Vec::new()
            }
            DeviceEvent::Disconnected(id) => {
                self.on_disconnected(id);
                Vec::new()
            }
        };

        self.record(&commands);
        commands
    }

    fn record(&self, commands: &[Command]) {
        for command in commands {
            match command {
                Command::InstallRule { device, .. } => {
                    self.metrics.rules_installed.inc();
                    self.metrics
                        .with_device(*device, |s| s.rules_installed.inc());
                }
                Command::EmitFrame { device, .. } => {
                    self.metrics.with_device(*device, |s| s.frames_emitted.inc());
                }
            }
        }
    }

    fn on_connected(&mut self, id: DeviceId) {
        if self.devices.insert(id, Device::new(id)).is_some() {
            info!("device {} reconnected, previous state discarded", id);
        } else {
            info!("device {} connected", id);
        }
        self.metrics.register_device(id);
        self.metrics.set_devices_ready(self.ready_devices());
    }

    fn on_ready(&mut self, id: DeviceId) -> Vec<Command> {
        let device = self.devices.entry(id).or_insert_with(|| Device::new(id));
        if device.state == DeviceState::Ready {
            info!("device {} ready again, resetting its state", id);
            device.reset();
        }
        device.state = DeviceState::Ready;

        self.metrics.register_device(id);
        self.metrics.with_device(id, |s| s.sessions.inc());
        self.metrics.set_devices_ready(self.ready_devices());
        info!("device {} ready, installing table-miss rule", id);

        let rule = FlowRule::new(
            priority::BASE,
            FlowMatch::any(),
            vec![FlowAction::Output(Output::Controller)],
        )
        .with_key(RuleKey::Base);

        vec![Command::InstallRule {
            device: id,
            rule,
            buffer_id: None,
        }]
    }

    fn on_disconnected(&mut self, id: DeviceId) {
        if self.devices.remove(&id).is_some() {
            info!("device {} disconnected, state discarded", id);
            self.metrics.set_devices_ready(self.ready_devices());
        } else {
            debug!("disconnect for unknown device {}", id);
        }
    }

    fn on_rule_rejected(&mut self, id: DeviceId, rule_key: Option<RuleKey>, reason: &str) {
        let metrics = Arc::clone(&self.metrics);
        let device = match self.ready_device_mut(id) {
            Ok(device) => device,
            Err(e) => {
                metrics.unknown_device_events.inc();
                debug!("rule rejection dropped: {}", e);
                return;
            }
        };

        let key = rule_key.map_or("none", |k| k.as_str());
        warn!("device {} rejected rule (key {}): {}", id, key, reason);

        if rule_key.is_some_and(|k| k.is_load_balancer()) {
            debug!(
                "device {}: forgetting {} redirect(s) so they are re-derived",
                id,
                device.pending_flows.len()
            );
            device.forget_redirects();
        }

        metrics.rules_rejected.inc();
        metrics.with_device(id, |s| s.rules_rejected.inc());
    }

    fn on_frame(
        &mut self,
        id: DeviceId,
        in_port: PortNo,
        data: Vec<u8>,
        buffer_id: Option<u32>,
    ) -> Vec<Command> {
        let metrics = Arc::clone(&self.metrics);

        let device = match self.devices.get_mut(&id) {
            Some(device) if device.state == DeviceState::Ready => device,
            _ => {
                metrics.unknown_device_events.inc();
                trace!("frame from device {} that is not ready, dropping", id);
                return Vec::new();
            }
        };

        metrics.frames_received.inc();
        metrics.with_device(id, |s| s.frames_received.inc());

        let packet = match protocol::decode(&data) {
            Ok(packet) => packet,
            Err(e) => {
                metrics.frames_malformed.inc();
                debug!("device {} port {}: malformed frame: {}", id, in_port, e);
                return Vec::new();
            }
        };

        if packet.is_discovery() {
            metrics.frames_ignored.inc();
            return Vec::new();
        }

        if let Some(previous) = device.mac_table.learn(packet.src_mac, in_port) {
            debug!(
                "device {}: {} moved from port {} to {}",
                id, packet.src_mac, previous, in_port
            );
        }

        let verdict = match packet.ipv4() {
            Some(ip) => self.policy.classify(ip.src, ip.dst),
            None => Verdict::Unspecified,
        };

        match verdict {
            Verdict::Drop => {
                metrics.policy_drops.inc();
                if let Some(ip) = packet.ipv4() {
                    debug!("device {}: policy drop {} <-> {}", id, ip.src, ip.dst);
                }
                return Vec::new();
            }
            Verdict::Allow => {
                return device.switch(&packet, in_port, data, buffer_id, &metrics);
            }
            Verdict::Unspecified => {}
        }

        let lb = &mut self.load_balancer;
        if lb.applies_to(id) {
            if let Some(arp) = packet.arp() {
                if let ArpDecision::Reply { frame, backend } = lb.handle_arp(arp) {
                    metrics.arp_replies_sent.inc();
                    debug!(
                        "device {}: answering ARP for {} from {} with backend {} ({})",
                        id,
                        lb.virtual_ip(),
                        arp.sender_ip,
                        backend.ip,
                        backend.mac
                    );
                    return vec![Command::EmitFrame {
                        device: id,
                        in_port: None,
                        output: Output::Port(in_port),
                        payload: FramePayload::Data(frame),
                    }];
                }
            }

            if let Some(ip) = packet.ipv4().filter(|ip| ip.dst == lb.virtual_ip()) {
                match lb.service().backend_by_mac(&packet.dst_mac).copied() {
                    Some(backend) => {
                        let request = RedirectRequest {
                            device: id,
                            ingress_port: in_port,
                            client_mac: packet.src_mac,
                            client_ip: ip.src,
                            ip_proto: ip.protocol,
                        };

                        let rules = lb.install_redirect(&mut device.pending_flows, &request, &backend);
                        if !rules.is_empty() {
                            metrics.redirects_installed.inc();
                            info!(
                                "device {}: redirecting {} ({}) to backend {} on port {}",
                                id, ip.src, packet.src_mac, backend.ip, backend.port
                            );
                        }

                        return rules
                            .into_iter()
                            .filter(|rule| {
                                device
                                    .lb_rules
                                    .insert((rule.priority, rule.matcher.clone()))
                            })
                            .map(|rule| Command::InstallRule {
                                device: id,
                                rule,
                                buffer_id: None,
                            })
                            .collect();
                    }
                    None => debug!(
                        "device {}: frame for {} addressed to {}, not a backend",
                        id,
                        lb.virtual_ip(),
                        packet.dst_mac
                    ),
                }
            }
        }

        device.switch(&packet, in_port, data, buffer_id, &metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::load_balancer::{Backend, Selection, VirtualService};
    use crate::dataplane::policy::HostPair;
    use crate::protocol::encode_arp_request;
    use crate::protocol::ethernet::FrameBuilder;
    use crate::protocol::ipv4::Ipv4Builder;
    use crate::protocol::EtherType;
    use std::net::Ipv4Addr;

    const VIP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 42);
    const H1: MacAddr = MacAddr([0, 0, 0, 0, 0, 0x01]);
    const H2: MacAddr = MacAddr([0, 0, 0, 0, 0, 0x02]);
    const B0: MacAddr = MacAddr([0, 0, 0, 0, 0, 0x04]);
    const B1: MacAddr = MacAddr([0, 0, 0, 0, 0, 0x05]);

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn dispatcher() -> Dispatcher {
        let service = VirtualService::new(
            VIP,
            vec![
                Backend { ip: ip(4), mac: B0, port: 4 },
                Backend { ip: ip(5), mac: B1, port: 4 },
            ],
        )
        .unwrap();
        Dispatcher::new(
            PolicyEngine::new([HostPair::new(ip(1), ip(4))], [HostPair::new(ip(2), ip(3))]),
            LoadBalancer::new(service, Selection::MacParity),
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn ready(dispatcher: &mut Dispatcher, id: DeviceId) -> Vec<Command> {
        dispatcher.handle(DeviceEvent::Connected(id));
        dispatcher.handle(DeviceEvent::Ready(id))
    }

    fn ipv4_frame(src_mac: MacAddr, dst_mac: MacAddr, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let ip = Ipv4Builder::new()
            .protocol(6)
            .src_addr(src)
            .dst_addr(dst)
            .payload(&[0u8; 20])
            .build();
        FrameBuilder::new()
            .src_mac(src_mac)
            .dst_mac(dst_mac)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&ip)
            .build()
    }

    fn frame(device: DeviceId, in_port: PortNo, data: Vec<u8>) -> DeviceEvent {
        DeviceEvent::FrameReceived {
            device,
            in_port,
            data,
            buffer_id: None,
        }
    }

    #[test]
    fn test_ready_installs_base_rule() {
        let mut d = dispatcher();
        let commands = ready(&mut d, 1);

        assert_eq!(commands.len(), 1);
        let rule = commands[0].rule().unwrap();
        assert_eq!(rule.priority, priority::BASE);
        assert_eq!(rule.matcher, FlowMatch::any());
        assert_eq!(rule.actions, vec![FlowAction::Output(Output::Controller)]);
        assert_eq!(rule.rule_key, Some(RuleKey::Base));
        assert_eq!(d.device(1).unwrap().state(), DeviceState::Ready);
    }

    #[test]
    fn test_ready_without_connect_creates_device() {
        let mut d = dispatcher();
        assert_eq!(d.handle(DeviceEvent::Ready(3)).len(), 1);
        assert_eq!(d.ready_devices(), 1);
    }

    #[test]
    fn test_frame_from_connecting_device_ignored() {
        let mut d = dispatcher();
        d.handle(DeviceEvent::Connected(1));

        let data = ipv4_frame(H1, H2, ip(1), ip(2));
        assert!(d.handle(frame(1, 1, data)).is_empty());
        assert_eq!(d.metrics().unknown_device_events.get(), 1);
        assert_eq!(d.lookup(1, &H1), None);
    }

    #[test]
    fn test_learn_requires_ready_device() {
        let mut d = dispatcher();
        assert!(matches!(d.learn(1, H1, 1), Err(Error::UnknownDevice(1))));

        ready(&mut d, 1);
        d.learn(1, H1, 7).unwrap();
        assert_eq!(d.lookup(1, &H1), Some(7));
    }

    #[test]
    fn test_malformed_frame_dropped() {
        let mut d = dispatcher();
        ready(&mut d, 1);

        assert!(d.handle(frame(1, 1, vec![0u8; 5])).is_empty());
        assert_eq!(d.metrics().frames_malformed.get(), 1);
    }

    #[test]
    fn test_corrupted_ipv4_header_dropped_before_learning() {
        let mut d = dispatcher();
        ready(&mut d, 1);

        let mut data = ipv4_frame(H2, B0, ip(2), VIP);
        // Source address byte inside the IPv4 header
        data[14 + 15] ^= 0x01;

        assert!(d.handle(frame(1, 1, data)).is_empty());
        assert_eq!(d.metrics().frames_malformed.get(), 1);
        assert_eq!(d.lookup(1, &H2), None);
        assert!(d.device(1).unwrap().pending_flows().is_empty());
    }

    #[test]
    fn test_discovery_frame_ignored_and_not_learned() {
        let mut d = dispatcher();
        ready(&mut d, 1);

        let lldp = FrameBuilder::new()
            .src_mac(H1)
            .dst_mac(MacAddr([0x01, 0x80, 0xc2, 0, 0, 0x0e]))
            .ethertype(EtherType::Lldp as u16)
            .payload(&[0u8; 46])
            .build();
        assert!(d.handle(frame(1, 1, lldp)).is_empty());
        assert_eq!(d.lookup(1, &H1), None);
        assert_eq!(d.metrics().frames_ignored.get(), 1);
    }

    #[test]
    fn test_unknown_destination_floods_and_learns() {
        let mut d = dispatcher();
        ready(&mut d, 1);

        let data = ipv4_frame(H1, H2, ip(1), ip(2));
        let commands = d.handle(frame(1, 1, data.clone()));

        assert_eq!(
            commands,
            vec![Command::EmitFrame {
                device: 1,
                in_port: Some(1),
                output: Output::Flood,
                payload: FramePayload::Data(data),
            }]
        );
        assert_eq!(d.lookup(1, &H1), Some(1));
    }

    #[test]
    fn test_known_destination_installs_learned_rule() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        d.handle(frame(1, 2, ipv4_frame(H2, H1, ip(2), ip(1))));

        let data = ipv4_frame(H1, H2, ip(1), ip(2));
        let commands = d.handle(frame(1, 1, data.clone()));

        assert_eq!(commands.len(), 2);
        let rule = commands[0].rule().unwrap();
        assert_eq!(rule.priority, priority::LEARNED_UNICAST);
        assert_eq!(
            rule.matcher,
            FlowMatch::any().in_port(1).eth_src(H1).eth_dst(H2)
        );
        assert_eq!(rule.actions, vec![FlowAction::Output(Output::Port(2))]);
        assert_eq!(
            commands[1],
            Command::EmitFrame {
                device: 1,
                in_port: Some(1),
                output: Output::Port(2),
                payload: FramePayload::Data(data),
            }
        );
    }

    #[test]
    fn test_buffered_frame_released_by_rule() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        d.handle(frame(1, 2, ipv4_frame(H2, H1, ip(2), ip(1))));

        let commands = d.handle(DeviceEvent::FrameReceived {
            device: 1,
            in_port: 1,
            data: ipv4_frame(H1, H2, ip(1), ip(2)),
            buffer_id: Some(77),
        });

        assert_eq!(commands.len(), 1);
        assert!(matches!(
            commands[0],
            Command::InstallRule { buffer_id: Some(77), .. }
        ));
    }

    #[test]
    fn test_hairpin_dropped() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        d.handle(frame(1, 1, ipv4_frame(H2, H1, ip(2), ip(1))));

        assert!(d.handle(frame(1, 1, ipv4_frame(H1, H2, ip(1), ip(2)))).is_empty());
    }

    #[test]
    fn test_blocked_pair_produces_nothing() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        d.learn(1, B0, 4).unwrap();
        d.learn(1, H1, 1).unwrap();

        assert!(d.handle(frame(1, 1, ipv4_frame(H1, B0, ip(1), ip(4)))).is_empty());
        assert!(d.handle(frame(1, 4, ipv4_frame(B0, H1, ip(4), ip(1)))).is_empty());
        assert_eq!(d.metrics().policy_drops.get(), 2);
    }

    #[test]
    fn test_arp_for_vip_answered_once() {
        let mut d = dispatcher();
        ready(&mut d, 1);

        let commands = d.handle(frame(1, 1, encode_arp_request(H2, ip(2), VIP)));
        assert_eq!(commands.len(), 1);

        let Command::EmitFrame { output, payload: FramePayload::Data(reply), .. } = &commands[0]
        else {
            panic!("expected an emitted ARP reply");
        };
        assert_eq!(*output, Output::Port(1));

        let packet = protocol::decode(reply).unwrap();
        assert_eq!(packet.dst_mac, H2);
        let arp = packet.arp().unwrap();
        assert_eq!(arp.sender_mac, B0);
        assert_eq!(arp.sender_ip, VIP);
        assert_eq!(d.metrics().arp_replies_sent.get(), 1);
    }

    #[test]
    fn test_arp_for_other_host_floods() {
        let mut d = dispatcher();
        ready(&mut d, 1);

        let commands = d.handle(frame(1, 1, encode_arp_request(H2, ip(2), ip(3))));
        assert!(matches!(
            commands[..],
            [Command::EmitFrame { output: Output::Flood, .. }]
        ));
    }

    #[test]
    fn test_vip_traffic_installs_redirect_once() {
        let mut d = dispatcher();
        ready(&mut d, 1);

        let data = ipv4_frame(H2, B0, ip(2), VIP);
        let commands = d.handle(frame(1, 1, data.clone()));

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].rule().unwrap().rule_key, Some(RuleKey::LbForward));
        assert_eq!(commands[1].rule().unwrap().rule_key, Some(RuleKey::LbReverse));
        assert!(commands
            .iter()
            .all(|c| c.rule().unwrap().priority == priority::LOAD_BALANCER));

        // Duplicate event: handled, nothing new
        assert!(d.handle(frame(1, 1, data)).is_empty());
        assert_eq!(d.device(1).unwrap().pending_flows().len(), 1);
        assert_eq!(d.metrics().redirects_installed.get(), 1);
    }

    #[test]
    fn test_second_client_same_port_shares_forward_rule() {
        let mut d = dispatcher();
        ready(&mut d, 1);

        d.handle(frame(1, 1, ipv4_frame(H2, B0, ip(2), VIP)));
        let commands = d.handle(frame(1, 1, ipv4_frame(H1, B1, ip(6), VIP)));

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].rule().unwrap().rule_key, Some(RuleKey::LbReverse));
    }

    #[test]
    fn test_vip_traffic_to_unknown_mac_falls_through() {
        let mut d = dispatcher();
        ready(&mut d, 1);

        let commands = d.handle(frame(1, 1, ipv4_frame(H2, H1, ip(2), VIP)));
        assert!(matches!(
            commands[..],
            [Command::EmitFrame { output: Output::Flood, .. }]
        ));
    }

    #[test]
    fn test_allowed_pair_skips_load_balancer() {
        let mut d = dispatcher();
        d.policy = PolicyEngine::new([], [HostPair::new(ip(2), VIP)]);
        ready(&mut d, 1);

        let commands = d.handle(frame(1, 1, ipv4_frame(H2, B0, ip(2), VIP)));
        assert!(matches!(
            commands[..],
            [Command::EmitFrame { output: Output::Flood, .. }]
        ));
        assert!(d.device(1).unwrap().pending_flows().is_empty());
    }

    #[test]
    fn test_scoped_balancer_ignores_other_devices() {
        let service = VirtualService::new(VIP, vec![Backend { ip: ip(4), mac: B0, port: 4 }]).unwrap();
        let mut d = Dispatcher::new(
            PolicyEngine::default(),
            LoadBalancer::new(service, Selection::MacParity).with_devices([1]),
            Arc::new(MetricsRegistry::new()),
        );
        ready(&mut d, 2);

        let commands = d.handle(frame(2, 1, encode_arp_request(H2, ip(2), VIP)));
        assert!(matches!(
            commands[..],
            [Command::EmitFrame { output: Output::Flood, .. }]
        ));
    }

    #[test]
    fn test_lb_rejection_forgets_redirects() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        let data = ipv4_frame(H2, B0, ip(2), VIP);
        d.handle(frame(1, 1, data.clone()));

        d.handle(DeviceEvent::RuleRejected {
            device: 1,
            rule_key: Some(RuleKey::LbForward),
            reason: "table full".into(),
        });
        assert!(d.device(1).unwrap().pending_flows().is_empty());
        assert_eq!(d.metrics().rules_rejected.get(), 1);

        assert_eq!(d.handle(frame(1, 1, data)).len(), 2);
    }

    #[test]
    fn test_learned_rejection_keeps_redirects() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        d.handle(frame(1, 1, ipv4_frame(H2, B0, ip(2), VIP)));

        d.handle(DeviceEvent::RuleRejected {
            device: 1,
            rule_key: Some(RuleKey::Learned),
            reason: "bad match".into(),
        });
        assert_eq!(d.device(1).unwrap().pending_flows().len(), 1);
    }

    #[test]
    fn test_disconnect_discards_state() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        let data = ipv4_frame(H2, B0, ip(2), VIP);
        d.handle(frame(1, 1, data.clone()));

        d.handle(DeviceEvent::Disconnected(1));
        assert!(d.device(1).is_none());
        assert!(d.handle(frame(1, 1, data.clone())).is_empty());

        assert_eq!(ready(&mut d, 1).len(), 1);
        assert_eq!(d.lookup(1, &H2), None);
        assert_eq!(d.handle(frame(1, 1, data)).len(), 2);
    }

    #[test]
    fn test_ready_twice_resets_state() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        d.learn(1, H1, 3).unwrap();

        let commands = d.handle(DeviceEvent::Ready(1));
        assert_eq!(commands[0].rule().unwrap().rule_key, Some(RuleKey::Base));
        assert_eq!(d.lookup(1, &H1), None);
    }

    #[test]
    fn test_devices_are_isolated() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        ready(&mut d, 2);

        d.learn(1, H1, 3).unwrap();
        assert_eq!(d.lookup(1, &H1), Some(3));
        assert_eq!(d.lookup(2, &H1), None);
        assert_eq!(d.device(2).unwrap().id(), 2);
        assert!(d.device(2).unwrap().mac_table().is_empty());
    }

    #[test]
    fn test_rules_installed_counted() {
        let mut d = dispatcher();
        ready(&mut d, 1);
        ready(&mut d, 2);

        assert_eq!(d.metrics().rules_installed.get(), 2);
        assert!(d
            .metrics()
            .export()
            .contains(&("device1_rules_installed".into(), 1)));
    }
}
