//! Flow rules and southbound commands
//!
//! A flow rule is a device-resident match→actions instruction. The
//! controller never talks to a device except through [`Command`]s.

mod table;

pub use table::FlowTable;

use crate::protocol::{MacAddr, Packet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Forwarding device identifier (datapath id)
pub type DeviceId = u64;

/// Device port number
pub type PortNo = u32;

/// Priority bands used by the controller
pub mod priority {
    /// Table-miss rule: everything unmatched goes to the controller
    pub const BASE: u16 = 0;
    /// Rules installed by the learning switch
    pub const LEARNED_UNICAST: u16 = 10;
    /// Virtual-IP rewrite rules
    pub const LOAD_BALANCER: u16 = 20;
}

/// Header fields a rule can match on. `None` is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_port: Option<PortNo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_type: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_src: Option<MacAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eth_dst: Option<MacAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_src: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_dst: Option<Ipv4Addr>,
}

impl FlowMatch {
    /// Match everything
    pub fn any() -> Self {
        Self::default()
    }

    pub fn in_port(mut self, port: PortNo) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn eth_type(mut self, eth_type: u16) -> Self {
        self.eth_type = Some(eth_type);
        self
    }

    pub fn eth_src(mut self, mac: MacAddr) -> Self {
        self.eth_src = Some(mac);
        self
    }

    pub fn eth_dst(mut self, mac: MacAddr) -> Self {
        self.eth_dst = Some(mac);
        self
    }

    pub fn ip_proto(mut self, proto: u8) -> Self {
        self.ip_proto = Some(proto);
        self
    }

    pub fn ipv4_src(mut self, addr: Ipv4Addr) -> Self {
        self.ipv4_src = Some(addr);
        self
    }

    pub fn ipv4_dst(mut self, addr: Ipv4Addr) -> Self {
        self.ipv4_dst = Some(addr);
        self
    }

    /// Check whether a frame's header fields satisfy every set field
    pub fn matches(&self, fields: &PacketFields) -> bool {
        fn field<T: PartialEq>(want: &Option<T>, have: &Option<T>) -> bool {
            want.as_ref().map_or(true, |w| have.as_ref() == Some(w))
        }

        self.in_port.map_or(true, |p| p == fields.in_port)
            && self.eth_type.map_or(true, |t| t == fields.eth_type)
            && self.eth_src.map_or(true, |m| m == fields.eth_src)
            && self.eth_dst.map_or(true, |m| m == fields.eth_dst)
            && field(&self.ip_proto, &fields.ip_proto)
            && field(&self.ipv4_src, &fields.ipv4_src)
            && field(&self.ipv4_dst, &fields.ipv4_dst)
    }
}

/// Where an emitted frame or a rule sends traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    Port(PortNo),
    /// All ports except the ingress port
    Flood,
    Controller,
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Port(port) => write!(f, "port {}", port),
            Output::Flood => write!(f, "flood"),
            Output::Controller => write!(f, "controller"),
        }
    }
}

/// Rule actions, applied in order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    SetIpv4Src(Ipv4Addr),
    SetIpv4Dst(Ipv4Addr),
    Output(Output),
}

/// Why a rule exists. Echoed back by the device when it rejects a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKey {
    Base,
    Learned,
    LbForward,
    LbReverse,
}

impl RuleKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKey::Base => "base",
            RuleKey::Learned => "learned",
            RuleKey::LbForward => "lb-forward",
            RuleKey::LbReverse => "lb-reverse",
        }
    }

    pub fn is_load_balancer(&self) -> bool {
        matches!(self, RuleKey::LbForward | RuleKey::LbReverse)
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "base" => Ok(RuleKey::Base),
            "learned" => Ok(RuleKey::Learned),
            "lb-forward" => Ok(RuleKey::LbForward),
            "lb-reverse" => Ok(RuleKey::LbReverse),
            other => Err(crate::Error::Parse(format!("unknown rule key '{}'", other))),
        }
    }
}

/// A flow rule as sent to a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowRule {
    pub priority: u16,
    #[serde(rename = "match")]
    pub matcher: FlowMatch,
    pub actions: Vec<FlowAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_key: Option<RuleKey>,
}

impl FlowRule {
    pub fn new(priority: u16, matcher: FlowMatch, actions: Vec<FlowAction>) -> Self {
        Self {
            priority,
            matcher,
            actions,
            rule_key: None,
        }
    }

    pub fn with_key(mut self, key: RuleKey) -> Self {
        self.rule_key = Some(key);
        self
    }

    /// Apply the rule's actions to a frame
    ///
    /// Returns the rewritten header fields and every output the frame is
    /// sent to.
    pub fn apply(&self, fields: &PacketFields) -> (PacketFields, Vec<Output>) {
        let mut rewritten = fields.clone();
        let mut outputs = Vec::new();

        for action in &self.actions {
            match action {
                FlowAction::SetIpv4Src(addr) => rewritten.ipv4_src = Some(*addr),
                FlowAction::SetIpv4Dst(addr) => rewritten.ipv4_dst = Some(*addr),
                FlowAction::Output(out) => outputs.push(*out),
            }
        }

        (rewritten, outputs)
    }
}

/// Header fields of a frame as seen by a device's flow table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketFields {
    pub in_port: PortNo,
    pub eth_type: u16,
    pub eth_src: MacAddr,
    pub eth_dst: MacAddr,
    pub ip_proto: Option<u8>,
    pub ipv4_src: Option<Ipv4Addr>,
    pub ipv4_dst: Option<Ipv4Addr>,
}

impl PacketFields {
    pub fn from_packet(in_port: PortNo, packet: &Packet) -> Self {
        let ipv4 = packet.ipv4();
        Self {
            in_port,
            eth_type: packet.ethertype,
            eth_src: packet.src_mac,
            eth_dst: packet.dst_mac,
            ip_proto: ipv4.map(|ip| ip.protocol),
            ipv4_src: ipv4.map(|ip| ip.src),
            ipv4_dst: ipv4.map(|ip| ip.dst),
        }
    }
}

/// Frame contents for an emit request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Data(Vec<u8>),
    /// Frame held in the device's buffer
    Buffered(u32),
}

/// A southbound request produced by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    InstallRule {
        device: DeviceId,
        rule: FlowRule,
        /// Release this buffered frame through the new rule
        buffer_id: Option<u32>,
    },
    EmitFrame {
        device: DeviceId,
        in_port: Option<PortNo>,
        output: Output,
        payload: FramePayload,
    },
}

impl Command {
    pub fn device(&self) -> DeviceId {
        match self {
            Command::InstallRule { device, .. } | Command::EmitFrame { device, .. } => *device,
        }
    }

    pub fn rule(&self) -> Option<&FlowRule> {
        match self {
            Command::InstallRule { rule, .. } => Some(rule),
            Command::EmitFrame { .. } => None,
        }
    }
}
