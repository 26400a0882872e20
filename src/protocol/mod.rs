//! Packet codec
//!
//! Decodes raw frames into the small set of views the controller acts on
//! (Ethernet addressing, ARP, IPv4 addressing) and encodes ARP frames.
//! Nothing outside this module touches byte offsets.

pub mod arp;
pub mod ethernet;
pub mod ipv4;
pub mod types;

pub use types::*;

use crate::Result;
use arp::ArpPacket;
use ethernet::{Frame, FrameBuilder};
use ipv4::Ipv4Header;
use std::net::Ipv4Addr;

/// Layer-3 view of a decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Arp(ArpPacket),
    Ipv4(Ipv4Summary),
    /// LLDP/BDDP topology discovery
    Discovery,
    /// Any other ethertype, forwarded as opaque L2
    Other(u16),
}

/// Addressing fields of an IPv4 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Summary {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub ethertype: u16,
    pub payload: Payload,
}

impl Packet {
    pub fn ipv4(&self) -> Option<&Ipv4Summary> {
        match &self.payload {
            Payload::Ipv4(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn arp(&self) -> Option<&ArpPacket> {
        match &self.payload {
            Payload::Arp(arp) => Some(arp),
            _ => None,
        }
    }

    pub fn is_discovery(&self) -> bool {
        matches!(self.payload, Payload::Discovery)
    }
}

/// Decode a raw Ethernet frame
///
/// Fails when the Ethernet header is short, or when the ethertype promises
/// an ARP/IPv4 header that is missing, malformed or fails its checksum.
pub fn decode(data: &[u8]) -> Result<Packet> {
    let frame = Frame::parse(data)?;
    let ethertype = frame.ethertype();

    let payload = match EtherType::from_u16(ethertype) {
        Some(EtherType::Arp) => Payload::Arp(ArpPacket::parse(frame.payload())?),
        Some(EtherType::Ipv4) => {
            let header = Ipv4Header::parse(frame.payload())?;
            Payload::Ipv4(Ipv4Summary {
                src: header.src_addr(),
                dst: header.dst_addr(),
                protocol: header.protocol(),
            })
        }
        Some(kind) if kind.is_discovery() => Payload::Discovery,
        _ => Payload::Other(ethertype),
    };

    Ok(Packet {
        src_mac: frame.src_mac(),
        dst_mac: frame.dst_mac(),
        ethertype,
        payload,
    })
}

/// Encode an ARP reply frame, unicast to the requester
pub fn encode_arp_reply(
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    requester_mac: MacAddr,
    requester_ip: Ipv4Addr,
) -> Vec<u8> {
    let reply = ArpPacket::reply(sender_mac, sender_ip, requester_mac, requester_ip);
    FrameBuilder::new()
        .dst_mac(requester_mac)
        .src_mac(sender_mac)
        .ethertype(EtherType::Arp as u16)
        .payload(&reply.to_bytes())
        .build()
}

/// Encode a broadcast ARP request frame
pub fn encode_arp_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let request = ArpPacket::request(sender_mac, sender_ip, target_ip);
    FrameBuilder::new()
        .dst_mac(MacAddr::BROADCAST)
        .src_mac(sender_mac)
        .ethertype(EtherType::Arp as u16)
        .payload(&request.to_bytes())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::arp::ArpOp;
    use crate::protocol::ipv4::Ipv4Builder;

    const CLIENT: MacAddr = MacAddr([0, 0, 0, 0, 0, 0x02]);
    const SERVER: MacAddr = MacAddr([0, 0, 0, 0, 0, 0x04]);

    #[test]
    fn test_decode_arp_request() {
        let frame = encode_arp_request(
            CLIENT,
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 42),
        );
        let packet = decode(&frame).unwrap();

        assert_eq!(packet.src_mac, CLIENT);
        assert_eq!(packet.dst_mac, MacAddr::BROADCAST);
        let arp = packet.arp().unwrap();
        assert!(arp.is_request());
        assert_eq!(arp.target_ip, Ipv4Addr::new(10, 0, 0, 42));
        assert!(packet.ipv4().is_none());
    }

    #[test]
    fn test_decode_ipv4() {
        let ip = Ipv4Builder::new()
            .src_addr(Ipv4Addr::new(10, 0, 0, 2))
            .dst_addr(Ipv4Addr::new(10, 0, 0, 42))
            .protocol(6)
            .build();
        let frame = FrameBuilder::new()
            .dst_mac(SERVER)
            .src_mac(CLIENT)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&ip)
            .build();

        let packet = decode(&frame).unwrap();
        assert_eq!(
            packet.ipv4(),
            Some(&Ipv4Summary {
                src: Ipv4Addr::new(10, 0, 0, 2),
                dst: Ipv4Addr::new(10, 0, 0, 42),
                protocol: 6,
            })
        );
    }

    #[test]
    fn test_decode_lldp_is_discovery() {
        let frame = FrameBuilder::new()
            .dst_mac(MacAddr([0x01, 0x80, 0xc2, 0, 0, 0x0e]))
            .src_mac(CLIENT)
            .ethertype(EtherType::Lldp as u16)
            .payload(&[0u8; 8])
            .build();

        assert!(decode(&frame).unwrap().is_discovery());
    }

    #[test]
    fn test_decode_other_ethertype() {
        let frame = FrameBuilder::new()
            .dst_mac(SERVER)
            .src_mac(CLIENT)
            .ethertype(0x1234)
            .build();

        assert_eq!(decode(&frame).unwrap().payload, Payload::Other(0x1234));
    }

    #[test]
    fn test_decode_truncated_ipv4_fails() {
        let frame = FrameBuilder::new()
            .dst_mac(SERVER)
            .src_mac(CLIENT)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&[0x45, 0, 0])
            .build();

        assert!(decode(&frame).is_err());
    }

    #[test]
    fn test_decode_short_frame_fails() {
        assert!(decode(&[0u8; 6]).is_err());
    }

    #[test]
    fn test_encode_arp_reply() {
        let frame = encode_arp_reply(
            SERVER,
            Ipv4Addr::new(10, 0, 0, 42),
            CLIENT,
            Ipv4Addr::new(10, 0, 0, 2),
        );
        let packet = decode(&frame).unwrap();

        assert_eq!(packet.dst_mac, CLIENT);
        assert_eq!(packet.src_mac, SERVER);
        let arp = packet.arp().unwrap();
        assert_eq!(arp.operation, ArpOp::Reply);
        assert_eq!(arp.sender_mac, SERVER);
        assert_eq!(arp.sender_ip, Ipv4Addr::new(10, 0, 0, 42));
        assert_eq!(arp.target_mac, CLIENT);
        assert_eq!(arp.target_ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_decode_bad_ipv4_checksum_fails() {
        let mut ip = Ipv4Builder::new()
            .src_addr(Ipv4Addr::new(10, 0, 0, 2))
            .dst_addr(Ipv4Addr::new(10, 0, 0, 42))
            .protocol(6)
            .build();
        // Rewrite the destination without fixing the checksum
        ip[19] = 43;
        let frame = FrameBuilder::new()
            .dst_mac(SERVER)
            .src_mac(CLIENT)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(&ip)
            .build();

        assert!(decode(&frame).is_err());
    }
}
