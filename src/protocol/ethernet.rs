//! Ethernet frame parsing and construction

use super::MacAddr;
use crate::{Error, Result};

/// Ethernet header size (no 802.1Q tag)
pub const HEADER_SIZE: usize = 14;
/// Maximum Ethernet frame size (without FCS)
pub const MAX_FRAME_SIZE: usize = 1518;

/// Parsed Ethernet frame (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
    dst_mac: MacAddr,
    src_mac: MacAddr,
    ethertype: u16,
}

impl<'a> Frame<'a> {
    /// Parse an Ethernet frame from a buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("frame too short".into()));
        }

        let dst_mac = MacAddr::from_slice(buffer, 0)
            .ok_or_else(|| Error::Parse("frame too short".into()))?;
        let src_mac = MacAddr::from_slice(buffer, 6)
            .ok_or_else(|| Error::Parse("frame too short".into()))?;
        let ethertype = u16::from_be_bytes([buffer[12], buffer[13]]);

        Ok(Self {
            buffer,
            dst_mac,
            src_mac,
            ethertype,
        })
    }

    pub fn dst_mac(&self) -> MacAddr {
        self.dst_mac
    }

    pub fn src_mac(&self) -> MacAddr {
        self.src_mac
    }

    pub fn ethertype(&self) -> u16 {
        self.ethertype
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }
}

/// Builder for constructing Ethernet frames
///
/// Header fields are written in wire order by [`FrameBuilder::build`],
/// whatever order the setters were called in.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    dst_mac: MacAddr,
    src_mac: MacAddr,
    ethertype: u16,
    payload: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            dst_mac: MacAddr::BROADCAST,
            src_mac: MacAddr::ZERO,
            ethertype: 0,
            payload: Vec::new(),
        }
    }

    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.dst_mac = mac;
        self
    }

    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.src_mac = mac;
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.ethertype = ethertype;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity((HEADER_SIZE + self.payload.len()).min(MAX_FRAME_SIZE));
        buffer.extend_from_slice(&self.dst_mac.0);
        buffer.extend_from_slice(&self.src_mac.0);
        buffer.extend_from_slice(&self.ethertype.to_be_bytes());
        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new()
    }
}
