// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! The transient frame record flowing through the pipeline.

use crate::arp::{ArpPacket, ETHERTYPE_ARP, EthHeader, FrameParseError};
use crate::mac::Mac;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::time::Instant;

/// Identifier of a capture interface, matching the kernel ifindex.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct InterfaceId(u32);

impl InterfaceId {
    #[must_use]
    pub fn new(id: u32) -> Self {
        InterfaceId(id)
    }

    #[must_use]
    pub fn get_id(&self) -> u32 {
        self.0
    }
}

impl Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ARP frame as captured from the wire, tagged with its ingress
/// interface and both a monotonic and a wall-clock capture timestamp.
#[derive(Debug, Clone)]
pub struct Frame {
    pub iface: InterfaceId,
    /// Monotonic ingress timestamp; all window arithmetic uses this.
    pub captured_at: Instant,
    /// Wall-clock capture time, for alerts and persistence.
    pub wall: DateTime<Utc>,
    /// Ethernet source address.
    pub eth_src: Mac,
    /// Ethernet destination address.
    pub eth_dst: Mac,
    pub arp: ArpPacket,
}

impl Frame {
    /// Build a frame from already-parsed parts, stamping it now.
    #[must_use]
    pub fn new(iface: InterfaceId, eth_src: Mac, eth_dst: Mac, arp: ArpPacket) -> Self {
        Frame {
            iface,
            captured_at: Instant::now(),
            wall: Utc::now(),
            eth_src,
            eth_dst,
            arp,
        }
    }

    /// Parse a raw link-layer frame captured on `iface`.
    ///
    /// Non-ARP EtherTypes surface as [`FrameParseError::NotArp`]; the
    /// capture engine treats that as filtered traffic rather than a fault.
    pub fn parse(iface: InterfaceId, raw: &[u8]) -> Result<Self, FrameParseError> {
        let eth = EthHeader::parse(raw)?;
        if eth.ethertype != ETHERTYPE_ARP {
            return Err(FrameParseError::NotArp(eth.ethertype));
        }
        let arp = ArpPacket::parse(&raw[eth.payload_at..])?;
        Ok(Frame {
            iface,
            captured_at: Instant::now(),
            wall: Utc::now(),
            eth_src: eth.source,
            eth_dst: eth.destination,
            arp,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::arp::{ArpOpcode, ETHERTYPE_VLAN};
    use std::net::Ipv4Addr;

    fn raw_reply(sender_mac: Mac, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
        let mut raw = Vec::with_capacity(42);
        raw.extend_from_slice(&Mac::BROADCAST.0);
        raw.extend_from_slice(&sender_mac.0);
        raw.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        raw.extend_from_slice(&1u16.to_be_bytes());
        raw.extend_from_slice(&0x0800u16.to_be_bytes());
        raw.push(6);
        raw.push(4);
        raw.extend_from_slice(&2u16.to_be_bytes());
        raw.extend_from_slice(&sender_mac.0);
        raw.extend_from_slice(&sender_ip.octets());
        raw.extend_from_slice(&Mac::ZERO.0);
        raw.extend_from_slice(&target_ip.octets());
        raw
    }

    #[test]
    fn parse_tags_interface_and_addresses() {
        let sender = Mac([0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]);
        let raw = raw_reply(
            sender,
            Ipv4Addr::new(192, 168, 1, 66),
            Ipv4Addr::new(192, 168, 1, 66),
        );
        let frame = Frame::parse(InterfaceId::new(3), &raw).unwrap();
        assert_eq!(frame.iface.get_id(), 3);
        assert_eq!(frame.eth_src, sender);
        assert_eq!(frame.eth_dst, Mac::BROADCAST);
        assert_eq!(frame.arp.opcode, ArpOpcode::Reply);
        assert!(frame.arp.is_announcement());
    }

    #[test]
    fn parse_rejects_non_arp_as_filtered() {
        let sender = Mac([2, 0, 0, 0, 0, 1]);
        let mut raw = raw_reply(sender, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        raw[12] = 0x86;
        raw[13] = 0xDD; // ipv6
        assert_eq!(
            Frame::parse(InterfaceId::new(1), &raw).unwrap_err(),
            FrameParseError::NotArp(0x86DD)
        );
        assert_ne!(0x86DD, ETHERTYPE_VLAN);
    }
}
