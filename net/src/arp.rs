// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! ARP packet parsing.
//!
//! The sensor only ever inspects Ethernet II frames carrying ARP over
//! IPv4 (hardware type 1, protocol type 0x0800, 6/4 address lengths).
//! Anything else is rejected with a typed error so the capture engine can
//! distinguish "filtered" from "malformed".

use crate::mac::Mac;
use std::net::Ipv4Addr;

/// EtherType of ARP payloads.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// EtherType of an 802.1Q tag; a single tag is skipped transparently.
pub const ETHERTYPE_VLAN: u16 = 0x8100;

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const ARP_BODY_LEN: usize = 28;

/// ARP operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ArpOpcode {
    /// Who-has (opcode 1).
    Request,
    /// Is-at (opcode 2).
    Reply,
    /// Any other opcode, preserved verbatim.
    Other(u16),
}

impl ArpOpcode {
    #[must_use]
    pub fn from_wire(raw: u16) -> Self {
        match raw {
            1 => ArpOpcode::Request,
            2 => ArpOpcode::Reply,
            other => ArpOpcode::Other(other),
        }
    }

    #[must_use]
    pub fn as_u16(&self) -> u16 {
        match self {
            ArpOpcode::Request => 1,
            ArpOpcode::Reply => 2,
            ArpOpcode::Other(other) => *other,
        }
    }

    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, ArpOpcode::Request)
    }

    #[must_use]
    pub fn is_reply(&self) -> bool {
        matches!(self, ArpOpcode::Reply)
    }
}

/// Errors which can occur while parsing a raw frame into an [`ArpPacket`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameParseError {
    /// Frame shorter than the headers it claims to carry.
    #[error("frame truncated at {0} bytes")]
    Truncated(usize),
    /// EtherType is not ARP. This is the filter path, not a fault.
    #[error("not an ARP frame (ethertype {0:#06x})")]
    NotArp(u16),
    /// Hardware type other than Ethernet.
    #[error("unsupported ARP hardware type {0}")]
    BadHardwareType(u16),
    /// Protocol type other than IPv4.
    #[error("unsupported ARP protocol type {0:#06x}")]
    BadProtocolType(u16),
    /// Address lengths other than 6/4.
    #[error("unexpected ARP address lengths (hw {0}, proto {1})")]
    BadAddressLen(u8, u8),
}

/// A parsed ARP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub opcode: ArpOpcode,
    /// Sender hardware address.
    pub sender_mac: Mac,
    /// Sender protocol address.
    pub sender_ip: Ipv4Addr,
    /// Target hardware address.
    pub target_mac: Mac,
    /// Target protocol address.
    pub target_ip: Ipv4Addr,
}

fn read_u16_be(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_mac(buf: &[u8], at: usize) -> Mac {
    Mac([
        buf[at],
        buf[at + 1],
        buf[at + 2],
        buf[at + 3],
        buf[at + 4],
        buf[at + 5],
    ])
}

fn read_ipv4(buf: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(buf[at], buf[at + 1], buf[at + 2], buf[at + 3])
}

impl ArpPacket {
    /// Parse the 28-byte ARP body.
    pub fn parse(body: &[u8]) -> Result<Self, FrameParseError> {
        if body.len() < ARP_BODY_LEN {
            return Err(FrameParseError::Truncated(body.len()));
        }
        let htype = read_u16_be(body, 0);
        if htype != 1 {
            return Err(FrameParseError::BadHardwareType(htype));
        }
        let ptype = read_u16_be(body, 2);
        if ptype != 0x0800 {
            return Err(FrameParseError::BadProtocolType(ptype));
        }
        let (hlen, plen) = (body[4], body[5]);
        if (hlen, plen) != (6, 4) {
            return Err(FrameParseError::BadAddressLen(hlen, plen));
        }
        Ok(ArpPacket {
            opcode: ArpOpcode::from_wire(read_u16_be(body, 6)),
            sender_mac: read_mac(body, 8),
            sender_ip: read_ipv4(body, 14),
            target_mac: read_mac(body, 18),
            target_ip: read_ipv4(body, 24),
        })
    }

    /// Gratuitous announcement: sender and target protocol addresses match.
    #[must_use]
    pub fn is_announcement(&self) -> bool {
        self.sender_ip == self.target_ip
    }
}

/// Parsed Ethernet II header fields relevant to the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthHeader {
    pub destination: Mac,
    pub source: Mac,
    pub ethertype: u16,
    /// Offset of the payload within the raw frame.
    pub payload_at: usize,
}

impl EthHeader {
    /// Parse an Ethernet II header, transparently skipping one 802.1Q tag.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameParseError> {
        if raw.len() < ETH_HEADER_LEN {
            return Err(FrameParseError::Truncated(raw.len()));
        }
        let destination = read_mac(raw, 0);
        let source = read_mac(raw, 6);
        let mut ethertype = read_u16_be(raw, 12);
        let mut payload_at = ETH_HEADER_LEN;
        if ethertype == ETHERTYPE_VLAN {
            if raw.len() < ETH_HEADER_LEN + VLAN_TAG_LEN {
                return Err(FrameParseError::Truncated(raw.len()));
            }
            ethertype = read_u16_be(raw, 16);
            payload_at += VLAN_TAG_LEN;
        }
        Ok(EthHeader {
            destination,
            source,
            ethertype,
            payload_at,
        })
    }
}
