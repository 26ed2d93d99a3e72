// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]

//! Wire-level types for the ARP sensor.
//!
//! This crate owns the transient frame model shared by the capture,
//! dispatch and detection crates: the [`Mac`] address type, the parsed
//! [`ArpPacket`], and the [`Frame`] that ties a packet to its ingress
//! interface and capture timestamps.

pub mod arp;
pub mod frame;
pub mod mac;

pub use arp::{ArpOpcode, ArpPacket, FrameParseError};
pub use frame::{Frame, InterfaceId};
pub use mac::{Mac, MacFromStringError, Oui};
