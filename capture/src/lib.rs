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

//! Live capture: interface registry and per-interface capture engines.
//!
//! Each monitored interface gets a packet socket, a dedicated capture
//! thread and a bounded drop-oldest [`FrameQueue`]. The dispatcher drains
//! the queues; a slow consumer costs frames (counted), never memory.

pub mod engine;
pub mod queue;
pub mod registry;

pub use engine::{CaptureError, CaptureHandle};
pub use queue::FrameQueue;
pub use registry::{IfaceStats, IfaceStatsSnapshot, InterfaceRegistry};
