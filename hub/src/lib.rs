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

//! The broadcast hub: many-to-many push of alert events.
//!
//! Each subscriber owns a bounded queue. Broadcasting is a non-blocking
//! enqueue: a full queue evicts its oldest event (counted), and a
//! subscriber that overflows for long enough is disconnected. Slow
//! subscribers cost themselves events, never producer throughput.

pub mod events;
pub mod hub;

pub use events::AlertEvent;
pub use hub::{BroadcastHub, HubConfig, HubStats, SubscriberSnapshot, Subscription};
