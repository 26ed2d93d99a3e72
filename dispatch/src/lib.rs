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

//! Frame dispatcher and worker pool.
//!
//! The dispatcher owns N worker lanes, each a bounded FIFO feeding one
//! worker thread running the analyzer chain. Frames are routed by one of
//! three [`Strategy`] values chosen at construction time. A full lane
//! drops the frame and counts it; nothing in this crate ever blocks on a
//! slow worker.

pub mod dispatcher;
pub mod strategy;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherStats, LaneSnapshot};
pub use strategy::{Strategy, StrategyParseError};
pub use worker::{FrameHandler, Lane, LaneStats, WorkerPool, spawn_workers};
