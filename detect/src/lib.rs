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

//! Rule-based and statistical ARP analyzers.
//!
//! Three stages inspect every frame:
//!
//! - [`DfaFilter`]: deterministic rules — IP↔MAC binding conflicts and
//!   gratuitous floods. The primary spoofing signal.
//! - [`ArpAnalyzer`]: stateful semantics per sender — gratuitous/probe
//!   classification, inter-arrival timing, request↔reply correlation,
//!   and a weighted anomaly score.
//! - [`VendorChecker`]: OUI heuristics over source and destination MACs.
//!
//! Stages emit [`Detection`]s; the daemon decides precedence and turns
//! them into stored alerts.

pub mod analyzer;
pub mod dfa;
pub mod module;
pub mod vendor;

pub use analyzer::{AnalyzerStatsSnapshot, ArpAnalyzer, PacketInfo, ScoredAnomalies, TimingFeatures};
pub use dfa::DfaFilter;
pub use module::{AlertModule, Detection, ModuleParseError};
pub use vendor::{VendorAssessment, VendorChecker, VendorStats};
