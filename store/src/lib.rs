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

//! Durable state: the alert log, its archive lifecycle, and the local
//! threat-indicator table.
//!
//! Persistence records never leak out of this crate: rows are hydrated
//! into domain types at the query boundary, and alerts are append-only —
//! a stored alert is copied into the archive table, never mutated.

pub mod alerts;
pub mod archive;
pub(crate) mod db;
pub mod intel;

pub use alerts::{Alert, AlertStore, AlertStoreStats, NewAlert, StoreError};
pub use archive::{ArchiveReason, ArchivedAlert};
pub use intel::{
    IndicatorSeverity, IndicatorType, IndicatorUpdate, NewIndicator, ThreatIndicator,
    ThreatIntelStats, ThreatIntelStore,
};
