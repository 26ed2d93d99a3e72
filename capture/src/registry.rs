// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Interface registry: which interfaces we capture on, and how each one
//! is doing.

use crate::engine::CaptureError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-interface counters, shared between the capture thread and the
/// status surface. All counters are monotonic; snapshots are cheap.
#[derive(Debug)]
pub struct IfaceStats {
    name: String,
    ifindex: u32,
    started_at: Instant,
    frames_captured: AtomicU64,
    bytes_captured: AtomicU64,
    frames_dropped: AtomicU64,
    parse_errors: AtomicU64,
    last_frame_unix: AtomicU64,
    active: AtomicBool,
}

impl IfaceStats {
    #[must_use]
    pub fn new(name: &str, ifindex: u32) -> Self {
        IfaceStats {
            name: name.to_owned(),
            ifindex,
            started_at: Instant::now(),
            frames_captured: AtomicU64::new(0),
            bytes_captured: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            last_frame_unix: AtomicU64::new(0),
            active: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn record_frame(&self, bytes: usize) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        self.bytes_captured
            .fetch_add(bytes as u64, Ordering::Relaxed);
        #[allow(clippy::cast_sign_loss)]
        self.last_frame_unix
            .store(chrono::Utc::now().timestamp().max(0) as u64, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    #[must_use]
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> IfaceStatsSnapshot {
        let uptime_s = self.started_at.elapsed().as_secs_f64();
        let captured = self.frames_captured.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let packet_rate = if uptime_s > 0.0 {
            captured as f64 / uptime_s
        } else {
            0.0
        };
        IfaceStatsSnapshot {
            interface: self.name.clone(),
            ifindex: self.ifindex,
            frames_captured: captured,
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            last_frame_unix: self.last_frame_unix.load(Ordering::Relaxed),
            packet_rate,
            uptime_s,
            is_active: self.active.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of an interface's counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IfaceStatsSnapshot {
    pub interface: String,
    pub ifindex: u32,
    pub frames_captured: u64,
    pub bytes_captured: u64,
    pub frames_dropped: u64,
    pub parse_errors: u64,
    pub last_frame_unix: u64,
    pub packet_rate: f64,
    pub uptime_s: f64,
    pub is_active: bool,
}

/// Registry of monitored interfaces.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    inner: Mutex<HashMap<String, Arc<IfaceStats>>>,
}

impl InterfaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        InterfaceRegistry::default()
    }

    /// Enumerate capturable interfaces on this host, skipping loopback.
    #[must_use]
    pub fn discover() -> Vec<(String, u32)> {
        let found: Vec<(String, u32)> = netdev::get_interfaces()
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| (iface.name, iface.index))
            .collect();
        info!("discovered {} capturable interfaces", found.len());
        found
    }

    /// Resolve the ifindex of a named interface.
    pub fn resolve_ifindex(name: &str) -> Result<u32, CaptureError> {
        netdev::get_interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .map(|iface| iface.index)
            .ok_or_else(|| CaptureError::UnknownInterface(name.to_owned()))
    }

    /// Register an interface for monitoring.
    pub fn add(&self, name: &str, ifindex: u32) -> Result<Arc<IfaceStats>, CaptureError> {
        let mut inner = self.inner.lock();
        if inner.contains_key(name) {
            warn!(interface = name, "interface already registered");
            return Err(CaptureError::DuplicateInterface(name.to_owned()));
        }
        let stats = Arc::new(IfaceStats::new(name, ifindex));
        inner.insert(name.to_owned(), stats.clone());
        debug!(interface = name, ifindex, "registered interface");
        Ok(stats)
    }

    /// Drop an interface from monitoring. Returns false when unknown.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.inner.lock().remove(name).is_some();
        if removed {
            debug!(interface = name, "removed interface");
        } else {
            warn!(interface = name, "interface not registered");
        }
        removed
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<IfaceStats>> {
        self.inner.lock().get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<IfaceStatsSnapshot> {
        let mut out: Vec<IfaceStatsSnapshot> = self
            .inner
            .lock()
            .values()
            .map(|stats| stats.snapshot())
            .collect();
        out.sort_by(|a, b| a.interface.cmp(&b.interface));
        out
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_remove_and_duplicates() {
        let registry = InterfaceRegistry::new();
        let stats = registry.add("eth0", 2).unwrap();
        stats.record_frame(60);
        stats.record_frame(60);
        stats.record_drop();
        assert!(matches!(
            registry.add("eth0", 2),
            Err(CaptureError::DuplicateInterface(_))
        ));
        let snap = registry.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].frames_captured, 2);
        assert_eq!(snap[0].bytes_captured, 120);
        assert_eq!(snap[0].frames_dropped, 1);
        assert!(registry.remove("eth0"));
        assert!(!registry.remove("eth0"));
    }

    #[test]
    fn snapshot_rate_is_finite() {
        let stats = IfaceStats::new("eth1", 3);
        stats.record_frame(42);
        let snap = stats.snapshot();
        assert!(snap.packet_rate.is_finite());
        assert!(snap.is_active);
    }
}
