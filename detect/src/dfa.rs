// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Deterministic ARP rules: binding conflicts and gratuitous floods.

use crate::module::{AlertModule, Detection};
use dashmap::DashMap;
use net::{Frame, Mac};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default flood threshold K: more than this many gratuitous-window hits
/// raises a flood.
pub const DEFAULT_GRAT_THRESHOLD: usize = 5;
/// Default flood window W.
pub const DEFAULT_GRAT_WINDOW: Duration = Duration::from_secs(5);

/// The rule-based first stage of the pipeline.
///
/// Both maps are sharded (`DashMap`), so concurrent workers only contend
/// on frames that share a key bucket.
pub struct DfaFilter {
    bindings: DashMap<Ipv4Addr, Mac>,
    gratuitous: DashMap<Mac, VecDeque<Instant>>,
    threshold: usize,
    window: Duration,
}

impl Default for DfaFilter {
    fn default() -> Self {
        DfaFilter::new(DEFAULT_GRAT_THRESHOLD, DEFAULT_GRAT_WINDOW)
    }
}

impl DfaFilter {
    #[must_use]
    pub fn new(threshold: usize, window: Duration) -> Self {
        DfaFilter {
            bindings: DashMap::new(),
            gratuitous: DashMap::new(),
            threshold,
            window,
        }
    }

    /// Apply the rules to one frame. Window arithmetic runs over the
    /// frame's monotonic ingress timestamp, not processing time.
    pub fn check(&self, frame: &Frame) -> Option<Detection> {
        self.check_at(frame, frame.captured_at)
    }

    /// Rule order matters and is part of the contract: a binding conflict
    /// fires first (and rebinds); only conflict-free frames feed the
    /// gratuitous counter.
    pub fn check_at(&self, frame: &Frame, now: Instant) -> Option<Detection> {
        let sender_ip = frame.arp.sender_ip;
        let sender_mac = frame.arp.sender_mac;

        // Rule 1: IP-MAC mapping conflict.
        let conflict = {
            let mut bound = self.bindings.entry(sender_ip).or_insert(sender_mac);
            if *bound == sender_mac {
                None
            } else {
                let prev = *bound;
                *bound = sender_mac;
                Some(prev)
            }
        };
        if let Some(prev) = conflict {
            debug!(ip = %sender_ip, prev = %prev, new = %sender_mac, "binding conflict");
            let mut detection = Detection::new(
                AlertModule::Dfa,
                format!("IP-MAC conflict: {sender_ip} previous {prev} now {sender_mac}"),
            )
            .with_source(Some(sender_ip), Some(sender_mac));
            detection.detail("ip", json!(sender_ip.to_string()));
            detection.detail("prev_mac", json!(prev.to_string()));
            detection.detail("new_mac", json!(sender_mac.to_string()));
            return Some(detection);
        }

        // Rule 2: gratuitous flood per source MAC within the window.
        let count = {
            let mut deque = self.gratuitous.entry(sender_mac).or_default();
            deque.push_back(now);
            while let Some(front) = deque.front() {
                if now.duration_since(*front) > self.window {
                    deque.pop_front();
                } else {
                    break;
                }
            }
            deque.len()
        };
        if count > self.threshold {
            let window_s = self.window.as_secs();
            let mut detection = Detection::new(
                AlertModule::Dfa,
                format!("Excessive gratuitous ARPs from {sender_mac} ({count} in {window_s}s)"),
            )
            .with_source(Some(sender_ip), Some(sender_mac));
            detection.detail("mac", json!(sender_mac.to_string()));
            detection.detail("count", Value::from(count));
            return Some(detection);
        }

        None
    }

    /// Number of tracked IP→MAC bindings.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Drop gratuitous deques whose newest entry fell out of the window.
    /// Called by the maintenance task to keep the key space bounded.
    pub fn sweep(&self, now: Instant) -> usize {
        let window = self.window;
        let before = self.gratuitous.len();
        self.gratuitous.retain(|_, deque| {
            deque
                .back()
                .is_some_and(|latest| now.duration_since(*latest) <= window)
        });
        before - self.gratuitous.len()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use net::{ArpOpcode, ArpPacket, InterfaceId};

    fn reply(sender_mac: Mac, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Frame {
        Frame::new(
            InterfaceId::new(1),
            sender_mac,
            Mac::BROADCAST,
            ArpPacket {
                opcode: ArpOpcode::Reply,
                sender_mac,
                sender_ip,
                target_mac: Mac::ZERO,
                target_ip,
            },
        )
    }

    // Scenario: two replies for the same IP from different MACs raise
    // exactly one conflict alert, naming both MACs.
    #[test]
    fn binding_conflict_fires_once_per_change() {
        let filter = DfaFilter::default();
        let ip = Ipv4Addr::new(192, 168, 1, 1);
        let target = Ipv4Addr::new(192, 168, 1, 50);
        let first = Mac::try_from("AA:BB:CC:11:22:33").unwrap();
        let second = Mac::try_from("BA:DD:C0:FF:EE:00").unwrap();

        assert!(filter.check(&reply(first, ip, target)).is_none());
        let detection = filter.check(&reply(second, ip, target)).unwrap();
        assert_eq!(detection.module, AlertModule::Dfa);
        assert!(detection.reason.starts_with(
            "IP-MAC conflict: 192.168.1.1 previous AA:BB:CC:11:22:33 now BA:DD:C0:FF:EE:00"
        ));
        assert_eq!(detection.src_ip, Some(ip));
        assert_eq!(detection.src_mac, Some(second));
        assert_eq!(
            detection.details.get("prev_mac").unwrap(),
            "AA:BB:CC:11:22:33"
        );
        // same MAC again: binding now points at `second`, no new alert
        assert!(filter.check(&reply(second, ip, target)).is_none());
    }

    // Scenario: ten gratuitous replies inside the window trip the flood
    // rule once the deque exceeds the threshold.
    #[test]
    fn gratuitous_flood_after_threshold() {
        let filter = DfaFilter::new(5, Duration::from_secs(5));
        let mac = Mac::try_from("DE:AD:BE:EF:CA:FE").unwrap();
        let ip = Ipv4Addr::new(192, 168, 1, 66);
        let base = Instant::now();

        let mut alerts = Vec::new();
        for n in 0..10u64 {
            let at = base + Duration::from_millis(n * 300);
            if let Some(detection) = filter.check_at(&reply(mac, ip, ip), at) {
                alerts.push(detection);
            }
        }
        assert!(!alerts.is_empty());
        let first = &alerts[0];
        assert!(first.reason.contains("Excessive gratuitous ARPs"));
        assert_eq!(first.details.get("mac").unwrap(), "DE:AD:BE:EF:CA:FE");
        let count = first.details.get("count").unwrap().as_u64().unwrap();
        assert!((6..=10).contains(&count));
    }

    // Window property: entries older than W never count toward the flood.
    #[test]
    fn flood_window_is_bounded() {
        let filter = DfaFilter::new(5, Duration::from_secs(5));
        let mac = Mac([2, 0, 0, 0, 0, 7]);
        let ip = Ipv4Addr::new(10, 0, 0, 7);
        let base = Instant::now();

        // 5 frames spaced 2s apart: at most 3 ever share a 5s window
        for n in 0..5u64 {
            let at = base + Duration::from_secs(n * 2);
            assert!(filter.check_at(&reply(mac, ip, ip), at).is_none());
        }
    }

    #[test]
    fn sweep_drops_stale_sources() {
        let filter = DfaFilter::new(5, Duration::from_secs(5));
        let base = Instant::now();
        for seq in 0..4u8 {
            let mac = Mac([2, 0, 0, 0, 0, seq]);
            let ip = Ipv4Addr::new(10, 0, 1, seq);
            filter.check_at(&reply(mac, ip, ip), base);
        }
        let removed = filter.sweep(base + Duration::from_secs(30));
        assert_eq!(removed, 4);
    }
}
