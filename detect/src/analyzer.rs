// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Stateful per-sender ARP semantics and anomaly scoring.

use dashmap::DashMap;
use net::Frame;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default cap on per-sender history entries.
pub const DEFAULT_MAX_HISTORY: usize = 1000;
/// Default age after which unanswered requests are swept.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(300);

const RATE_ANOMALY_PPS: f64 = 10.0;
const RAPID_INTER_ARRIVAL: Duration = Duration::from_millis(100);

/// Enrichment of a frame with per-sender semantic features. The
/// request↔reply correlation outcome is computed here, once, while the
/// pending entry is consumed.
#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub sender_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
    pub opcode: net::ArpOpcode,
    pub is_gratuitous: bool,
    pub is_probe: bool,
    /// Zero on a sender's first frame.
    pub inter_arrival: Duration,
    pub unsolicited_reply: bool,
}

/// Per-sender timing statistics over the bounded history ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct TimingFeatures {
    pub min_inter_arrival: f64,
    pub max_inter_arrival: f64,
    pub avg_inter_arrival: f64,
    pub std_inter_arrival: f64,
    pub packet_rate: f64,
}

/// Result of scoring one [`PacketInfo`].
#[derive(Debug, Clone)]
pub struct ScoredAnomalies {
    /// Bounded sum of signal weights, in `[0, 1]`.
    pub severity: f64,
    pub anomalies: Vec<String>,
    pub timing: TimingFeatures,
}

#[derive(Debug)]
struct SenderState {
    last_seen: Instant,
    history: VecDeque<HistoryEntry>,
}

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    at: Instant,
    inter_arrival: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    requests: AtomicU64,
    replies: AtomicU64,
    gratuitous: AtomicU64,
    probes: AtomicU64,
    unsolicited_replies: AtomicU64,
    inter_arrival_sum_us: AtomicU64,
    inter_arrival_samples: AtomicU64,
}

/// Serializable analyzer counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalyzerStatsSnapshot {
    pub total_packets: u64,
    pub request_count: u64,
    pub reply_count: u64,
    pub gratuitous_count: u64,
    pub probe_count: u64,
    pub unsolicited_replies: u64,
    pub avg_inter_arrival: f64,
    pub tracked_senders: usize,
    pub pending_requests: usize,
}

/// Stateful ARP analyzer.
///
/// Sender state is sharded by source IP; the pending-request table is a
/// single small mutex-guarded map swept periodically.
pub struct ArpAnalyzer {
    senders: DashMap<Ipv4Addr, SenderState>,
    pending: Mutex<HashMap<(Ipv4Addr, Ipv4Addr), Instant>>,
    counters: Counters,
    max_history: usize,
    pending_ttl: Duration,
}

impl Default for ArpAnalyzer {
    fn default() -> Self {
        ArpAnalyzer::new(DEFAULT_MAX_HISTORY, DEFAULT_PENDING_TTL)
    }
}

impl ArpAnalyzer {
    #[must_use]
    pub fn new(max_history: usize, pending_ttl: Duration) -> Self {
        ArpAnalyzer {
            senders: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            max_history: max_history.max(1),
            pending_ttl,
        }
    }

    /// Derive per-sender features for one frame, updating analyzer
    /// state. Timing is measured at the frame's ingress timestamp.
    pub fn analyze(&self, frame: &Frame) -> PacketInfo {
        self.analyze_at(frame, frame.captured_at)
    }

    pub fn analyze_at(&self, frame: &Frame, now: Instant) -> PacketInfo {
        let arp = &frame.arp;
        let sender_ip = arp.sender_ip;

        let inter_arrival = {
            let mut state = self.senders.entry(sender_ip).or_insert_with(|| SenderState {
                last_seen: now,
                history: VecDeque::new(),
            });
            let inter_arrival = if state.history.is_empty() {
                Duration::ZERO
            } else {
                now.duration_since(state.last_seen)
            };
            state.last_seen = now;
            state.history.push_back(HistoryEntry { at: now, inter_arrival });
            while state.history.len() > self.max_history {
                state.history.pop_front();
            }
            inter_arrival
        };

        let is_gratuitous =
            arp.is_announcement() || (arp.opcode.is_reply() && frame.eth_dst.is_broadcast());
        let is_probe = arp.opcode.is_request() && arp.sender_ip == Ipv4Addr::UNSPECIFIED;

        let unsolicited_reply = if arp.opcode.is_request() {
            self.pending
                .lock()
                .insert((arp.sender_ip, arp.target_ip), now);
            false
        } else if arp.opcode.is_reply() {
            // a reply from S to T answers a request (T -> S)
            self.pending
                .lock()
                .remove(&(arp.target_ip, arp.sender_ip))
                .is_none()
        } else {
            false
        };

        self.update_counters(arp, is_gratuitous, is_probe, unsolicited_reply, inter_arrival);

        PacketInfo {
            sender_ip,
            target_ip: arp.target_ip,
            opcode: arp.opcode,
            is_gratuitous,
            is_probe,
            inter_arrival,
            unsolicited_reply,
        }
    }

    fn update_counters(
        &self,
        arp: &net::ArpPacket,
        is_gratuitous: bool,
        is_probe: bool,
        unsolicited_reply: bool,
        inter_arrival: Duration,
    ) {
        let c = &self.counters;
        c.total.fetch_add(1, Ordering::Relaxed);
        if arp.opcode.is_request() {
            c.requests.fetch_add(1, Ordering::Relaxed);
        } else if arp.opcode.is_reply() {
            c.replies.fetch_add(1, Ordering::Relaxed);
        }
        if is_gratuitous {
            c.gratuitous.fetch_add(1, Ordering::Relaxed);
        }
        if is_probe {
            c.probes.fetch_add(1, Ordering::Relaxed);
        }
        if unsolicited_reply {
            c.unsolicited_replies.fetch_add(1, Ordering::Relaxed);
        }
        if inter_arrival > Duration::ZERO {
            #[allow(clippy::cast_possible_truncation)]
            c.inter_arrival_sum_us
                .fetch_add(inter_arrival.as_micros() as u64, Ordering::Relaxed);
            c.inter_arrival_samples.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Timing statistics for a sender, from its bounded history ring.
    #[must_use]
    pub fn timing_features(&self, sender_ip: Ipv4Addr) -> TimingFeatures {
        let Some(state) = self.senders.get(&sender_ip) else {
            return TimingFeatures::default();
        };
        let history = &state.history;
        if history.len() < 2 {
            return TimingFeatures::default();
        }
        let inter_arrivals: Vec<f64> = history
            .iter()
            .filter(|entry| entry.inter_arrival > Duration::ZERO)
            .map(|entry| entry.inter_arrival.as_secs_f64())
            .collect();
        if inter_arrivals.is_empty() {
            return TimingFeatures::default();
        }
        let min = inter_arrivals.iter().copied().fold(f64::INFINITY, f64::min);
        let max = inter_arrivals.iter().copied().fold(0.0, f64::max);
        #[allow(clippy::cast_precision_loss)]
        let n = inter_arrivals.len() as f64;
        let avg = inter_arrivals.iter().sum::<f64>() / n;
        let variance = inter_arrivals
            .iter()
            .map(|value| (value - avg).powi(2))
            .sum::<f64>()
            / n;
        let span = history
            .back()
            .zip(history.front())
            .map(|(newest, oldest)| newest.at.duration_since(oldest.at).as_secs_f64())
            .unwrap_or_default();
        #[allow(clippy::cast_precision_loss)]
        let packet_rate = if span > 0.0 { history.len() as f64 / span } else { 0.0 };
        TimingFeatures {
            min_inter_arrival: min,
            max_inter_arrival: max,
            avg_inter_arrival: avg,
            std_inter_arrival: variance.sqrt(),
            packet_rate,
        }
    }

    /// Score a packet's anomaly signals. Weighted sum, capped at 1.0.
    #[must_use]
    pub fn score(&self, info: &PacketInfo) -> ScoredAnomalies {
        let mut severity: f64 = 0.0;
        let mut anomalies = Vec::new();

        if info.is_gratuitous {
            anomalies.push("Gratuitous ARP detected".to_owned());
            severity += 0.4;
        }
        if info.is_probe {
            anomalies.push("ARP probe detected".to_owned());
            severity += 0.1;
        }

        let timing = self.timing_features(info.sender_ip);
        if timing.packet_rate > RATE_ANOMALY_PPS {
            anomalies.push(format!("High packet rate: {:.2} pkt/s", timing.packet_rate));
            severity += 0.3;
        }
        if info.inter_arrival > Duration::ZERO && info.inter_arrival < RAPID_INTER_ARRIVAL {
            anomalies.push(format!(
                "Rapid packets: {:.1}ms interval",
                info.inter_arrival.as_secs_f64() * 1000.0
            ));
            severity += 0.2;
        }
        if info.unsolicited_reply {
            anomalies.push("Unsolicited ARP reply (no matching request)".to_owned());
            severity += 0.5;
        }

        ScoredAnomalies {
            severity: severity.min(1.0),
            anomalies,
            timing,
        }
    }

    /// Sweep pending requests older than the configured TTL.
    pub fn sweep_pending(&self) -> usize {
        self.sweep_pending_at(Instant::now())
    }

    pub fn sweep_pending_at(&self, now: Instant) -> usize {
        let ttl = self.pending_ttl;
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, at| now.duration_since(*at) <= ttl);
        let removed = before - pending.len();
        if removed > 0 {
            debug!("swept {removed} stale pending requests");
        }
        removed
    }

    /// Drop sender state idle longer than `max_idle`.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.senders.len();
        self.senders
            .retain(|_, state| now.duration_since(state.last_seen) <= max_idle);
        before - self.senders.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> AnalyzerStatsSnapshot {
        let c = &self.counters;
        let samples = c.inter_arrival_samples.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let avg_inter_arrival = if samples > 0 {
            c.inter_arrival_sum_us.load(Ordering::Relaxed) as f64 / samples as f64 / 1_000_000.0
        } else {
            0.0
        };
        AnalyzerStatsSnapshot {
            total_packets: c.total.load(Ordering::Relaxed),
            request_count: c.requests.load(Ordering::Relaxed),
            reply_count: c.replies.load(Ordering::Relaxed),
            gratuitous_count: c.gratuitous.load(Ordering::Relaxed),
            probe_count: c.probes.load(Ordering::Relaxed),
            unsolicited_replies: c.unsolicited_replies.load(Ordering::Relaxed),
            avg_inter_arrival,
            tracked_senders: self.senders.len(),
            pending_requests: self.pending.lock().len(),
        }
    }
}
