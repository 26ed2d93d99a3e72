// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Frame → feature-vector extraction.
//!
//! Two encoders exist on purpose and must not be conflated:
//!
//! - [`LiveFeatureExtractor`] fills a schema-named vector from a live
//!   frame (inference path).
//! - [`AlertEncoder`] projects a stored alert into the model's input
//!   width for weak-label training. The encodings differ; keeping them as
//!   two named types keeps the divergence visible.

use crate::schema::{FeatureKind, FeatureSchema};
use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use net::{Frame, Mac};
use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Sliding frequency window per sender.
const FREQUENCY_WINDOW: Duration = Duration::from_secs(1);

/// Schema-named columns the live extractor knows how to fill. Missing
/// columns stay 0.
const OPCODE_COLUMNS: &[&str] = &["arp_opcode", "opcode", "arp_op"];
const FREQUENCY_COLUMNS: &[&str] = &["bidirectional_packets", "bidirectional_bytes", "src2dst_packets"];
const INTER_ARRIVAL_COLUMN: &str = "inter_arrival_time";
const PROTOCOL_COLUMN: &str = "protocol";
const SRC_PORT_COLUMN: &str = "src_port";

/// Stateful live extractor bound to one schema version.
pub struct LiveFeatureExtractor {
    schema: FeatureSchema,
    last_seen: DashMap<Ipv4Addr, Instant>,
    windows: DashMap<Ipv4Addr, VecDeque<Instant>>,
}

impl LiveFeatureExtractor {
    #[must_use]
    pub fn new(schema: FeatureSchema) -> Self {
        LiveFeatureExtractor {
            schema,
            last_seen: DashMap::new(),
            windows: DashMap::new(),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// The default live schema when none has been registered yet.
    #[must_use]
    pub fn default_schema() -> FeatureSchema {
        let features: Vec<String> = [
            "arp_opcode",
            "inter_arrival_time",
            "src2dst_packets",
            "bidirectional_packets",
            "bidirectional_bytes",
            "protocol",
            "src_port",
            "packet_rate",
        ]
        .iter()
        .map(|name| (*name).to_owned())
        .collect();
        let feature_types: BTreeMap<String, FeatureKind> = features
            .iter()
            .map(|name| {
                let kind = if name == "arp_opcode" { FeatureKind::Int } else { FeatureKind::Float };
                (name.clone(), kind)
            })
            .collect();
        FeatureSchema {
            version: "1.0.0".to_owned(),
            name: "arp-live".to_owned(),
            description: "live ARP frame features".to_owned(),
            checksum: FeatureSchema::compute_checksum(&features),
            features,
            feature_types,
            created_at: Utc::now(),
        }
    }

    /// Extract the schema vector for a frame, updating sliding state.
    /// Windowing runs over the frame's ingress timestamp.
    #[must_use]
    pub fn extract(&self, frame: &Frame) -> Vec<f64> {
        self.extract_at(frame, frame.captured_at)
    }

    pub fn extract_at(&self, frame: &Frame, now: Instant) -> Vec<f64> {
        let mut vector = vec![0.0; self.schema.width()];
        let sender = frame.arp.sender_ip;

        self.set(&mut vector, PROTOCOL_COLUMN, 0.0);
        self.set(&mut vector, SRC_PORT_COLUMN, 0.0);
        for column in OPCODE_COLUMNS {
            self.set(&mut vector, column, f64::from(frame.arp.opcode.as_u16()));
        }

        let inter_arrival = self
            .last_seen
            .insert(sender, now)
            .map_or(0.0, |prev| now.duration_since(prev).as_secs_f64());
        self.set(&mut vector, INTER_ARRIVAL_COLUMN, inter_arrival);

        let frequency = {
            let mut window = self.windows.entry(sender).or_default();
            window.push_back(now);
            while let Some(front) = window.front() {
                if now.duration_since(*front) > FREQUENCY_WINDOW {
                    window.pop_front();
                } else {
                    break;
                }
            }
            #[allow(clippy::cast_precision_loss)]
            let frequency = window.len() as f64 / FREQUENCY_WINDOW.as_secs_f64();
            frequency
        };
        for column in FREQUENCY_COLUMNS {
            self.set(&mut vector, column, frequency);
        }
        self.set(&mut vector, "packet_rate", frequency);

        vector
    }

    fn set(&self, vector: &mut [f64], column: &str, value: f64) {
        if let Some(index) = self.schema.index_of(column) {
            vector[index] = value;
        }
    }

    /// Drop per-sender state idle longer than `max_idle`.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, seen| now.duration_since(*seen) <= max_idle);
        self.windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|latest| now.duration_since(*latest) <= max_idle)
        });
        before - self.last_seen.len()
    }
}

/// Projects stored alerts into the model input for weak-label training.
///
/// Layout: 4 IP octets, 6 MAC bytes, ANN-module indicator, hour-of-day
/// and day-of-week fractions, zero-padded (or trimmed) to `width`.
#[derive(Debug, Clone, Copy)]
pub struct AlertEncoder {
    width: usize,
}

impl AlertEncoder {
    #[must_use]
    pub fn new(width: usize) -> Self {
        AlertEncoder { width }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn encode(
        &self,
        src_ip: Option<Ipv4Addr>,
        src_mac: Option<Mac>,
        is_ann: bool,
        timestamp: DateTime<Utc>,
    ) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.width.max(13));
        match src_ip {
            Some(ip) => features.extend(ip.octets().map(f64::from)),
            None => features.extend([0.0; 4]),
        }
        match src_mac {
            Some(mac) => features.extend(mac.0.map(f64::from)),
            None => features.extend([0.0; 6]),
        }
        features.push(if is_ann { 1.0 } else { 0.0 });
        features.push(f64::from(timestamp.hour()) / 24.0);
        features.push(f64::from(timestamp.weekday().num_days_from_monday()) / 7.0);
        features.resize(self.width, 0.0);
        features
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use net::{ArpOpcode, ArpPacket, InterfaceId};

    fn frame(sender_ip: Ipv4Addr) -> Frame {
        let mac = Mac([2, 0, 0, 0, 0, 1]);
        Frame::new(
            InterfaceId::new(1),
            mac,
            Mac::BROADCAST,
            ArpPacket {
                opcode: ArpOpcode::Reply,
                sender_mac: mac,
                sender_ip,
                target_mac: Mac::ZERO,
                target_ip: sender_ip,
            },
        )
    }

    #[test]
    fn live_vector_fills_named_columns() {
        let extractor = LiveFeatureExtractor::new(LiveFeatureExtractor::default_schema());
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let base = Instant::now();
        let first = extractor.extract_at(&frame(ip), base);
        let schema = extractor.schema();
        assert_eq!(first.len(), schema.width());
        assert_eq!(first[schema.index_of("arp_opcode").unwrap()], 2.0);
        assert_eq!(first[schema.index_of("inter_arrival_time").unwrap()], 0.0);
        assert_eq!(first[schema.index_of("src2dst_packets").unwrap()], 1.0);

        let second = extractor.extract_at(&frame(ip), base + Duration::from_millis(250));
        let inter = second[schema.index_of("inter_arrival_time").unwrap()];
        assert!((inter - 0.25).abs() < 1e-6);
        assert_eq!(second[schema.index_of("src2dst_packets").unwrap()], 2.0);
    }

    #[test]
    fn frequency_window_slides() {
        let extractor = LiveFeatureExtractor::new(LiveFeatureExtractor::default_schema());
        let ip = Ipv4Addr::new(10, 0, 0, 2);
        let schema_index = extractor.schema().index_of("packet_rate").unwrap();
        let base = Instant::now();
        for n in 0..5u64 {
            extractor.extract_at(&frame(ip), base + Duration::from_millis(n * 100));
        }
        // 2s later the 1s window has emptied except the new arrival
        let later = extractor.extract_at(&frame(ip), base + Duration::from_secs(3));
        assert_eq!(later[schema_index], 1.0);
    }

    #[test]
    fn alert_encoding_layout() {
        let encoder = AlertEncoder::new(20);
        let when = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap(); // a Monday, noon
        let vector = encoder.encode(
            Some(Ipv4Addr::new(192, 168, 1, 1)),
            Some(Mac([0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33])),
            false,
            when,
        );
        assert_eq!(vector.len(), 20);
        assert_eq!(&vector[..4], &[192.0, 168.0, 1.0, 1.0]);
        assert_eq!(vector[4], 170.0); // 0xAA
        assert_eq!(vector[10], 0.0); // not ANN
        assert!((vector[11] - 0.5).abs() < 1e-9); // hour 12 / 24
        assert_eq!(vector[12], 0.0); // Monday
        assert!(vector[13..].iter().all(|pad| *pad == 0.0));
    }

    #[test]
    fn alert_encoding_trims_to_narrow_models() {
        let encoder = AlertEncoder::new(8);
        let vector = encoder.encode(None, None, true, Utc::now());
        assert_eq!(vector.len(), 8);
    }

    #[test]
    fn sweep_bounds_sender_maps() {
        let extractor = LiveFeatureExtractor::new(LiveFeatureExtractor::default_schema());
        for octet in 0..50u8 {
            extractor.extract(&frame(Ipv4Addr::new(10, 0, 1, octet)));
        }
        assert_eq!(extractor.sweep_idle(Duration::from_secs(0)), 50);
    }
}
