// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! The per-worker analyzer chain.
//!
//! At most one alert is raised per frame, in fixed precedence: the DFA
//! rules, then the ARP anomaly score, then the vendor heuristics, then
//! the classifier. Every alert carries the full enrichment detail bag,
//! and the classifier's confidence lands in `details.confidence` where
//! the learner's labeler reads it.

use detect::{AlertModule, ArpAnalyzer, Detection, DfaFilter, VendorChecker};
use dispatch::FrameHandler;
use model::{Classifier, LiveFeatureExtractor};
use net::Frame;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use store::{AlertStore, NewAlert, ThreatIntelStore};
use tracing::{debug, error};

/// ARP anomaly severities at or above this raise an alert.
const ARP_SEVERITY_THRESHOLD: f64 = 0.5;
/// Vendor confidences strictly above this raise an alert.
const VENDOR_CONFIDENCE_THRESHOLD: f64 = 0.4;

/// Shared analyzer state; one chain serves every worker lane.
pub struct AnalyzerChain {
    dfa: Arc<DfaFilter>,
    analyzer: Arc<ArpAnalyzer>,
    vendor: Arc<VendorChecker>,
    extractor: Arc<LiveFeatureExtractor>,
    classifier: Arc<Classifier>,
    intel: Option<Arc<ThreatIntelStore>>,
    alerts: Arc<AlertStore>,
}

impl AnalyzerChain {
    #[must_use]
    pub fn new(
        dfa: Arc<DfaFilter>,
        analyzer: Arc<ArpAnalyzer>,
        vendor: Arc<VendorChecker>,
        extractor: Arc<LiveFeatureExtractor>,
        classifier: Arc<Classifier>,
        intel: Option<Arc<ThreatIntelStore>>,
        alerts: Arc<AlertStore>,
    ) -> Self {
        AnalyzerChain {
            dfa,
            analyzer,
            vendor,
            extractor,
            classifier,
            intel,
            alerts,
        }
    }

    /// Run the chain over one frame. Analyzer failures log and drop the
    /// frame; they never propagate to the worker loop.
    pub fn process(&self, frame: &Frame) {
        let info = self.analyzer.analyze(frame);
        let scored = self.analyzer.score(&info);
        let vendor = self.vendor.check(frame.arp.sender_mac, frame.arp.target_mac);

        let mut details = Map::new();
        details.insert("opcode".to_owned(), json!(frame.arp.opcode.as_u16()));
        details.insert("is_gratuitous".to_owned(), json!(info.is_gratuitous));
        details.insert("is_probe".to_owned(), json!(info.is_probe));
        details.insert(
            "inter_arrival_time".to_owned(),
            json!(info.inter_arrival.as_secs_f64()),
        );
        details.insert("src_vendor".to_owned(), json!(vendor.src_vendor));
        details.insert("dst_vendor".to_owned(), json!(vendor.dst_vendor));
        details.insert("arp_anomaly_severity".to_owned(), json!(scored.severity));
        details.insert(
            "vendor_anomaly_confidence".to_owned(),
            json!(vendor.confidence),
        );
        self.enrich_with_intel(frame, &mut details);

        // primary detection: the deterministic rules
        if let Some(mut detection) = self.dfa.check(frame) {
            for (key, value) in &details {
                detection.details.entry(key.clone()).or_insert_with(|| value.clone());
            }
            self.raise(detection);
            return;
        }

        // statistical ARP anomalies
        if scored.severity >= ARP_SEVERITY_THRESHOLD {
            let mut detection = Detection::new(
                AlertModule::ArpAnomaly,
                format!("ARP anomaly: {}", scored.anomalies.join(", ")),
            )
            .with_source(Some(frame.arp.sender_ip), Some(frame.arp.sender_mac));
            detection.details = details;
            detection.detail("arp_anomalies", json!(scored.anomalies));
            self.raise(detection);
            return;
        }

        // vendor heuristics
        if vendor.confidence > VENDOR_CONFIDENCE_THRESHOLD {
            let mut detection = Detection::new(
                AlertModule::VendorAnomaly,
                format!("MAC vendor anomaly: {}", vendor.anomalies.join(", ")),
            )
            .with_source(Some(frame.arp.sender_ip), Some(frame.arp.sender_mac));
            detection.details = details;
            detection.detail("vendor_anomalies", json!(vendor.anomalies));
            self.raise(detection);
            return;
        }

        // secondary detection: the learned classifier
        let features = self.extractor.extract(frame);
        match self.classifier.predict(&features) {
            Ok((true, prob)) => {
                let mut detection = Detection::new(
                    AlertModule::Ann,
                    format!("Model predicted spoof (prob={prob:.4})"),
                )
                .with_source(Some(frame.arp.sender_ip), Some(frame.arp.sender_mac));
                detection.details = details;
                detection.detail("confidence", json!(prob));
                self.raise(detection);
            }
            Ok((false, prob)) => {
                debug!(prob, sender = %frame.arp.sender_ip, "frame classified benign");
            }
            Err(e) => error!("classifier rejected frame: {e}"),
        }
    }

    fn enrich_with_intel(&self, frame: &Frame, details: &mut Map<String, Value>) {
        let Some(intel) = &self.intel else { return };
        match intel.search_and_hit(&frame.arp.sender_ip.to_string()) {
            Ok(Some(indicator)) => {
                details.insert(
                    "threat_intel_ip".to_owned(),
                    json!({
                        "severity": indicator.severity.as_str(),
                        "confidence": indicator.confidence,
                        "source": indicator.source,
                    }),
                );
            }
            Ok(None) => {}
            Err(e) => error!("threat intel lookup failed: {e}"),
        }
        match intel.search_and_hit(&frame.arp.sender_mac.to_string()) {
            Ok(Some(indicator)) => {
                details.insert(
                    "threat_intel_mac".to_owned(),
                    json!({
                        "severity": indicator.severity.as_str(),
                        "confidence": indicator.confidence,
                        "source": indicator.source,
                    }),
                );
            }
            Ok(None) => {}
            Err(e) => error!("threat intel lookup failed: {e}"),
        }
    }

    fn raise(&self, detection: Detection) {
        if let Err(e) = self.alerts.insert(&NewAlert::from(detection)) {
            // the pipeline favors availability: log and move on
            error!("failed to persist alert: {e}");
        }
    }
}

/// Per-lane handler handing frames to the shared chain.
pub struct ChainHandler {
    chain: Arc<AnalyzerChain>,
}

impl ChainHandler {
    #[must_use]
    pub fn new(chain: Arc<AnalyzerChain>) -> Self {
        ChainHandler { chain }
    }
}

impl FrameHandler for ChainHandler {
    fn handle(&mut self, frame: Frame) {
        self.chain.process(&frame);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use net::{ArpOpcode, ArpPacket, InterfaceId, Mac};
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

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

    fn unicast_reply(
        sender_mac: Mac,
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
        target_mac: Mac,
    ) -> Frame {
        Frame::new(
            InterfaceId::new(1),
            sender_mac,
            target_mac,
            ArpPacket {
                opcode: ArpOpcode::Reply,
                sender_mac,
                sender_ip,
                target_mac,
                target_ip,
            },
        )
    }

    /// A chain over an in-memory store. `spoof_bias` pushes the
    /// classifier's logit hard positive or negative so tests control the
    /// ANN verdict.
    fn chain_with(dir: &TempDir, spoof_bias: f64) -> (AnalyzerChain, Arc<AlertStore>) {
        let schema = LiveFeatureExtractor::default_schema();
        let mut state = Classifier::fresh_state("test-1", schema.features.clone(), &[], 0.0, 5);
        state.net.output.weights = vec![vec![0.0; schema.width()]];
        state.net.output.bias = vec![spoof_bias];
        let classifier = Arc::new(
            Classifier::from_state(&dir.path().join("model.json"), state).unwrap(),
        );
        let alerts = Arc::new(AlertStore::open_in_memory().unwrap());
        let chain = AnalyzerChain::new(
            Arc::new(DfaFilter::default()),
            Arc::new(ArpAnalyzer::default()),
            Arc::new(VendorChecker::new()),
            Arc::new(LiveFeatureExtractor::new(schema)),
            classifier,
            None,
            alerts.clone(),
        );
        (chain, alerts)
    }

    fn request(sender_mac: Mac, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Frame {
        Frame::new(
            InterfaceId::new(1),
            sender_mac,
            Mac::BROADCAST,
            ArpPacket {
                opcode: ArpOpcode::Request,
                sender_mac,
                sender_ip,
                target_mac: Mac::ZERO,
                target_ip,
            },
        )
    }

    // Scenario: two solicited replies binding one IP to two MACs yield
    // exactly one alert, from the DFA stage.
    #[test]
    fn conflict_scenario_end_to_end() {
        let dir = TempDir::new().unwrap();
        let (chain, alerts) = chain_with(&dir, -10.0);
        let ip = Ipv4Addr::new(192, 168, 1, 1);
        let target = Ipv4Addr::new(192, 168, 1, 50);
        // known-vendor MACs keep the vendor stage quiet
        let asker = Mac::try_from("00:0C:29:00:00:50").unwrap();
        let first = Mac::try_from("00:0C:29:11:22:33").unwrap();
        let second = Mac::try_from("00:50:56:FF:EE:00").unwrap();

        // each reply answers a pending request and the frames arrive at
        // an unremarkable pace, so only the binding conflict can fire
        let base = std::time::Instant::now();
        let mut offset_ms = 0u64;
        for mut frame in [
            request(asker, target, ip),
            unicast_reply(first, ip, target, asker),
            request(asker, target, ip),
            unicast_reply(second, ip, target, asker),
        ] {
            frame.captured_at = base + std::time::Duration::from_millis(offset_ms);
            offset_ms += 300;
            chain.process(&frame);
        }

        let stored = alerts.latest(10).unwrap();
        assert_eq!(stored.len(), 1);
        let alert = &stored[0];
        assert_eq!(alert.module, AlertModule::Dfa);
        assert!(alert.reason.starts_with(
            "IP-MAC conflict: 192.168.1.1 previous 00:0C:29:11:22:33 now 00:50:56:FF:EE:00"
        ));
        assert_eq!(alert.src_ip, Some(ip));
        assert_eq!(alert.src_mac, Some(second));
        // enrichment rode along
        assert!(alert.details.contains_key("opcode"));
        assert!(alert.details.contains_key("arp_anomaly_severity"));
    }

    // Scenario: a gratuitous burst from one MAC trips the flood rule.
    #[test]
    fn gratuitous_flood_scenario_end_to_end() {
        let dir = TempDir::new().unwrap();
        let (chain, alerts) = chain_with(&dir, -10.0);
        let mac = Mac::try_from("DE:AD:BE:EF:CA:FE").unwrap();
        let ip = Ipv4Addr::new(192, 168, 1, 66);
        for _ in 0..10 {
            chain.process(&reply(mac, ip, ip));
        }
        let floods: Vec<_> = alerts
            .latest(50)
            .unwrap()
            .into_iter()
            .filter(|alert| alert.reason.contains("Excessive gratuitous ARPs"))
            .collect();
        assert!(!floods.is_empty());
        for alert in &floods {
            assert_eq!(alert.module, AlertModule::Dfa);
            assert_eq!(alert.details.get("mac").unwrap(), "DE:AD:BE:EF:CA:FE");
            let count = alert.details.get("count").unwrap().as_u64().unwrap();
            assert!((6..=10).contains(&count));
        }
    }

    // Scenario: an unsolicited reply raises an ARP anomaly alert and
    // bumps the analyzer counter.
    #[test]
    fn unsolicited_reply_scenario_end_to_end() {
        let dir = TempDir::new().unwrap();
        let (chain, alerts) = chain_with(&dir, -10.0);
        let mac = Mac::try_from("00:11:22:33:44:55").unwrap();
        chain.process(&Frame::new(
            InterfaceId::new(1),
            mac,
            Mac([0, 0x0C, 0x29, 0, 0, 6]),
            ArpPacket {
                opcode: ArpOpcode::Reply,
                sender_mac: mac,
                sender_ip: Ipv4Addr::new(10, 0, 0, 5),
                target_mac: Mac([0, 0x0C, 0x29, 0, 0, 6]),
                target_ip: Ipv4Addr::new(10, 0, 0, 6),
            },
        ));
        let stored = alerts.latest(10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].module, AlertModule::ArpAnomaly);
        assert!(stored[0].reason.contains("Unsolicited ARP reply"));
    }

    // A positive classifier verdict lands an ANN alert with a structured
    // confidence the labeler can read.
    #[test]
    fn classifier_verdict_carries_structured_confidence() {
        let dir = TempDir::new().unwrap();
        let (chain, alerts) = chain_with(&dir, 10.0);
        let mac = Mac::try_from("00:0C:29:00:00:01").unwrap();
        // a plain solicited-looking request: no earlier stage fires
        chain.process(&Frame::new(
            InterfaceId::new(1),
            mac,
            Mac::BROADCAST,
            ArpPacket {
                opcode: ArpOpcode::Request,
                sender_mac: mac,
                sender_ip: Ipv4Addr::new(10, 0, 0, 7),
                target_mac: Mac::ZERO,
                target_ip: Ipv4Addr::new(10, 0, 0, 8),
            },
        ));
        let stored = alerts.latest(10).unwrap();
        assert_eq!(stored.len(), 1);
        let alert = &stored[0];
        assert_eq!(alert.module, AlertModule::Ann);
        assert!(alert.reason.starts_with("Model predicted spoof (prob="));
        let confidence = alert
            .details
            .get("confidence")
            .and_then(serde_json::Value::as_f64)
            .unwrap();
        assert!(confidence > 0.95);
    }

    // Precedence: each frame yields at most one alert, from the highest
    // stage that fires.
    #[test]
    fn at_most_one_alert_per_frame() {
        let dir = TempDir::new().unwrap();
        let (chain, alerts) = chain_with(&dir, 10.0);
        let ip = Ipv4Addr::new(192, 168, 7, 7);
        let first = Mac::try_from("00:0C:29:AA:00:01").unwrap();
        let second = Mac::try_from("00:50:56:BB:00:02").unwrap();
        // frame 1: gratuitous + unsolicited score 0.9, the classifier is
        // spoof-biased, but only the anomaly stage fires
        chain.process(&reply(first, ip, ip));
        // frame 2: conflict AND anomaly AND classifier, only DFA fires
        chain.process(&reply(second, ip, ip));
        let stored = alerts.latest(10).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].module, AlertModule::Dfa);
        assert_eq!(stored[1].module, AlertModule::ArpAnomaly);
    }
}
