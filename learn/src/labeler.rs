// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Weak labeling of stored alerts.

use detect::AlertModule;
use serde_json::Value;
use store::Alert;

const ATTACK_CONFIDENCE: f64 = 0.95;
const BENIGN_CONFIDENCE: f64 = 0.30;

/// Derive a supervision label from an alert's provenance.
///
/// Rule-based (DFA) detections are attacks by construction. Classifier
/// detections are trusted only at the extremes of their own recorded
/// confidence, read from the structured detail bag — an ANN alert with
/// no `confidence` detail is skipped, never trusted.
#[must_use]
pub fn auto_label(alert: &Alert) -> Option<f64> {
    match alert.module {
        AlertModule::Dfa => Some(1.0),
        AlertModule::Ann => {
            let confidence = alert.details.get("confidence").and_then(Value::as_f64)?;
            if confidence >= ATTACK_CONFIDENCE {
                Some(1.0)
            } else if confidence <= BENIGN_CONFIDENCE {
                Some(0.0)
            } else {
                None
            }
        }
        AlertModule::ArpAnomaly | AlertModule::VendorAnomaly => None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn alert(module: AlertModule, confidence: Option<f64>) -> Alert {
        let mut details = Map::new();
        if let Some(confidence) = confidence {
            details.insert("confidence".to_owned(), Value::from(confidence));
        }
        Alert {
            id: 1,
            timestamp: Utc::now(),
            module,
            reason: "reason".to_owned(),
            src_ip: None,
            src_mac: None,
            details,
        }
    }

    #[test]
    fn dfa_is_always_attack() {
        assert_eq!(auto_label(&alert(AlertModule::Dfa, None)), Some(1.0));
    }

    #[test]
    fn ann_labels_only_at_the_extremes() {
        assert_eq!(auto_label(&alert(AlertModule::Ann, Some(0.97))), Some(1.0));
        assert_eq!(auto_label(&alert(AlertModule::Ann, Some(0.95))), Some(1.0));
        assert_eq!(auto_label(&alert(AlertModule::Ann, Some(0.05))), Some(0.0));
        assert_eq!(auto_label(&alert(AlertModule::Ann, Some(0.30))), Some(0.0));
        assert_eq!(auto_label(&alert(AlertModule::Ann, Some(0.6))), None);
    }

    #[test]
    fn ann_without_structured_confidence_is_skipped() {
        assert_eq!(auto_label(&alert(AlertModule::Ann, None)), None);
    }

    #[test]
    fn other_modules_are_skipped() {
        assert_eq!(auto_label(&alert(AlertModule::ArpAnomaly, Some(0.99))), None);
        assert_eq!(auto_label(&alert(AlertModule::VendorAnomaly, None)), None);
    }
}
