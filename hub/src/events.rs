// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Wire shape of pushed events.

/// The `new_alert` event as delivered to subscribers:
///
/// ```json
/// {"type":"new_alert","data":{"id":1,"timestamp":"…","module":"DFA",
///  "reason":"…","src_ip":"a.b.c.d","src_mac":"xx:…"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AlertEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: AlertEventData,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AlertEventData {
    pub id: i64,
    /// ISO-8601 wall timestamp.
    pub timestamp: String,
    pub module: String,
    pub reason: String,
    pub src_ip: Option<String>,
    pub src_mac: Option<String>,
}

impl AlertEvent {
    #[must_use]
    pub fn new_alert(
        id: i64,
        timestamp: String,
        module: &str,
        reason: &str,
        src_ip: Option<String>,
        src_mac: Option<String>,
    ) -> Self {
        AlertEvent {
            kind: "new_alert".to_owned(),
            data: AlertEventData {
                id,
                timestamp,
                module: module.to_owned(),
                reason: reason.to_owned(),
                src_ip,
                src_mac,
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn event_shape_matches_contract() {
        let event = AlertEvent::new_alert(
            7,
            "2025-06-02T12:00:00Z".to_owned(),
            "DFA",
            "IP-MAC conflict: …",
            Some("192.168.1.1".to_owned()),
            None,
        );
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "new_alert");
        assert_eq!(json["data"]["id"], 7);
        assert_eq!(json["data"]["module"], "DFA");
        assert_eq!(json["data"]["src_ip"], "192.168.1.1");
        assert!(json["data"]["src_mac"].is_null());
    }
}
