// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Detection vocabulary shared by the analyzers and the alert store.

use net::Mac;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::net::Ipv4Addr;

/// Which pipeline stage raised an alert. The wire/database tags are the
/// historical uppercase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum AlertModule {
    #[serde(rename = "DFA")]
    Dfa,
    #[serde(rename = "ARP_ANOMALY")]
    ArpAnomaly,
    #[serde(rename = "VENDOR_ANOMALY")]
    VendorAnomaly,
    #[serde(rename = "ANN")]
    Ann,
}

impl AlertModule {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertModule::Dfa => "DFA",
            AlertModule::ArpAnomaly => "ARP_ANOMALY",
            AlertModule::VendorAnomaly => "VENDOR_ANOMALY",
            AlertModule::Ann => "ANN",
        }
    }
}

impl Display for AlertModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a module tag.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown alert module tag '{0}'")]
pub struct ModuleParseError(pub String);

impl std::str::FromStr for AlertModule {
    type Err = ModuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DFA" => Ok(AlertModule::Dfa),
            "ARP_ANOMALY" => Ok(AlertModule::ArpAnomaly),
            "VENDOR_ANOMALY" => Ok(AlertModule::VendorAnomaly),
            "ANN" => Ok(AlertModule::Ann),
            other => Err(ModuleParseError(other.to_owned())),
        }
    }
}

/// One analyzer verdict about one frame, before persistence.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Detection {
    pub module: AlertModule,
    pub reason: String,
    pub src_ip: Option<Ipv4Addr>,
    pub src_mac: Option<Mac>,
    /// Structured detail bag; the learner's labeler reads values from
    /// here (never from the reason text).
    pub details: Map<String, Value>,
}

impl Detection {
    #[must_use]
    pub fn new(module: AlertModule, reason: String) -> Self {
        Detection {
            module,
            reason,
            src_ip: None,
            src_mac: None,
            details: Map::new(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, ip: Option<Ipv4Addr>, mac: Option<Mac>) -> Self {
        self.src_ip = ip;
        self.src_mac = mac;
        self
    }

    pub fn detail(&mut self, key: &str, value: Value) -> &mut Self {
        self.details.insert(key.to_owned(), value);
        self
    }
}
