// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Durable learner bookkeeping.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

const HISTORY_CAP: usize = 100;
const VERSIONS_CAP: usize = 20;

/// Outcome metrics of one training cycle.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CycleRecord {
    pub timestamp: DateTime<Utc>,
    pub training_time_s: f64,
    pub n_samples: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub outcome: String,
}

/// One committed model version.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VersionRecord {
    pub timestamp: DateTime<Utc>,
    pub loss: f64,
    pub accuracy: f64,
    pub model_path: String,
}

/// The learner's persistent state. History and version logs are bounded.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LearnerState {
    pub last_processed_alert_id: i64,
    pub last_training_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<CycleRecord>,
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
}

impl LearnerState {
    /// Load state from `path`, or default when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, io::Error> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let state = serde_json::from_str(&text)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                info!("learner state loaded from {}", path.display());
                Ok(state)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LearnerState::default()),
            Err(e) => Err(e),
        }
    }

    /// Persist atomically (write-temp-then-rename).
    pub fn save(&self, path: &Path) -> Result<(), io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_vec_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)
    }

    /// Append a cycle record, keeping the newest [`HISTORY_CAP`].
    pub fn push_cycle(&mut self, record: CycleRecord) {
        self.history.push(record);
        if self.history.len() > HISTORY_CAP {
            let overflow = self.history.len() - HISTORY_CAP;
            self.history.drain(..overflow);
        }
    }

    /// Append a version record, keeping the newest [`VERSIONS_CAP`].
    pub fn push_version(&mut self, record: VersionRecord) {
        self.versions.push(record);
        if self.versions.len() > VERSIONS_CAP {
            let overflow = self.versions.len() - VERSIONS_CAP;
            self.versions.drain(..overflow);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn cycle(n: usize) -> CycleRecord {
        CycleRecord {
            timestamp: Utc::now(),
            training_time_s: 1.5,
            n_samples: n,
            loss: 0.4,
            accuracy: 88.0,
            outcome: "committed".to_owned(),
        }
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = TempDir::new().unwrap();
        let state = LearnerState::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(state, LearnerState::default());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut state = LearnerState {
            last_processed_alert_id: 42,
            last_training_time: Some(Utc::now()),
            ..LearnerState::default()
        };
        state.push_cycle(cycle(10));
        state.save(&path).unwrap();
        let loaded = LearnerState::load(&path).unwrap();
        assert_eq!(loaded.last_processed_alert_id, 42);
        assert_eq!(loaded.history.len(), 1);
    }

    #[test]
    fn history_and_versions_are_bounded() {
        let mut state = LearnerState::default();
        for n in 0..150 {
            state.push_cycle(cycle(n));
        }
        assert_eq!(state.history.len(), 100);
        assert_eq!(state.history.last().unwrap().n_samples, 149);
        for n in 0..30 {
            state.push_version(VersionRecord {
                timestamp: Utc::now(),
                loss: 0.1,
                accuracy: 90.0,
                model_path: format!("model-{n}.json"),
            });
        }
        assert_eq!(state.versions.len(), 20);
        assert_eq!(state.versions.last().unwrap().model_path, "model-29.json");
    }
}
