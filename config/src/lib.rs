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

//! Environment-resolved settings.
//!
//! Every knob has a default; a variable that is present but unparsable
//! fails startup with an error naming the variable, never a silent
//! fallback.

use dispatch::Strategy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// A configuration failure at startup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {variable}")]
    Invalid { variable: String, value: String },
}

/// Learner knobs (see the learn crate for semantics).
#[derive(Debug, Clone, PartialEq)]
pub struct LearnerSettings {
    pub learning_interval: Duration,
    pub min_samples: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub max_history: usize,
}

/// Retention knobs for the alert lifecycle task.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionSettings {
    /// Active alerts older than this are archived.
    pub days_to_keep: i64,
    /// Archived alerts older than this are deleted.
    pub archive_days_to_keep: i64,
}

/// The resolved sensor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_path: PathBuf,
    /// Interfaces to bring up at start; may be overridden on the CLI.
    pub interfaces: Vec<String>,
    pub workers: usize,
    pub strategy: Strategy,
    pub gratuitous_threshold: usize,
    pub gratuitous_window: Duration,
    pub model_path: PathBuf,
    pub schema_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub learner_state_path: PathBuf,
    pub learner: LearnerSettings,
    pub retention: RetentionSettings,
    pub hub_queue_capacity: usize,
}

fn parsed<T: FromStr>(variable: &str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid {
            variable: variable.to_owned(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

fn path_var(variable: &str, default: &str) -> PathBuf {
    env::var(variable).map_or_else(|_| PathBuf::from(default), PathBuf::from)
}

impl Settings {
    /// Resolve every setting from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let interfaces = env::var("SENTINEL_INTERFACES")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let settings = Settings {
            database_path: path_var("SENTINEL_DB_PATH", "sentinel.db"),
            interfaces,
            workers: parsed("SENTINEL_WORKERS", 4)?,
            strategy: parsed("SENTINEL_STRATEGY", Strategy::LeastLoaded)?,
            gratuitous_threshold: parsed("SENTINEL_GRAT_THRESHOLD", 5)?,
            gratuitous_window: Duration::from_secs(parsed("SENTINEL_GRAT_WINDOW_SECS", 5)?),
            model_path: path_var("SENTINEL_MODEL_PATH", "models/classifier.json"),
            schema_dir: path_var("SENTINEL_SCHEMA_DIR", "models/feature_schemas"),
            backup_dir: path_var("SENTINEL_BACKUP_DIR", "models/backups"),
            learner_state_path: path_var("SENTINEL_LEARNER_STATE", "models/learner_state.json"),
            learner: LearnerSettings {
                learning_interval: Duration::from_secs(parsed(
                    "SENTINEL_LEARNING_INTERVAL_SECS",
                    3600,
                )?),
                min_samples: parsed("SENTINEL_MIN_SAMPLES", 100)?,
                batch_size: parsed("SENTINEL_BATCH_SIZE", 32)?,
                learning_rate: parsed("SENTINEL_LEARNING_RATE", 1e-4)?,
                max_history: parsed("SENTINEL_MAX_HISTORY", 10_000)?,
            },
            retention: RetentionSettings {
                days_to_keep: parsed("SENTINEL_RETENTION_DAYS", 30)?,
                archive_days_to_keep: parsed("SENTINEL_ARCHIVE_RETENTION_DAYS", 365)?,
            },
            hub_queue_capacity: parsed("SENTINEL_HUB_QUEUE_CAP", 64)?,
        };
        debug!("settings resolved: {settings:?}");
        Ok(settings)
    }
}

// set_var/remove_var are unsafe in edition 2024; tests serialize access.
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, unsafe_code)]
#[cfg(test)]
mod test {
    use super::*;
    use serial_test::serial;

    fn clear_sentinel_env() {
        for (key, _) in env::vars() {
            if key.starts_with("SENTINEL_") {
                unsafe { env::remove_var(&key) };
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_resolve() {
        clear_sentinel_env();
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.workers, 4);
        assert_eq!(settings.strategy, Strategy::LeastLoaded);
        assert_eq!(settings.gratuitous_threshold, 5);
        assert_eq!(settings.gratuitous_window, Duration::from_secs(5));
        assert_eq!(settings.learner.min_samples, 100);
        assert_eq!(settings.learner.learning_interval, Duration::from_secs(3600));
        assert_eq!(settings.hub_queue_capacity, 64);
        assert!(settings.interfaces.is_empty());
    }

    #[test]
    #[serial]
    fn environment_overrides() {
        clear_sentinel_env();
        unsafe {
            env::set_var("SENTINEL_WORKERS", "8");
            env::set_var("SENTINEL_STRATEGY", "affinity");
            env::set_var("SENTINEL_INTERFACES", "eth0, eth1");
        }
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.strategy, Strategy::Affinity);
        assert_eq!(settings.interfaces, vec!["eth0", "eth1"]);
        clear_sentinel_env();
    }

    #[test]
    #[serial]
    fn invalid_values_name_the_variable() {
        clear_sentinel_env();
        unsafe { env::set_var("SENTINEL_WORKERS", "many") };
        let err = Settings::from_env().unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                variable: "SENTINEL_WORKERS".to_owned(),
                value: "many".to_owned(),
            }
        );
        clear_sentinel_env();
    }
}
