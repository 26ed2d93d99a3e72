// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! The learning coordinator.

use crate::backend::{BackendError, ModelBackend};
use crate::labeler::auto_label;
use crate::state::{CycleRecord, LearnerState, VersionRecord};
use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use detect::AlertModule;
use model::{AlertEncoder, TrainOptions, TrainingReport};
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use store::{AlertStore, StoreError};
use tracing::{debug, error, info, warn};

/// Validation gates: a candidate model below either bar is rolled back.
const MIN_ACCURACY_PERCENT: f64 = 70.0;
const MAX_LOSS: f64 = 2.0;

/// Coordinator tuning. Defaults match the deployed sensor.
#[derive(Debug, Clone)]
pub struct LearnerConfig {
    /// Coordinator wake-up period.
    pub tick: Duration,
    /// Minimum wall time between training cycles.
    pub learning_interval: Duration,
    /// Minimum labeled samples for a cycle to proceed.
    pub min_samples: usize,
    /// Maximum alerts pulled per cycle.
    pub max_history: usize,
    pub train: TrainOptions,
    pub backup_dir: PathBuf,
    pub state_path: PathBuf,
}

impl LearnerConfig {
    #[must_use]
    pub fn new(backup_dir: PathBuf, state_path: PathBuf) -> Self {
        LearnerConfig {
            tick: Duration::from_secs(60),
            learning_interval: Duration::from_secs(3600),
            min_samples: 100,
            max_history: 10_000,
            train: TrainOptions::default(),
            backup_dir,
            state_path,
        }
    }
}

/// Errors from the learner.
#[derive(Debug, thiserror::Error)]
pub enum LearnerError {
    #[error("learner io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("training already in progress")]
    TrainingBusy,
    #[error("continuous learning already running")]
    AlreadyRunning,
    #[error("continuous learning is not running")]
    NotRunning,
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Committed(TrainingReport),
    Rejected(TrainingReport),
    /// Not enough labeled data; nothing changed.
    Skipped { labeled: usize },
}

/// Serializable learner status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LearnerStats {
    pub running: bool,
    pub is_training: bool,
    pub last_training_time: Option<chrono::DateTime<Utc>>,
    pub last_processed_alert_id: i64,
    pub total_training_cycles: usize,
    pub model_versions: usize,
    pub recent_history: Vec<CycleRecord>,
}

struct Worker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// The continuous learner. One coordinator thread; at most one cycle in
/// flight, enforced by the `is_training` flag.
pub struct ContinuousLearner {
    config: LearnerConfig,
    alerts: Arc<AlertStore>,
    backend: Arc<dyn ModelBackend>,
    encoder: AlertEncoder,
    state: Mutex<LearnerState>,
    is_training: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl ContinuousLearner {
    /// Build a learner, loading any previous state from disk.
    pub fn new(
        config: LearnerConfig,
        alerts: Arc<AlertStore>,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Self, LearnerError> {
        fs::create_dir_all(&config.backup_dir)?;
        let state = LearnerState::load(&config.state_path)?;
        let encoder = AlertEncoder::new(backend.input_dim());
        info!(
            interval_s = config.learning_interval.as_secs(),
            min_samples = config.min_samples,
            last_processed = state.last_processed_alert_id,
            "continuous learner initialized"
        );
        Ok(ContinuousLearner {
            config,
            alerts,
            backend,
            encoder,
            state: Mutex::new(state),
            is_training: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    /// Start the coordinator thread.
    pub fn start(self: &Arc<Self>) -> Result<(), LearnerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("continuous learning already running");
            return Err(LearnerError::AlreadyRunning);
        }
        let (shutdown, shutdown_rx) = bounded::<()>(1);
        let learner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("learner".to_owned())
            .spawn(move || learner.run_loop(&shutdown_rx))?;
        *worker = Some(Worker { shutdown, handle });
        info!("continuous learning started");
        Ok(())
    }

    /// Stop the coordinator. An in-flight cycle finishes its current
    /// micro-step first.
    pub fn stop(&self) -> Result<(), LearnerError> {
        let Some(worker) = self.worker.lock().take() else {
            return Err(LearnerError::NotRunning);
        };
        let _ = worker.shutdown.send(());
        if worker.handle.join().is_err() {
            error!("learner thread panicked");
        }
        info!("continuous learning stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    #[must_use]
    pub fn is_training(&self) -> bool {
        self.is_training.load(Ordering::SeqCst)
    }

    fn run_loop(&self, shutdown: &Receiver<()>) {
        info!("continuous learning loop started");
        loop {
            match shutdown.recv_timeout(self.config.tick) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => match self.should_train() {
                    Ok(true) => match self.run_cycle() {
                        Ok(outcome) => debug!("training cycle finished: {outcome:?}"),
                        Err(e) => error!("training cycle failed: {e}"),
                    },
                    Ok(false) => {}
                    Err(e) => error!("training gate check failed: {e}"),
                },
            }
        }
        info!("continuous learning loop stopped");
    }

    /// The cycle gate: enough wall time since the last cycle AND enough
    /// new alerts since the last committed id.
    pub fn should_train(&self) -> Result<bool, LearnerError> {
        let last_processed = {
            let state = self.state.lock();
            if let Some(last) = state.last_training_time {
                let elapsed = Utc::now()
                    .signed_duration_since(last)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if elapsed < self.config.learning_interval {
                    return Ok(false);
                }
            }
            state.last_processed_alert_id
        };
        let pending = self.alerts.count_since(last_processed)?;
        #[allow(clippy::cast_possible_wrap)]
        let enough = pending >= self.config.min_samples as i64;
        if enough {
            info!("ready to train with {pending} new alerts");
        } else {
            debug!(
                "not enough new samples: {pending}/{}",
                self.config.min_samples
            );
        }
        Ok(enough)
    }

    /// Request an immediate cycle. Refuses while one is active.
    pub fn train_now(&self) -> Result<CycleOutcome, LearnerError> {
        info!("manual training cycle requested");
        self.run_cycle()
    }

    fn run_cycle(&self) -> Result<CycleOutcome, LearnerError> {
        if self.is_training.swap(true, Ordering::SeqCst) {
            return Err(LearnerError::TrainingBusy);
        }
        let result = self.cycle_inner();
        self.is_training.store(false, Ordering::SeqCst);
        result
    }

    fn cycle_inner(&self) -> Result<CycleOutcome, LearnerError> {
        let started = Instant::now();
        let last_processed = self.state.lock().last_processed_alert_id;
        let alerts = self.alerts.since(last_processed, self.config.max_history)?;
        info!("collected {} new alerts for training", alerts.len());

        let mut x: Vec<Vec<f64>> = Vec::new();
        let mut y: Vec<f64> = Vec::new();
        let mut max_id = last_processed;
        for alert in &alerts {
            max_id = max_id.max(alert.id);
            let Some(label) = auto_label(alert) else {
                continue;
            };
            x.push(self.encoder.encode(
                alert.src_ip,
                alert.src_mac,
                alert.module == AlertModule::Ann,
                alert.timestamp,
            ));
            y.push(label);
        }
        if x.len() < self.config.min_samples {
            warn!("insufficient labeled data: {} samples", x.len());
            return Ok(CycleOutcome::Skipped { labeled: x.len() });
        }

        let backup_path = self.backup_checkpoint()?;
        let report = self.backend.incremental_update(&x, &y, &self.config.train)?;
        let accepted =
            report.accuracy_percent >= MIN_ACCURACY_PERCENT && report.loss_mean <= MAX_LOSS;

        let now = Utc::now();
        let mut state = self.state.lock();
        if accepted {
            self.backend.save_checkpoint()?;
            state.last_processed_alert_id = max_id;
            state.push_version(VersionRecord {
                timestamp: now,
                loss: report.loss_mean,
                accuracy: report.accuracy_percent,
                model_path: self.backend.checkpoint_path().display().to_string(),
            });
            info!(
                accuracy = report.accuracy_percent,
                loss = report.loss_mean,
                "model updated successfully"
            );
        } else {
            warn!(
                accuracy = report.accuracy_percent,
                loss = report.loss_mean,
                "validation failed, rolling back to backup"
            );
            fs::copy(&backup_path, self.backend.checkpoint_path())?;
            self.backend.reload()?;
        }
        state.last_training_time = Some(now);
        state.push_cycle(CycleRecord {
            timestamp: now,
            training_time_s: started.elapsed().as_secs_f64(),
            n_samples: x.len(),
            loss: report.loss_mean,
            accuracy: report.accuracy_percent,
            outcome: if accepted { "committed" } else { "rejected" }.to_owned(),
        });
        state.save(&self.config.state_path)?;
        drop(state);

        Ok(if accepted {
            CycleOutcome::Committed(report)
        } else {
            CycleOutcome::Rejected(report)
        })
    }

    fn backup_checkpoint(&self) -> Result<PathBuf, LearnerError> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = self.config.backup_dir.join(format!("model_backup_{stamp}.json"));
        fs::copy(self.backend.checkpoint_path(), &backup_path)?;
        info!("model backed up to {}", backup_path.display());
        Ok(backup_path)
    }

    #[must_use]
    pub fn stats(&self) -> LearnerStats {
        let state = self.state.lock();
        let recent: Vec<CycleRecord> = state
            .history
            .iter()
            .rev()
            .take(10)
            .rev()
            .cloned()
            .collect();
        LearnerStats {
            running: self.is_running(),
            is_training: self.is_training(),
            last_training_time: state.last_training_time,
            last_processed_alert_id: state.last_processed_alert_id,
            total_training_cycles: state.history.len(),
            model_versions: state.versions.len(),
            recent_history: recent,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use net::Mac;
    use serde_json::{Map, Value};
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::path::Path;
    use store::NewAlert;
    use tempfile::TempDir;

    /// A backend whose training results are scripted. Each update also
    /// scribbles on the checkpoint file, so rollback has real drift to
    /// undo.
    struct ScriptedBackend {
        path: PathBuf,
        reports: Mutex<VecDeque<TrainingReport>>,
        reloads: AtomicBool,
    }

    impl ScriptedBackend {
        fn new(path: &Path, reports: Vec<TrainingReport>) -> Self {
            fs::write(path, b"checkpoint-v1").unwrap();
            ScriptedBackend {
                path: path.to_owned(),
                reports: Mutex::new(reports.into()),
                reloads: AtomicBool::new(false),
            }
        }
    }

    impl ModelBackend for ScriptedBackend {
        fn input_dim(&self) -> usize {
            16
        }

        fn incremental_update(
            &self,
            x: &[Vec<f64>],
            _y: &[f64],
            _options: &TrainOptions,
        ) -> Result<TrainingReport, BackendError> {
            assert!(x.iter().all(|row| row.len() == 16));
            fs::write(&self.path, b"checkpoint-drifted").unwrap();
            self.reports
                .lock()
                .pop_front()
                .ok_or_else(|| BackendError("no scripted report".to_owned()))
        }

        fn save_checkpoint(&self) -> Result<(), BackendError> {
            fs::write(&self.path, b"checkpoint-v2").unwrap();
            Ok(())
        }

        fn reload(&self) -> Result<(), BackendError> {
            self.reloads.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn checkpoint_path(&self) -> &Path {
            &self.path
        }
    }

    fn seed_alerts(store: &AlertStore, dfa: usize, ann_confidence: Option<(usize, f64)>) {
        for n in 0..dfa {
            store
                .insert(&NewAlert {
                    module: AlertModule::Dfa,
                    reason: format!("conflict {n}"),
                    src_ip: Some(Ipv4Addr::new(10, 0, 0, 1)),
                    src_mac: Some(Mac([2, 0, 0, 0, 0, 1])),
                    details: Map::new(),
                })
                .unwrap();
        }
        if let Some((count, confidence)) = ann_confidence {
            for n in 0..count {
                let mut details = Map::new();
                details.insert("confidence".to_owned(), Value::from(confidence));
                store
                    .insert(&NewAlert {
                        module: AlertModule::Ann,
                        reason: format!("spoof {n}"),
                        src_ip: Some(Ipv4Addr::new(10, 0, 0, 2)),
                        src_mac: Some(Mac([2, 0, 0, 0, 0, 2])),
                        details,
                    })
                    .unwrap();
            }
        }
    }

    fn learner_with(
        dir: &TempDir,
        store: Arc<AlertStore>,
        backend: Arc<ScriptedBackend>,
        min_samples: usize,
    ) -> Arc<ContinuousLearner> {
        let mut config = LearnerConfig::new(
            dir.path().join("backups"),
            dir.path().join("learner_state.json"),
        );
        config.min_samples = min_samples;
        Arc::new(ContinuousLearner::new(config, store, backend).unwrap())
    }

    // Scenario: a rejected cycle restores the checkpoint byte-for-byte,
    // leaves last_processed_alert_id unchanged, and records the
    // rejection.
    #[test]
    fn rejected_cycle_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::open_in_memory().unwrap());
        seed_alerts(&store, 100, Some((100, 0.05)));
        let backend = Arc::new(ScriptedBackend::new(
            &dir.path().join("model.json"),
            vec![TrainingReport {
                loss_mean: 0.8,
                accuracy_percent: 55.0,
                n_samples: 200,
            }],
        ));
        let before = fs::read(backend.checkpoint_path()).unwrap();
        let learner = learner_with(&dir, store, backend.clone(), 100);

        let outcome = learner.train_now().unwrap();
        assert!(matches!(outcome, CycleOutcome::Rejected(_)));
        assert_eq!(fs::read(backend.checkpoint_path()).unwrap(), before);
        assert!(backend.reloads.load(Ordering::SeqCst));

        let stats = learner.stats();
        assert_eq!(stats.last_processed_alert_id, 0);
        assert!(stats.last_training_time.is_some());
        assert_eq!(stats.total_training_cycles, 1);
        assert_eq!(stats.recent_history[0].outcome, "rejected");
        assert_eq!(stats.model_versions, 0);
    }

    #[test]
    fn committed_cycle_advances_watermark() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::open_in_memory().unwrap());
        seed_alerts(&store, 120, None);
        let backend = Arc::new(ScriptedBackend::new(
            &dir.path().join("model.json"),
            vec![TrainingReport {
                loss_mean: 0.3,
                accuracy_percent: 92.0,
                n_samples: 120,
            }],
        ));
        let learner = learner_with(&dir, store.clone(), backend.clone(), 100);

        let outcome = learner.train_now().unwrap();
        assert!(matches!(outcome, CycleOutcome::Committed(_)));
        assert_eq!(
            fs::read(backend.checkpoint_path()).unwrap(),
            b"checkpoint-v2"
        );
        let stats = learner.stats();
        assert_eq!(stats.last_processed_alert_id, 120);
        assert_eq!(stats.model_versions, 1);
        assert_eq!(stats.recent_history[0].outcome, "committed");
        // the watermark absorbed the batch, so the gate closes
        assert_eq!(store.count_since(stats.last_processed_alert_id).unwrap(), 0);
        // state survives a restart
        let state = LearnerState::load(&dir.path().join("learner_state.json")).unwrap();
        assert_eq!(state.last_processed_alert_id, 120);
    }

    #[test]
    fn unlabeled_batches_are_skipped_without_state_change() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::open_in_memory().unwrap());
        // mid-confidence ANN alerts: the labeler skips every one
        seed_alerts(&store, 0, Some((150, 0.6)));
        let backend = Arc::new(ScriptedBackend::new(&dir.path().join("model.json"), vec![]));
        let learner = learner_with(&dir, store, backend, 100);

        let outcome = learner.train_now().unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped { labeled: 0 });
        let stats = learner.stats();
        assert_eq!(stats.total_training_cycles, 0);
        assert!(stats.last_training_time.is_none());
    }

    #[test]
    fn gate_requires_min_samples() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::open_in_memory().unwrap());
        seed_alerts(&store, 40, None);
        let backend = Arc::new(ScriptedBackend::new(&dir.path().join("model.json"), vec![]));
        let learner = learner_with(&dir, store.clone(), backend, 100);
        assert!(!learner.should_train().unwrap());
        seed_alerts(&store, 80, None);
        assert!(learner.should_train().unwrap());
    }

    #[test]
    fn start_stop_and_reentrancy() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AlertStore::open_in_memory().unwrap());
        let backend = Arc::new(ScriptedBackend::new(&dir.path().join("model.json"), vec![]));
        let learner = learner_with(&dir, store, backend, 100);
        learner.start().unwrap();
        assert!(learner.is_running());
        assert!(matches!(
            learner.start().unwrap_err(),
            LearnerError::AlreadyRunning
        ));
        learner.stop().unwrap();
        assert!(!learner.is_running());
        assert!(matches!(
            learner.stop().unwrap_err(),
            LearnerError::NotRunning
        ));
    }
}
