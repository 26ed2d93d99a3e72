// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! The classifier: immutable state, shared inference, exclusive training.

use crate::nn::TabularNet;
use crate::scaler::StandardScaler;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Everything the model needs to produce (and keep producing) the same
/// answers: feature-name order, scaler and layer parameters, loaded and
/// persisted as one document.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassifierState {
    pub version: String,
    pub feature_names: Vec<String>,
    pub scaler: StandardScaler,
    pub net: TabularNet,
}

/// Errors loading or saving a checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] io::Error),
    #[error("checkpoint serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The feature-name list, scaler and network disagree about the input
    /// frame. Fatal: inference over a mismatched frame is garbage.
    #[error(
        "checkpoint mismatch: {features} feature names, scaler width {scaler}, network input {input}"
    )]
    FeatureMismatch {
        features: usize,
        scaler: usize,
        input: usize,
    },
}

/// Errors from inference.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PredictError {
    #[error("feature vector width {got} does not match model input {expected}")]
    WidthMismatch { got: usize, expected: usize },
}

/// Errors from incremental training.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrainError {
    #[error("no training samples supplied")]
    Empty,
    #[error("training matrix width {got} does not match model input {expected}")]
    WidthMismatch { got: usize, expected: usize },
    #[error("labels ({labels}) do not match samples ({samples})")]
    LabelMismatch { labels: usize, samples: usize },
}

/// Knobs for one incremental update.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            epochs: 3,
            learning_rate: 1e-4,
            weight_decay: 1e-4,
            batch_size: 32,
        }
    }
}

/// Outcome of one incremental update.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrainingReport {
    pub loss_mean: f64,
    pub accuracy_percent: f64,
    pub n_samples: usize,
}

/// The deployed binary classifier.
///
/// Inference takes the state lock shared; training takes it exclusive, so
/// the two never interleave over the same parameters. Training is
/// self-contained and the model is back in inference form when
/// [`Classifier::incremental_update`] returns.
#[derive(Debug)]
pub struct Classifier {
    path: PathBuf,
    state: RwLock<ClassifierState>,
}

fn validate(state: &ClassifierState) -> Result<(), CheckpointError> {
    let features = state.feature_names.len();
    let scaler = state.scaler.width();
    let input = state.net.input_dim;
    let first_block = state.net.blocks.first().map_or(input, |block| block.linear.fan_in());
    if features != scaler || features != input || first_block != input {
        return Err(CheckpointError::FeatureMismatch {
            features,
            scaler,
            input,
        });
    }
    if state.scaler.std.len() != scaler {
        return Err(CheckpointError::FeatureMismatch {
            features,
            scaler: state.scaler.std.len(),
            input,
        });
    }
    Ok(())
}

impl Classifier {
    /// Load the checkpoint at `path`. Refuses mismatched state.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let text = fs::read_to_string(path)?;
        let state: ClassifierState = serde_json::from_str(&text)?;
        validate(&state)?;
        info!(
            version = %state.version,
            features = state.feature_names.len(),
            "classifier loaded"
        );
        Ok(Classifier {
            path: path.to_owned(),
            state: RwLock::new(state),
        })
    }

    /// Wrap an in-memory state (bootstrap and tests). Does not persist.
    pub fn from_state(path: &Path, state: ClassifierState) -> Result<Self, CheckpointError> {
        validate(&state)?;
        Ok(Classifier {
            path: path.to_owned(),
            state: RwLock::new(state),
        })
    }

    #[must_use]
    pub fn checkpoint_path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.state.read().net.input_dim
    }

    #[must_use]
    pub fn version(&self) -> String {
        self.state.read().version.clone()
    }

    #[must_use]
    pub fn feature_names(&self) -> Vec<String> {
        self.state.read().feature_names.clone()
    }

    /// Classify one scaled-on-entry feature vector.
    pub fn predict(&self, features: &[f64]) -> Result<(bool, f64), PredictError> {
        let state = self.state.read();
        if features.len() != state.net.input_dim {
            return Err(PredictError::WidthMismatch {
                got: features.len(),
                expected: state.net.input_dim,
            });
        }
        let scaled = state.scaler.transform(features);
        let prob = state.net.probability(&scaled);
        Ok((prob >= 0.5, prob))
    }

    /// Classify a batch of feature vectors.
    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<(bool, f64)>, PredictError> {
        let state = self.state.read();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != state.net.input_dim {
                return Err(PredictError::WidthMismatch {
                    got: row.len(),
                    expected: state.net.input_dim,
                });
            }
            let scaled = state.scaler.transform(row);
            let prob = state.net.probability(&scaled);
            out.push((prob >= 0.5, prob));
        }
        Ok(out)
    }

    /// Run a short supervised pass over recent samples under the
    /// exclusive lock. Metrics mirror the historical shape: loss is the
    /// per-epoch sum of batch means averaged over epochs, accuracy the
    /// percentage of correct predictions across every (epoch, batch).
    pub fn incremental_update(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        options: &TrainOptions,
    ) -> Result<TrainingReport, TrainError> {
        if x.is_empty() {
            return Err(TrainError::Empty);
        }
        if x.len() != y.len() {
            return Err(TrainError::LabelMismatch {
                labels: y.len(),
                samples: x.len(),
            });
        }
        let mut state = self.state.write();
        let input_dim = state.net.input_dim;
        if let Some(bad) = x.iter().find(|row| row.len() != input_dim) {
            return Err(TrainError::WidthMismatch {
                got: bad.len(),
                expected: input_dim,
            });
        }

        let scaled: Vec<Vec<f64>> = x.iter().map(|row| state.scaler.transform(row)).collect();
        let mut order: Vec<usize> = (0..scaled.len()).collect();
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let epochs = options.epochs.max(1);
        let batch_size = options.batch_size.max(1);

        let mut loss_total = 0.0;
        let mut correct = 0usize;
        let mut seen = 0usize;
        for _ in 0..epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            for chunk in order.chunks(batch_size) {
                let batch: Vec<(&[f64], f64)> = chunk
                    .iter()
                    .map(|&index| (scaled[index].as_slice(), y[index]))
                    .collect();
                seen += batch.len();
                epoch_loss += state.net.sgd_step(
                    &batch,
                    options.learning_rate,
                    options.weight_decay,
                    &mut rng,
                    &mut correct,
                );
            }
            loss_total += epoch_loss;
        }

        #[allow(clippy::cast_precision_loss)]
        let report = TrainingReport {
            loss_mean: loss_total / epochs as f64,
            accuracy_percent: if seen > 0 {
                100.0 * correct as f64 / seen as f64
            } else {
                0.0
            },
            n_samples: x.len(),
        };
        info!(
            loss = report.loss_mean,
            accuracy = report.accuracy_percent,
            samples = report.n_samples,
            "incremental update complete"
        );
        Ok(report)
    }

    /// Persist the current state to the active checkpoint path,
    /// write-temp-then-rename.
    pub fn save(&self) -> Result<(), CheckpointError> {
        self.save_to(&self.path.clone())
    }

    /// Persist the current state to an arbitrary path atomically.
    pub fn save_to(&self, path: &Path) -> Result<(), CheckpointError> {
        let state = self.state.read();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&*state)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Re-read the checkpoint from disk, replacing the live state. Used
    /// by the learner's rollback path.
    pub fn reload(&self) -> Result<(), CheckpointError> {
        let text = fs::read_to_string(&self.path)?;
        let fresh: ClassifierState = serde_json::from_str(&text)?;
        validate(&fresh)?;
        *self.state.write() = fresh;
        warn!("classifier state reloaded from {}", self.path.display());
        Ok(())
    }

    /// Build a randomly-initialized state for a feature list (bootstrap
    /// and tests).
    #[must_use]
    pub fn fresh_state(
        version: &str,
        feature_names: Vec<String>,
        hidden_dims: &[usize],
        dropout: f64,
        seed: u64,
    ) -> ClassifierState {
        let width = feature_names.len();
        let mut rng = StdRng::seed_from_u64(seed);
        ClassifierState {
            version: version.to_owned(),
            feature_names,
            scaler: StandardScaler::identity(width),
            net: TabularNet::initialized(width, hidden_dims, dropout, &mut rng),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    fn feature_names(width: usize) -> Vec<String> {
        (0..width).map(|i| format!("feat_{i}")).collect()
    }

    fn small_state() -> ClassifierState {
        Classifier::fresh_state("test-1", feature_names(4), &[8, 4], 0.0, 99)
    }

    #[test]
    fn predict_is_deterministic_and_bounded() {
        let dir = TempDir::new().unwrap();
        let classifier =
            Classifier::from_state(&dir.path().join("model.json"), small_state()).unwrap();
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let (label_a, prob_a) = classifier.predict(&x).unwrap();
        let (label_b, prob_b) = classifier.predict(&x).unwrap();
        assert_eq!((label_a, prob_a), (label_b, prob_b));
        assert!((0.0..=1.0).contains(&prob_a));
        assert_eq!(label_a, prob_a >= 0.5);
    }

    #[test]
    fn predict_rejects_wrong_width() {
        let dir = TempDir::new().unwrap();
        let classifier =
            Classifier::from_state(&dir.path().join("model.json"), small_state()).unwrap();
        assert_eq!(
            classifier.predict(&[1.0, 2.0]).unwrap_err(),
            PredictError::WidthMismatch { got: 2, expected: 4 }
        );
    }

    #[test]
    fn batch_matches_single() {
        let dir = TempDir::new().unwrap();
        let classifier =
            Classifier::from_state(&dir.path().join("model.json"), small_state()).unwrap();
        let rows = vec![vec![0.0, 1.0, 2.0, 3.0], vec![9.0, 8.0, 7.0, 6.0]];
        let batch = classifier.predict_batch(&rows).unwrap();
        for (row, expected) in rows.iter().zip(&batch) {
            assert_eq!(&classifier.predict(row).unwrap(), expected);
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let classifier = Classifier::from_state(&path, small_state()).unwrap();
        classifier.save().unwrap();
        let reloaded = Classifier::load(&path).unwrap();
        assert_eq!(reloaded.version(), "test-1");
        assert_eq!(reloaded.feature_names(), feature_names(4));
        let x = vec![0.5, 0.5, 0.5, 0.5];
        assert_eq!(
            classifier.predict(&x).unwrap(),
            reloaded.predict(&x).unwrap()
        );
    }

    #[test]
    fn mismatched_checkpoint_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let mut state = small_state();
        state.feature_names.push("extra".to_owned());
        let err = Classifier::from_state(&path, state).unwrap_err();
        assert!(matches!(err, CheckpointError::FeatureMismatch { .. }));
    }

    #[test]
    fn incremental_update_returns_metrics_and_stays_deterministic_after() {
        let dir = TempDir::new().unwrap();
        let classifier =
            Classifier::from_state(&dir.path().join("model.json"), small_state()).unwrap();
        let x: Vec<Vec<f64>> = (0..40)
            .map(|i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                vec![sign, sign * 2.0, -sign, 0.5]
            })
            .collect();
        let y: Vec<f64> = (0..40).map(|i| f64::from(u8::from(i % 2 == 0))).collect();
        let report = classifier
            .incremental_update(&x, &y, &TrainOptions::default())
            .unwrap();
        assert_eq!(report.n_samples, 40);
        assert!(report.loss_mean.is_finite());
        assert!((0.0..=100.0).contains(&report.accuracy_percent));
        // back in inference form: repeated predictions agree
        let probe = vec![1.0, 2.0, -1.0, 0.5];
        assert_eq!(
            classifier.predict(&probe).unwrap(),
            classifier.predict(&probe).unwrap()
        );
    }

    #[test]
    fn incremental_update_validates_inputs() {
        let dir = TempDir::new().unwrap();
        let classifier =
            Classifier::from_state(&dir.path().join("model.json"), small_state()).unwrap();
        assert_eq!(
            classifier
                .incremental_update(&[], &[], &TrainOptions::default())
                .unwrap_err(),
            TrainError::Empty
        );
        assert_eq!(
            classifier
                .incremental_update(&[vec![1.0, 2.0]], &[1.0], &TrainOptions::default())
                .unwrap_err(),
            TrainError::WidthMismatch { got: 2, expected: 4 }
        );
    }

    #[test]
    fn reload_restores_disk_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let classifier = Classifier::from_state(&path, small_state()).unwrap();
        classifier.save().unwrap();
        let probe = vec![1.0, 1.0, 1.0, 1.0];
        let before = classifier.predict(&probe).unwrap();

        // drift the live state with an update, then roll back from disk
        let x = vec![vec![1.0, 1.0, 1.0, 1.0]; 8];
        let y = vec![1.0; 8];
        let options = TrainOptions {
            learning_rate: 0.1,
            ..TrainOptions::default()
        };
        classifier.incremental_update(&x, &y, &options).unwrap();
        classifier.reload().unwrap();
        assert_eq!(classifier.predict(&probe).unwrap(), before);
    }
}
