// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! The seam between the learner and the deployed model.

use model::{Classifier, TrainOptions, TrainingReport};
use std::path::Path;

/// Backend failure; the learner records it and moves on to the next
/// cycle.
#[derive(Debug, thiserror::Error)]
#[error("model backend error: {0}")]
pub struct BackendError(pub String);

/// What the learner needs from a deployed model: train a little, persist
/// atomically, and reload after a rollback.
pub trait ModelBackend: Send + Sync {
    fn input_dim(&self) -> usize;

    fn incremental_update(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        options: &TrainOptions,
    ) -> Result<TrainingReport, BackendError>;

    /// Persist the live state to the active checkpoint path.
    fn save_checkpoint(&self) -> Result<(), BackendError>;

    /// Replace the live state with whatever the checkpoint file holds.
    fn reload(&self) -> Result<(), BackendError>;

    fn checkpoint_path(&self) -> &Path;
}

impl ModelBackend for Classifier {
    fn input_dim(&self) -> usize {
        Classifier::input_dim(self)
    }

    fn incremental_update(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        options: &TrainOptions,
    ) -> Result<TrainingReport, BackendError> {
        Classifier::incremental_update(self, x, y, options).map_err(|e| BackendError(e.to_string()))
    }

    fn save_checkpoint(&self) -> Result<(), BackendError> {
        self.save().map_err(|e| BackendError(e.to_string()))
    }

    fn reload(&self) -> Result<(), BackendError> {
        Classifier::reload(self).map_err(|e| BackendError(e.to_string()))
    }

    fn checkpoint_path(&self) -> &Path {
        Classifier::checkpoint_path(self)
    }
}
