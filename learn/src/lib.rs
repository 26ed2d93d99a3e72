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

//! The continuous-learning controller.
//!
//! A single coordinator thread periodically turns recent alerts into
//! weakly-labeled training data, fine-tunes the classifier behind the
//! [`ModelBackend`] seam, validates the result, and either commits the
//! new checkpoint or restores the byte-identical backup.

pub mod backend;
pub mod labeler;
pub mod learner;
pub mod state;

pub use backend::{BackendError, ModelBackend};
pub use labeler::auto_label;
pub use learner::{ContinuousLearner, CycleOutcome, LearnerConfig, LearnerError, LearnerStats};
pub use state::{CycleRecord, LearnerState, VersionRecord};
