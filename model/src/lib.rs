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

//! Feature schemas, extractors and the binary classifier.
//!
//! The classifier is a fixed-topology feed-forward net over a versioned,
//! named feature vector. One immutable [`ClassifierState`] couples the
//! feature-name order, the scaler and the layer parameters; it loads and
//! persists atomically, and a checkpoint whose pieces disagree is refused
//! outright.

pub mod classifier;
pub mod extract;
pub mod nn;
pub mod scaler;
pub mod schema;

pub use classifier::{
    CheckpointError, Classifier, ClassifierState, PredictError, TrainError, TrainOptions,
    TrainingReport,
};
pub use extract::{AlertEncoder, LiveFeatureExtractor};
pub use nn::TabularNet;
pub use scaler::StandardScaler;
pub use schema::{FeatureKind, FeatureSchema, SchemaError, SchemaRegistry};
