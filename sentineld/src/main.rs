// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

//! The sensor daemon: wires capture, detection, persistence, broadcast
//! and continuous learning together and owns their lifecycles.

mod args;
mod chain;
mod maintenance;
mod supervisor;

use crate::args::{CmdArgs, Parser};
use crate::chain::AnalyzerChain;
use crate::maintenance::RetentionPolicy;
use crate::supervisor::{SnifferSupervisor, SupervisorConfig};
use capture::InterfaceRegistry;
use config::Settings;
use detect::{ArpAnalyzer, DfaFilter, VendorChecker};
use hub::{AlertEvent, BroadcastHub, HubConfig};
use learn::{ContinuousLearner, LearnerConfig};
use model::{Classifier, LiveFeatureExtractor, SchemaRegistry};
use std::process::ExitCode;
use std::sync::Arc;
use store::{AlertStore, ThreatIntelStore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Default topology for a bootstrap model when no checkpoint exists yet.
const BOOTSTRAP_HIDDEN_DIMS: &[usize] = &[512, 256, 128, 64];
const BOOTSTRAP_DROPOUT: f64 = 0.35;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn load_or_bootstrap_classifier(
    settings: &Settings,
) -> Result<Classifier, Box<dyn std::error::Error>> {
    if settings.model_path.exists() {
        // a checkpoint that fails validation is the one hard-stop: the
        // sensor refuses to run inference over a mismatched frame
        return Ok(Classifier::load(&settings.model_path)?);
    }
    info!(
        "no checkpoint at {}, bootstrapping a fresh model",
        settings.model_path.display()
    );
    let mut registry = SchemaRegistry::open(&settings.schema_dir)?;
    if registry.latest().is_none() {
        let schema = LiveFeatureExtractor::default_schema();
        registry.register(
            &schema.version,
            &schema.name,
            &schema.description,
            schema.features.clone(),
            schema.feature_types.clone(),
        )?;
    }
    #[allow(clippy::unwrap_used)] // just registered above
    let schema = registry.latest().unwrap().clone();
    let state = Classifier::fresh_state(
        "bootstrap-1",
        schema.features,
        BOOTSTRAP_HIDDEN_DIMS,
        BOOTSTRAP_DROPOUT,
        rand_seed(),
    );
    let classifier = Classifier::from_state(&settings.model_path, state)?;
    classifier.save()?;
    Ok(classifier)
}

fn rand_seed() -> u64 {
    // wall clock is random enough for weight initialization
    #[allow(clippy::cast_sign_loss)]
    let seed = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(1) as u64;
    seed
}

#[allow(clippy::too_many_lines)]
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = CmdArgs::parse();

    if args.list_interfaces {
        for (name, ifindex) in InterfaceRegistry::discover() {
            println!("{ifindex:>3}  {name}");
        }
        return Ok(());
    }

    let mut settings = Settings::from_env()?;
    if !args.interface.is_empty() {
        settings.interfaces = args.interface.clone();
    }
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    if let Some(strategy) = &args.strategy {
        settings.strategy = strategy.parse()?;
    }
    if let Some(database) = &args.database {
        settings.database_path = database.clone();
    }
    if let Some(model) = &args.model {
        settings.model_path = model.clone();
    }
    if settings.interfaces.is_empty() {
        return Err("no interfaces specified (use --interface or SENTINEL_INTERFACES)".into());
    }

    // durable state
    let alerts = Arc::new(AlertStore::open(&settings.database_path)?);
    let intel = Arc::new(ThreatIntelStore::open(&settings.database_path)?);

    // broadcast fan-out, fed from the store's post-commit hook
    let broadcast = Arc::new(BroadcastHub::new(HubConfig {
        queue_capacity: settings.hub_queue_capacity,
        ..HubConfig::default()
    }));
    let hub_for_store = broadcast.clone();
    alerts.set_on_insert(Box::new(move |alert| {
        let event = AlertEvent::new_alert(
            alert.id,
            alert.timestamp.to_rfc3339(),
            alert.module.as_str(),
            &alert.reason,
            alert.src_ip.map(|ip| ip.to_string()),
            alert.src_mac.map(|mac| mac.to_string()),
        );
        hub_for_store.broadcast_event(&event);
    }));

    // the model and its live extractor
    let classifier = Arc::new(load_or_bootstrap_classifier(&settings)?);
    let schema_registry = SchemaRegistry::open(&settings.schema_dir)?;
    let schema = schema_registry
        .latest()
        .cloned()
        .unwrap_or_else(LiveFeatureExtractor::default_schema);
    let extractor = Arc::new(LiveFeatureExtractor::new(schema));

    // analyzers
    let dfa = Arc::new(DfaFilter::new(
        settings.gratuitous_threshold,
        settings.gratuitous_window,
    ));
    let analyzer = Arc::new(ArpAnalyzer::default());
    let vendor = Arc::new(VendorChecker::new());
    let analyzer_chain = Arc::new(AnalyzerChain::new(
        dfa.clone(),
        analyzer.clone(),
        vendor,
        extractor.clone(),
        classifier.clone(),
        Some(intel.clone()),
        alerts.clone(),
    ));

    // capture fabric
    let registry = Arc::new(InterfaceRegistry::new());
    let sniffer = SnifferSupervisor::new(
        SupervisorConfig {
            workers: settings.workers,
            strategy: settings.strategy,
            ..SupervisorConfig::default()
        },
        registry,
        analyzer_chain,
    );
    sniffer.start(&settings.interfaces)?;

    // continuous learning
    let mut learner_config = LearnerConfig::new(
        settings.backup_dir.clone(),
        settings.learner_state_path.clone(),
    );
    learner_config.learning_interval = settings.learner.learning_interval;
    learner_config.min_samples = settings.learner.min_samples;
    learner_config.max_history = settings.learner.max_history;
    learner_config.train.batch_size = settings.learner.batch_size;
    learner_config.train.learning_rate = settings.learner.learning_rate;
    let learner = Arc::new(ContinuousLearner::new(
        learner_config,
        alerts.clone(),
        classifier,
    )?);
    learner.start()?;

    // sweepers and retention
    let tasks = maintenance::spawn(
        analyzer,
        dfa,
        extractor,
        broadcast,
        alerts,
        intel,
        RetentionPolicy {
            days_to_keep: settings.retention.days_to_keep,
            archive_days_to_keep: settings.retention.archive_days_to_keep,
        },
    )?;

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;
    info!("sentinel sensor running; SIGINT to stop");
    let _ = stop_rx.recv();

    info!("shutting down");
    if let Err(e) = sniffer.stop() {
        error!("sniffer shutdown failed: {e}");
    }
    if let Err(e) = learner.stop() {
        error!("learner shutdown failed: {e}");
    }
    tasks.stop();
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    info!("starting sentinel sensor");
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
