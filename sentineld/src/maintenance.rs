// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Background maintenance: state sweepers and alert retention.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use detect::{ArpAnalyzer, DfaFilter};
use hub::BroadcastHub;
use model::LiveFeatureExtractor;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use store::{AlertStore, ThreatIntelStore};
use tracing::{debug, error, info};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const RETENTION_INTERVAL: Duration = Duration::from_secs(3600);
/// Per-sender state idle longer than this is dropped by the sweeper.
const SENDER_IDLE_LIMIT: Duration = Duration::from_secs(600);

/// Retention knobs for the periodic lifecycle pass.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub days_to_keep: i64,
    pub archive_days_to_keep: i64,
}

/// Handle over the maintenance threads. Dropping the shutdown sender
/// wakes and terminates every loop.
pub struct MaintenanceTasks {
    shutdown: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceTasks {
    /// Stop the loops and wait for them.
    pub fn stop(mut self) {
        self.shutdown.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("maintenance thread panicked");
            }
        }
        info!("maintenance tasks stopped");
    }
}

fn wait_or_exit(shutdown: &Receiver<()>, interval: Duration) -> bool {
    matches!(
        shutdown.recv_timeout(interval),
        Err(RecvTimeoutError::Timeout)
    )
}

/// Spawn the sweeper and retention threads.
pub fn spawn(
    analyzer: Arc<ArpAnalyzer>,
    dfa: Arc<DfaFilter>,
    extractor: Arc<LiveFeatureExtractor>,
    broadcast: Arc<BroadcastHub>,
    alerts: Arc<AlertStore>,
    intel: Arc<ThreatIntelStore>,
    retention: RetentionPolicy,
) -> Result<MaintenanceTasks, io::Error> {
    let (shutdown, sweeper_rx) = bounded::<()>(0);
    let retention_rx = sweeper_rx.clone();

    let sweeper = thread::Builder::new().name("sweeper".to_owned()).spawn(move || {
        debug!("sweeper running");
        while wait_or_exit(&sweeper_rx, SWEEP_INTERVAL) {
            let pending = analyzer.sweep_pending();
            let idle = analyzer.sweep_idle(SENDER_IDLE_LIMIT);
            let stale_macs = dfa.sweep(Instant::now());
            let stale_senders = extractor.sweep_idle(SENDER_IDLE_LIMIT);
            let pruned = broadcast.prune_stale().len();
            debug!(
                pending, idle, stale_macs, stale_senders, pruned,
                "sweep pass complete"
            );
        }
    })?;

    let retention_thread = thread::Builder::new().name("retention".to_owned()).spawn(move || {
        debug!("retention running");
        while wait_or_exit(&retention_rx, RETENTION_INTERVAL) {
            match alerts.rotate(retention.days_to_keep) {
                Ok(rotated) if rotated > 0 => info!("retention archived {rotated} alerts"),
                Ok(_) => {}
                Err(e) => error!("alert rotation failed: {e}"),
            }
            if let Err(e) = alerts.cleanup_archives(retention.archive_days_to_keep) {
                error!("archive cleanup failed: {e}");
            }
            if let Err(e) = intel.cleanup_expired() {
                error!("indicator cleanup failed: {e}");
            }
        }
    })?;

    Ok(MaintenanceTasks {
        shutdown: Some(shutdown),
        handles: vec![sweeper, retention_thread],
    })
}
