// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! The dispatcher: routes frames from capture queues to worker lanes.

use crate::strategy::Strategy;
use crate::worker::Lane;
use crossbeam_channel::{Receiver, Select};
use net::{Frame, InterfaceId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const READY_TIMEOUT: Duration = Duration::from_millis(100);

/// Routes frames to worker lanes according to a [`Strategy`].
///
/// All routing state is interior so the dispatcher can be shared between
/// the run loop and the stats surface.
pub struct Dispatcher {
    lanes: Vec<Lane>,
    strategy: Strategy,
    rr_counter: AtomicUsize,
    affinity: Mutex<HashMap<InterfaceId, usize>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(lanes: Vec<Lane>, strategy: Strategy) -> Self {
        info!(
            "dispatcher ready: {} lanes, strategy={strategy}",
            lanes.len()
        );
        Dispatcher {
            lanes,
            strategy,
            rr_counter: AtomicUsize::new(0),
            affinity: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    #[must_use]
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    fn least_loaded(&self) -> usize {
        let mut best = 0usize;
        let mut best_load = u64::MAX;
        for (id, lane) in self.lanes.iter().enumerate() {
            let load = lane.stats.processed();
            if load < best_load {
                best_load = load;
                best = id;
            }
        }
        best
    }

    fn select_lane(&self, iface: InterfaceId) -> usize {
        match self.strategy {
            Strategy::RoundRobin => self.rr_counter.fetch_add(1, Ordering::Relaxed) % self.lanes.len(),
            Strategy::LeastLoaded => self.least_loaded(),
            Strategy::Affinity => {
                let mut pins = self.affinity.lock();
                if let Some(lane) = pins.get(&iface) {
                    *lane
                } else {
                    let lane = self.least_loaded();
                    pins.insert(iface, lane);
                    debug!(iface = %iface, lane, "pinned interface to lane");
                    lane
                }
            }
        }
    }

    /// Route one frame. A full lane drops it and bumps the lane's drop
    /// counter; overflow never propagates upstream.
    pub fn route(&self, frame: Frame) {
        let target = self.select_lane(frame.iface);
        let lane = &self.lanes[target];
        if lane.tx.try_send(frame).is_err() {
            lane.stats.record_drop();
            warn!(lane = target, "lane queue full: dropping frame");
        }
    }

    /// Drain frames from the capture queues until `shutdown` is raised,
    /// then return. Remaining lane contents are drained by the workers
    /// themselves once the dispatcher (and its lane senders) is dropped.
    pub fn run(&self, sources: &[Receiver<Frame>], shutdown: &AtomicBool) {
        if sources.is_empty() {
            warn!("dispatcher started with no capture sources");
            return;
        }
        let mut select = Select::new();
        for source in sources {
            select.recv(source);
        }
        info!("dispatcher loop running over {} sources", sources.len());
        while !shutdown.load(Ordering::Relaxed) {
            match select.ready_timeout(READY_TIMEOUT) {
                Ok(index) => {
                    while let Ok(frame) = sources[index].try_recv() {
                        self.route(frame);
                    }
                }
                Err(_) => continue,
            }
        }
        info!("dispatcher loop stopped");
    }

    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let lanes: Vec<LaneSnapshot> = self
            .lanes
            .iter()
            .map(|lane| {
                let processed = lane.stats.processed();
                let busy_nanos = lane.stats.busy_nanos();
                #[allow(clippy::cast_precision_loss)]
                let avg_processing_ms = if processed > 0 {
                    busy_nanos as f64 / processed as f64 / 1_000_000.0
                } else {
                    0.0
                };
                LaneSnapshot {
                    id: lane.id,
                    processed,
                    dropped: lane.stats.dropped(),
                    queue_len: lane.queue_len(),
                    avg_processing_ms,
                }
            })
            .collect();
        DispatcherStats {
            strategy: self.strategy,
            total_processed: lanes.iter().map(|lane| lane.processed).sum(),
            total_dropped: lanes.iter().map(|lane| lane.dropped).sum(),
            lanes,
        }
    }
}

/// Serializable dispatcher counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatcherStats {
    pub strategy: Strategy,
    pub total_processed: u64,
    pub total_dropped: u64,
    pub lanes: Vec<LaneSnapshot>,
}

/// Serializable per-lane counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LaneSnapshot {
    pub id: usize,
    pub processed: u64,
    pub dropped: u64,
    pub queue_len: usize,
    pub avg_processing_ms: f64,
}
