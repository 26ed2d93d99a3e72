// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Sniffer lifecycle: bring capture, dispatch and workers up and down as
//! one unit.

use crate::chain::{AnalyzerChain, ChainHandler};
use capture::engine::CaptureHandle;
use capture::{FrameQueue, InterfaceRegistry};
use chrono::{DateTime, Utc};
use dispatch::{Dispatcher, DispatcherStats, Strategy, spawn_workers};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub workers: usize,
    pub strategy: Strategy,
    /// Per-lane queue bound.
    pub lane_capacity: usize,
    /// Per-interface capture queue bound.
    pub capture_queue_capacity: usize,
    /// How long `stop` waits for lanes to drain.
    pub drain_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            workers: 4,
            strategy: Strategy::LeastLoaded,
            lane_capacity: 1024,
            capture_queue_capacity: 4096,
            drain_grace: Duration::from_secs(5),
        }
    }
}

/// Errors from lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("sniffer already running")]
    AlreadyRunning,
    #[error("sniffer is not running")]
    NotRunning,
    #[error("no interface could be opened for capture")]
    NoCapture,
    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Status snapshot for the control surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SnifferStatus {
    pub running: bool,
    pub interfaces: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_s: u64,
}

struct RunningSniffer {
    interfaces: Vec<String>,
    started_at: DateTime<Utc>,
    started_mono: Instant,
    shutdown: Arc<AtomicBool>,
    captures: Vec<CaptureHandle>,
    dispatcher: Arc<Dispatcher>,
    dispatcher_thread: JoinHandle<()>,
    pool: dispatch::WorkerPool,
}

/// Owns the capture-to-worker pipeline.
pub struct SnifferSupervisor {
    config: SupervisorConfig,
    registry: Arc<InterfaceRegistry>,
    chain: Arc<AnalyzerChain>,
    running: Mutex<Option<RunningSniffer>>,
}

impl SnifferSupervisor {
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        registry: Arc<InterfaceRegistry>,
        chain: Arc<AnalyzerChain>,
    ) -> Self {
        SnifferSupervisor {
            config,
            registry,
            chain,
            running: Mutex::new(None),
        }
    }

    /// Bring the pipeline up on the named interfaces.
    ///
    /// A dead interface is fatal for itself only: it is skipped with an
    /// error. Only a start with zero usable interfaces fails.
    pub fn start(&self, interfaces: &[String]) -> Result<(), SupervisorError> {
        let mut running = self.running.lock();
        if running.is_some() {
            warn!("sniffer already running");
            return Err(SupervisorError::AlreadyRunning);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut captures = Vec::new();
        let mut receivers = Vec::new();
        let mut started = Vec::new();
        for name in interfaces {
            let ifindex = match InterfaceRegistry::resolve_ifindex(name) {
                Ok(ifindex) => ifindex,
                Err(e) => {
                    error!("skipping interface '{name}': {e}");
                    continue;
                }
            };
            let stats = match self.registry.add(name, ifindex) {
                Ok(stats) => stats,
                Err(e) => {
                    error!("skipping interface '{name}': {e}");
                    continue;
                }
            };
            let queue = FrameQueue::with_capacity(self.config.capture_queue_capacity);
            match capture::engine::spawn(name, ifindex, stats, queue.clone(), shutdown.clone()) {
                Ok(handle) => {
                    receivers.push(queue.receiver());
                    captures.push(handle);
                    started.push(name.clone());
                }
                Err(e) => {
                    error!("capture unavailable on '{name}': {e}");
                    self.registry.remove(name);
                }
            }
        }
        if captures.is_empty() {
            return Err(SupervisorError::NoCapture);
        }

        let chain = self.chain.clone();
        let (lanes, pool) = spawn_workers(self.config.workers, self.config.lane_capacity, |_| {
            Box::new(ChainHandler::new(chain.clone()))
        })?;
        let dispatcher = Arc::new(Dispatcher::new(lanes, self.config.strategy));
        let dispatcher_for_loop = dispatcher.clone();
        let shutdown_for_loop = shutdown.clone();
        let dispatcher_thread = thread::Builder::new()
            .name("dispatcher".to_owned())
            .spawn(move || dispatcher_for_loop.run(&receivers, &shutdown_for_loop))?;

        info!(
            interfaces = started.len(),
            workers = self.config.workers,
            strategy = %self.config.strategy,
            "sniffer started"
        );
        *running = Some(RunningSniffer {
            interfaces: started,
            started_at: Utc::now(),
            started_mono: Instant::now(),
            shutdown,
            captures,
            dispatcher,
            dispatcher_thread,
            pool,
        });
        Ok(())
    }

    /// Cascade shutdown: capture stops, the dispatcher loop exits, lanes
    /// close and workers drain within the grace window.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let Some(run) = self.running.lock().take() else {
            return Err(SupervisorError::NotRunning);
        };
        info!("stopping sniffer");
        run.shutdown.store(true, Ordering::Relaxed);
        for capture in run.captures {
            capture.join();
        }
        if run.dispatcher_thread.join().is_err() {
            error!("dispatcher thread panicked");
        }
        let final_stats = run.dispatcher.stats();
        info!(
            processed = final_stats.total_processed,
            dropped = final_stats.total_dropped,
            "dispatcher drained"
        );
        // dropping the last dispatcher handle closes the lane senders,
        // letting workers drain their queues and exit
        drop(run.dispatcher);
        let stragglers = run.pool.join(self.config.drain_grace);
        if stragglers > 0 {
            warn!("{stragglers} worker(s) did not drain within the grace window");
        }
        for name in &run.interfaces {
            self.registry.remove(name);
        }
        info!("sniffer stopped");
        Ok(())
    }

    #[must_use]
    pub fn status(&self) -> SnifferStatus {
        let running = self.running.lock();
        match &*running {
            Some(run) => SnifferStatus {
                running: true,
                interfaces: run.interfaces.clone(),
                started_at: Some(run.started_at),
                uptime_s: run.started_mono.elapsed().as_secs(),
            },
            None => SnifferStatus {
                running: false,
                interfaces: Vec::new(),
                started_at: None,
                uptime_s: 0,
            },
        }
    }

    /// Dispatcher counters for the running pipeline, if any.
    #[must_use]
    pub fn dispatcher_stats(&self) -> Option<DispatcherStats> {
        self.running
            .lock()
            .as_ref()
            .map(|run| run.dispatcher.stats())
    }
}
