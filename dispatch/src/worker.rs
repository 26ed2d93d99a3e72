// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Worker lanes and the pool of threads behind them.

use crossbeam_channel::{Receiver, Sender, bounded};
use net::Frame;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Something that consumes frames on a worker thread. One handler
/// instance exists per lane; it may keep mutable per-lane state.
pub trait FrameHandler: Send {
    fn handle(&mut self, frame: Frame);
}

/// Counters for one lane, shared with the dispatcher for least-loaded
/// selection and the stats surface.
#[derive(Debug, Default)]
pub struct LaneStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    busy_nanos: AtomicU64,
}

impl LaneStats {
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn busy_nanos(&self) -> u64 {
        self.busy_nanos.load(Ordering::Relaxed)
    }

    pub(crate) fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_processed(&self, elapsed: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        self.busy_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }
}

/// The dispatcher-facing side of one worker: its queue and counters.
#[derive(Debug, Clone)]
pub struct Lane {
    pub id: usize,
    pub(crate) tx: Sender<Frame>,
    pub stats: Arc<LaneStats>,
}

impl Lane {
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.tx.len()
    }
}

/// Join handles for the worker threads. Workers exit when every lane
/// sender has been dropped and their queue has drained.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait up to `grace` for workers to drain and exit. Stragglers are
    /// abandoned (threads cannot be killed); returns how many were.
    pub fn join(self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        let mut pending = self.handles;
        while !pending.is_empty() && Instant::now() < deadline {
            let (done, rest): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(JoinHandle::is_finished);
            for handle in done {
                let _ = handle.join();
            }
            pending = rest;
            if !pending.is_empty() {
                thread::sleep(Duration::from_millis(10));
            }
        }
        let stragglers = pending.len();
        if stragglers > 0 {
            warn!("abandoning {stragglers} worker(s) still draining after grace period");
        }
        stragglers
    }
}

fn single_worker(
    id: usize,
    queue_cap: usize,
    stats: Arc<LaneStats>,
    mut handler: Box<dyn FrameHandler>,
) -> io::Result<(Sender<Frame>, JoinHandle<()>)> {
    let (tx, rx): (Sender<Frame>, Receiver<Frame>) = bounded(queue_cap);
    let builder = thread::Builder::new().name(format!("worker-{id}"));
    let handle = builder.spawn(move || {
        debug!(worker = id, "worker started");
        while let Ok(frame) = rx.recv() {
            let started = Instant::now();
            handler.handle(frame);
            stats.record_processed(started.elapsed());
        }
        debug!(worker = id, "worker stopped");
    })?;
    Ok((tx, handle))
}

/// Spawn `workers` lanes, each with its own bounded queue and a handler
/// built by `factory`.
pub fn spawn_workers<F>(
    workers: usize,
    queue_cap: usize,
    factory: F,
) -> io::Result<(Vec<Lane>, WorkerPool)>
where
    F: Fn(usize) -> Box<dyn FrameHandler>,
{
    let workers = workers.max(1);
    info!("spawning {workers} workers (lane capacity {queue_cap})");
    let mut lanes = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers {
        let stats = Arc::new(LaneStats::default());
        let (tx, handle) = single_worker(id, queue_cap, stats.clone(), factory(id))?;
        lanes.push(Lane { id, tx, stats });
        handles.push(handle);
    }
    Ok((lanes, WorkerPool { handles }))
}
