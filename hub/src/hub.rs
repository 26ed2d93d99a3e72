// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Subscriber registry and fan-out.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Hub tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Per-subscriber queue bound.
    pub queue_capacity: usize,
    /// Consecutive drops after which a subscriber is disconnected.
    pub overflow_disconnect: u64,
    /// Subscribers silent longer than this are pruned.
    pub heartbeat_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            queue_capacity: 64,
            overflow_disconnect: 256,
            heartbeat_timeout: Duration::from_secs(120),
        }
    }
}

struct SubscriberEntry {
    tx: Sender<String>,
    /// Receiver clone used only to evict the oldest event on overflow.
    rx: Receiver<String>,
    dropped: u64,
    overflow_streak: u64,
    last_seen: Instant,
}

/// A subscriber's receiving end. Unregister via
/// [`BroadcastHub::unsubscribe`] when done.
pub struct Subscription {
    pub id: u64,
    rx: Receiver<String>,
}

impl Subscription {
    #[must_use]
    pub fn receiver(&self) -> &Receiver<String> {
        &self.rx
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        self.rx.recv_timeout(timeout).ok()
    }

    #[must_use]
    pub fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

/// Serializable per-subscriber counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriberSnapshot {
    pub id: u64,
    pub queued: usize,
    pub dropped: u64,
    pub overflow_streak: u64,
}

/// Serializable hub counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HubStats {
    pub subscribers: Vec<SubscriberSnapshot>,
    pub events_published: u64,
    pub events_dropped: u64,
}

/// The hub. All methods are non-blocking from the caller's perspective.
pub struct BroadcastHub {
    config: HubConfig,
    subscribers: Mutex<HashMap<u64, SubscriberEntry>>,
    next_id: AtomicU64,
    events_published: AtomicU64,
    events_dropped: AtomicU64,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        BroadcastHub::new(HubConfig::default())
    }
}

impl BroadcastHub {
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        BroadcastHub {
            config,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Register a subscriber and hand back its queue.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(self.config.queue_capacity);
        self.subscribers.lock().insert(
            id,
            SubscriberEntry {
                tx,
                rx: rx.clone(),
                dropped: 0,
                overflow_streak: 0,
                last_seen: Instant::now(),
            },
        );
        info!(subscriber = id, "subscriber connected");
        Subscription { id, rx }
    }

    /// Remove a subscriber. Returns false when unknown.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            info!(subscriber = id, "subscriber disconnected");
        }
        removed
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Serialize once, enqueue everywhere. Full queues evict their oldest
    /// event; a subscriber that keeps overflowing is disconnected.
    pub fn broadcast_event<T: serde::Serialize>(&self, event: &T) {
        match serde_json::to_string(event) {
            Ok(payload) => self.broadcast(&payload),
            Err(e) => warn!("failed to serialize event: {e}"),
        }
    }

    /// Enqueue an already-serialized payload to every subscriber.
    pub fn broadcast(&self, payload: &str) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        let mut evicted = Vec::new();
        {
            let mut subscribers = self.subscribers.lock();
            for (id, entry) in subscribers.iter_mut() {
                match entry.tx.try_send(payload.to_owned()) {
                    Ok(()) => entry.overflow_streak = 0,
                    Err(TrySendError::Full(payload)) => {
                        let _ = entry.rx.try_recv();
                        entry.dropped += 1;
                        entry.overflow_streak += 1;
                        self.events_dropped.fetch_add(1, Ordering::Relaxed);
                        let _ = entry.tx.try_send(payload);
                        if entry.overflow_streak >= self.config.overflow_disconnect {
                            evicted.push(*id);
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => evicted.push(*id),
                }
            }
            for id in &evicted {
                subscribers.remove(id);
            }
        }
        for id in evicted {
            warn!(subscriber = id, "subscriber dropped (sustained overflow or gone)");
        }
    }

    /// Handle an inbound text message from a subscriber. `"ping"` stamps
    /// the heartbeat and answers `"pong"`; anything else is ignored.
    pub fn handle_text(&self, id: u64, text: &str) -> Option<&'static str> {
        let mut subscribers = self.subscribers.lock();
        let entry = subscribers.get_mut(&id)?;
        entry.last_seen = Instant::now();
        if text == "ping" {
            debug!(subscriber = id, "heartbeat");
            Some("pong")
        } else {
            None
        }
    }

    /// Disconnect subscribers silent beyond the heartbeat timeout.
    /// Returns the pruned ids.
    pub fn prune_stale(&self) -> Vec<u64> {
        let timeout = self.config.heartbeat_timeout;
        let now = Instant::now();
        let mut subscribers = self.subscribers.lock();
        let stale: Vec<u64> = subscribers
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            subscribers.remove(id);
            warn!(subscriber = id, "pruned dead subscriber");
        }
        stale
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        let subscribers = self.subscribers.lock();
        let mut snapshots: Vec<SubscriberSnapshot> = subscribers
            .iter()
            .map(|(id, entry)| SubscriberSnapshot {
                id: *id,
                queued: entry.rx.len(),
                dropped: entry.dropped,
                overflow_streak: entry.overflow_streak,
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        HubStats {
            subscribers: snapshots,
            events_published: self.events_published.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}
