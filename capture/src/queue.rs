// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Bounded per-interface frame queue with drop-oldest overflow.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use net::Frame;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A bounded MPMC frame queue. When full, pushing evicts the oldest
/// queued frame (the channel is MPMC, so the producer holds a receiver
/// clone purely for eviction) and counts the drop.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

impl FrameQueue {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        FrameQueue {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// Enqueue a frame, evicting the oldest entry when full.
    ///
    /// Returns true iff the frame was admitted without evicting.
    pub fn push(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                let _ = self.rx.try_recv();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let _ = self.tx.try_send(frame);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// A receiver handle for the consuming side.
    #[must_use]
    pub fn receiver(&self) -> Receiver<Frame> {
        self.rx.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use net::{ArpOpcode, ArpPacket, InterfaceId, Mac};
    use std::net::Ipv4Addr;

    fn frame(seq: u8) -> Frame {
        let mac = Mac([2, 0, 0, 0, 0, seq]);
        Frame::new(
            InterfaceId::new(1),
            mac,
            Mac::BROADCAST,
            ArpPacket {
                opcode: ArpOpcode::Reply,
                sender_mac: mac,
                sender_ip: Ipv4Addr::new(10, 0, 0, seq),
                target_mac: Mac::ZERO,
                target_ip: Ipv4Addr::new(10, 0, 0, 1),
            },
        )
    }

    #[test]
    fn overflow_evicts_oldest() {
        let queue = FrameQueue::with_capacity(3);
        for seq in 1..=5 {
            queue.push(frame(seq));
        }
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.len(), 3);
        // the two oldest were evicted; 3, 4, 5 remain in arrival order
        let rx = queue.receiver();
        let kept: Vec<u8> = (0..3)
            .map(|_| rx.try_recv().unwrap().arp.sender_ip.octets()[3])
            .collect();
        assert_eq!(kept, vec![3, 4, 5]);
    }

    #[test]
    fn bounded_under_sustained_overflow() {
        let queue = FrameQueue::with_capacity(8);
        for _ in 0..1000 {
            queue.push(frame(1));
            assert!(queue.len() <= queue.capacity());
        }
        assert_eq!(queue.dropped(), 1000 - 8);
    }
}
