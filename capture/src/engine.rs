// SPDX-License-Identifier: Apache-2.0
// Copyright Sentinel Sensor Authors

//! Per-interface capture engine.
//!
//! One thread per interface: a non-blocking `AF_PACKET` socket registered
//! with a poller, frames parsed into [`net::Frame`]s and pushed to the
//! interface's [`FrameQueue`]. The socket sees every EtherType; the ARP
//! filter is the parse step itself, which rejects non-ARP frames cheaply.

use crate::queue::FrameQueue;
use crate::registry::IfaceStats;
use afpacket::sync::RawPacketStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use net::{Frame, FrameParseError, InterfaceId};
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RX_TOKEN: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_FRAME: usize = 2048;

/// Errors raised while bringing up or running a capture engine.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The interface exists but its packet socket could not be opened.
    /// Fatal for this interface only; others keep capturing.
    #[error("capture unavailable on '{interface}': {source}")]
    Unavailable {
        interface: String,
        #[source]
        source: io::Error,
    },
    /// No interface with this name exists on the host.
    #[error("unknown interface '{0}'")]
    UnknownInterface(String),
    /// The interface is already registered with the registry.
    #[error("interface '{0}' is already registered")]
    DuplicateInterface(String),
    /// The capture thread could not be spawned.
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Handle on a running capture thread.
pub struct CaptureHandle {
    name: String,
    join: JoinHandle<()>,
}

impl CaptureHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the capture thread to exit. Call after raising the
    /// shutdown flag.
    pub fn join(self) {
        if self.join.join().is_err() {
            error!(interface = %self.name, "capture thread panicked");
        }
    }
}

/// Open the packet socket and start the capture thread for one interface.
///
/// The socket is opened on the caller's thread so that a dead interface
/// fails fast with [`CaptureError::Unavailable`] instead of dying silently
/// in the background.
pub fn spawn(
    name: &str,
    ifindex: u32,
    stats: Arc<IfaceStats>,
    queue: FrameQueue,
    shutdown: Arc<AtomicBool>,
) -> Result<CaptureHandle, CaptureError> {
    let mut sock = RawPacketStream::new().map_err(|source| CaptureError::Unavailable {
        interface: name.to_owned(),
        source,
    })?;
    sock.set_non_blocking();
    sock.bind(name).map_err(|source| CaptureError::Unavailable {
        interface: name.to_owned(),
        source,
    })?;
    info!(interface = name, ifindex, "capture socket open");

    let iface = InterfaceId::new(ifindex);
    let thread_name = format!("capture-{name}");
    let owned_name = name.to_owned();
    let join = thread::Builder::new()
        .name(thread_name)
        .spawn(move || capture_loop(&owned_name, iface, sock, &stats, &queue, &shutdown))
        .map_err(CaptureError::Spawn)?;

    Ok(CaptureHandle {
        name: name.to_owned(),
        join,
    })
}

fn capture_loop(
    name: &str,
    iface: InterfaceId,
    mut sock: RawPacketStream,
    stats: &IfaceStats,
    queue: &FrameQueue,
    shutdown: &AtomicBool,
) {
    let raw_fd = sock.as_raw_fd();
    let mut poll = match Poll::new() {
        Ok(poll) => poll,
        Err(e) => {
            error!(interface = name, "failed to create poller: {e}");
            stats.set_active(false);
            return;
        }
    };
    if let Err(e) =
        poll.registry()
            .register(&mut SourceFd(&raw_fd), RX_TOKEN, Interest::READABLE)
    {
        error!(interface = name, "failed to register socket: {e}");
        stats.set_active(false);
        return;
    }

    let mut events = Events::with_capacity(64);
    let mut raw = [0u8; MAX_FRAME];
    debug!(interface = name, "capture loop running");

    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            warn!(interface = name, "poll error: {e}");
            continue;
        }
        for event in &events {
            if event.token() != RX_TOKEN || !event.is_readable() {
                continue;
            }
            drain_socket(name, iface, &mut sock, &mut raw, stats, queue);
        }
    }
    stats.set_active(false);
    info!(interface = name, "capture loop stopped");
}

fn drain_socket(
    name: &str,
    iface: InterfaceId,
    sock: &mut RawPacketStream,
    raw: &mut [u8],
    stats: &IfaceStats,
    queue: &FrameQueue,
) {
    loop {
        match sock.read(raw) {
            Ok(0) => break,
            Ok(bytes) => {
                stats.record_frame(bytes);
                match Frame::parse(iface, &raw[..bytes]) {
                    Ok(frame) => {
                        if !queue.push(frame) {
                            stats.record_drop();
                        }
                    }
                    // Non-ARP traffic is filtered, not faulty.
                    Err(FrameParseError::NotArp(_)) => {}
                    Err(e) => {
                        stats.record_parse_error();
                        debug!(interface = name, "unparseable frame: {e}");
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(interface = name, "read error: {e}");
                break;
            }
        }
    }
}
