// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP plumbing for WS-Discovery: single-adapter multicast socket, a
//! serialized send queue implementing the SOAP-over-UDP repeat schedule,
//! and a dedicated receive thread polled through mio.
//!
//! Exactly one network adapter is bound. Multi-homed hosts answering from
//! the wrong interface is the classic discovery failure this rule prevents;
//! when no adapter is pinned via config the first non-loopback IPv4 one is
//! taken, and zero candidates is a startup error.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{
    RuntimeConfig, RECV_POLL_TICK, UDP_MAX_DELAY, UDP_MIN_DELAY, UDP_UPPER_DELAY,
    WS_DISCOVERY_GROUP, WS_DISCOVERY_PORT,
};
use crate::{Error, Result};

/// Small xorshift generator for protocol jitter. Not cryptographic; seeded
/// from the clock and pid like the rest of the stack's identifiers.
pub(crate) struct Jitter {
    state: u64,
}

impl Jitter {
    pub fn new() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15);
        Self {
            state: nanos ^ (u64::from(std::process::id()) << 32) | 1,
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform-ish duration in `[0, max)`.
    pub fn up_to(&mut self, max: Duration) -> Duration {
        let millis = max.as_millis().max(1) as u64;
        Duration::from_millis(self.next() % millis)
    }

    /// Uniform-ish duration in `[min, max)`.
    pub fn between(&mut self, min: Duration, max: Duration) -> Duration {
        min + self.up_to(max.saturating_sub(min))
    }
}

/// Select the single adapter to bind: pinned via `discovery.adapter`, else
/// the first non-loopback IPv4 interface.
pub fn select_adapter(config: &RuntimeConfig) -> Result<Ipv4Addr> {
    if let Some(pinned) = config.discovery_adapter() {
        return Ok(pinned);
    }
    let interfaces = local_ip_address::list_afinet_netifas()
        .map_err(|e| Error::NoAdapter(e.to_string()))?;
    interfaces
        .into_iter()
        .find_map(|(name, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() => {
                log::debug!("[wsd] selected adapter {} ({})", v4, name);
                Some(v4)
            }
            _ => None,
        })
        .ok_or_else(|| Error::NoAdapter("no non-loopback IPv4 interface".to_string()))
}

/// Bind the discovery socket on one adapter and join the group there only.
pub fn bind_multicast(adapter: Ipv4Addr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::BindFailed(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| Error::BindFailed(e.to_string()))?;
    let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, WS_DISCOVERY_PORT).into();
    socket
        .bind(&bind_addr.into())
        .map_err(|e| Error::BindFailed(e.to_string()))?;
    socket
        .join_multicast_v4(&WS_DISCOVERY_GROUP, &adapter)
        .map_err(|e| {
            Error::MulticastJoinFailed(format!("{} on {}: {}", WS_DISCOVERY_GROUP, adapter, e))
        })?;
    socket
        .set_multicast_if_v4(&adapter)
        .map_err(|e| Error::MulticastJoinFailed(e.to_string()))?;
    socket.set_multicast_loop_v4(true)?;
    let _ = socket.set_multicast_ttl_v4(1);
    let socket: UdpSocket = socket.into();
    log::debug!(
        "[wsd] bound {}:{} on adapter {}",
        WS_DISCOVERY_GROUP,
        WS_DISCOVERY_PORT,
        adapter
    );
    Ok(socket)
}

struct Pending {
    payload: Arc<String>,
    dest: SocketAddr,
    sends_left: u32,
    next_at: Instant,
    gap: Duration,
    sent_once: bool,
}

/// Serialized outbound queue implementing the SOAP-over-UDP repeat pattern:
/// first transmission at `next_at`, then the gap doubles each repeat up to
/// `UDP_UPPER_DELAY`. Draining before shutdown is what gets `Bye` onto the
/// wire.
pub(crate) struct SendQueue {
    entries: Mutex<Vec<Pending>>,
    wake: Condvar,
    accepting: AtomicBool,
    jitter: Mutex<Jitter>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            wake: Condvar::new(),
            accepting: AtomicBool::new(true),
            jitter: Mutex::new(Jitter::new()),
        }
    }

    /// Queue a payload for `repeats` transmissions, the first after
    /// `initial_delay`.
    pub fn enqueue(
        &self,
        payload: Arc<String>,
        dest: SocketAddr,
        repeats: u32,
        initial_delay: Duration,
    ) {
        if !self.accepting.load(Ordering::Relaxed) {
            log::debug!("[wsd] send queue closed, dropping message to {}", dest);
            return;
        }
        let gap = self
            .jitter
            .lock()
            .between(UDP_MIN_DELAY, UDP_MAX_DELAY);
        self.entries.lock().push(Pending {
            payload,
            dest,
            sends_left: repeats.max(1),
            next_at: Instant::now() + initial_delay,
            gap,
            sent_once: false,
        });
        self.wake.notify_one();
    }

    /// Pop every transmission due at `now`, rescheduling repeats.
    pub fn collect_due(&self, now: Instant) -> Vec<(Arc<String>, SocketAddr)> {
        let mut due = Vec::new();
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if entry.next_at <= now && entry.sends_left > 0 {
                due.push((Arc::clone(&entry.payload), entry.dest));
                entry.sends_left -= 1;
                entry.sent_once = true;
                entry.next_at = now + entry.gap;
                entry.gap = (entry.gap * 2).min(UDP_UPPER_DELAY);
            }
        }
        entries.retain(|entry| entry.sends_left > 0);
        due
    }

    /// Stop accepting and wait until every queued message went out at least
    /// once, or the deadline passes. Remaining repeats are discarded.
    pub fn drain(&self, deadline: Duration) {
        self.accepting.store(false, Ordering::Relaxed);
        let drain_until = Instant::now() + deadline;
        loop {
            let all_sent = self.entries.lock().iter().all(|entry| entry.sent_once);
            if all_sent || Instant::now() >= drain_until {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        self.entries.lock().clear();
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.entries.lock().iter().map(|entry| entry.next_at).min()
    }
}

/// A datagram to transmit in response to a received one.
#[derive(Debug)]
pub struct Reply {
    pub payload: String,
    /// `None` sends to the multicast group.
    pub dest: Option<SocketAddr>,
    pub repeats: u32,
    /// Initial delay before the first transmission (reply jitter).
    pub delay: Duration,
}

/// Callback invoked with every received datagram; returned replies go onto
/// the send queue.
pub type DatagramSink = Box<dyn Fn(&str, SocketAddr) -> Vec<Reply> + Send + Sync>;

/// One bound socket, one receive thread, one send thread. The workers own
/// the socket handles; it closes when both exit.
pub struct UdpChannel {
    queue: Arc<SendQueue>,
    shutdown: Arc<AtomicBool>,
    send_worker: Mutex<Option<JoinHandle<()>>>,
    recv_worker: Mutex<Option<JoinHandle<()>>>,
    pub adapter: Ipv4Addr,
}

impl UdpChannel {
    /// Bind and spawn the workers. `sink` runs on the receive thread; it
    /// must not block.
    pub fn start(adapter: Ipv4Addr, sink: DatagramSink) -> Result<Self> {
        let socket = Arc::new(bind_multicast(adapter)?);
        let queue = Arc::new(SendQueue::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let send_socket = Arc::clone(&socket);
        let send_queue = Arc::clone(&queue);
        let send_shutdown = Arc::clone(&shutdown);
        let send_worker = thread::spawn(move || {
            send_loop(&send_socket, &send_queue, &send_shutdown);
        });

        let recv_socket = socket
            .try_clone()
            .map_err(|e| Error::BindFailed(e.to_string()))?;
        let recv_queue = Arc::clone(&queue);
        let recv_shutdown = Arc::clone(&shutdown);
        let recv_worker = thread::spawn(move || {
            if let Err(error) = recv_loop(recv_socket, &sink, &recv_queue, &recv_shutdown) {
                log::debug!("[wsd] receive loop ended: {}", error);
            }
        });

        Ok(Self {
            queue,
            shutdown,
            send_worker: Mutex::new(Some(send_worker)),
            recv_worker: Mutex::new(Some(recv_worker)),
            adapter,
        })
    }

    pub fn group_addr() -> SocketAddr {
        (WS_DISCOVERY_GROUP, WS_DISCOVERY_PORT).into()
    }

    /// Queue a multicast send with the standard repeat count.
    pub fn send_multicast(&self, payload: String, repeats: u32, initial_delay: Duration) {
        self.queue
            .enqueue(Arc::new(payload), Self::group_addr(), repeats, initial_delay);
    }

    /// Queue a unicast send (match responses, directed probes).
    pub fn send_unicast(
        &self,
        payload: String,
        dest: SocketAddr,
        repeats: u32,
        initial_delay: Duration,
    ) {
        self.queue
            .enqueue(Arc::new(payload), dest, repeats, initial_delay);
    }

    /// Drain outstanding first transmissions, then stop both workers and
    /// close the socket.
    pub fn shutdown(&self, deadline: Duration) {
        self.queue.drain(deadline);
        self.shutdown.store(true, Ordering::Relaxed);
        self.queue.wake.notify_one();
        if let Some(handle) = self.send_worker.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.recv_worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UdpChannel {
    fn drop(&mut self) {
        self.shutdown(Duration::from_millis(0));
    }
}

fn send_loop(socket: &UdpSocket, queue: &SendQueue, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        for (payload, dest) in queue.collect_due(Instant::now()) {
            match socket.send_to(payload.as_bytes(), dest) {
                Ok(sent) => {
                    log::debug!("[wsd] sent {} bytes -> {}", sent, dest);
                }
                Err(error) => {
                    log::debug!("[wsd] send to {} failed: {}", dest, error);
                }
            }
        }
        // Sleep until the next scheduled transmission, bounded for prompt
        // shutdown.
        let wait = queue
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(RECV_POLL_TICK)
            .min(RECV_POLL_TICK);
        let mut entries = queue.entries.lock();
        queue.wake.wait_for(&mut entries, wait.max(Duration::from_millis(1)));
    }
}

fn recv_loop(
    socket: UdpSocket,
    sink: &DatagramSink,
    queue: &SendQueue,
    shutdown: &AtomicBool,
) -> Result<()> {
    socket.set_nonblocking(true)?;
    let mut mio_socket = mio::net::UdpSocket::from_std(socket);
    let mut poll = mio::Poll::new()?;
    let mut events = mio::Events::with_capacity(16);
    const RECV: mio::Token = mio::Token(0);
    poll.registry()
        .register(&mut mio_socket, RECV, mio::Interest::READABLE)?;

    let mut buf = [0u8; 65_536];
    while !shutdown.load(Ordering::Relaxed) {
        poll.poll(&mut events, Some(RECV_POLL_TICK))?;
        for event in events.iter() {
            if event.token() != RECV {
                continue;
            }
            loop {
                match mio_socket.recv_from(&mut buf) {
                    Ok((len, from)) => match std::str::from_utf8(&buf[..len]) {
                        Ok(text) => {
                            for reply in sink(text, from) {
                                let dest = reply.dest.unwrap_or_else(UdpChannel::group_addr);
                                queue.enqueue(
                                    Arc::new(reply.payload),
                                    dest,
                                    reply.repeats,
                                    reply.delay,
                                );
                            }
                        }
                        Err(_) => {
                            log::debug!("[wsd] non-UTF8 datagram from {}, dropped", from);
                        }
                    },
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::debug!("[wsd] recv error: {}", e);
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}
