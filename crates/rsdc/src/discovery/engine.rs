// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WS-Discovery engine: the protocol state machine and the bound node.
//!
//! [`DiscoveryCore`] is pure protocol logic (duplicate suppression, proxy
//! database, probe/resolve answering, match collection); [`WsDiscovery`]
//! binds it to the UDP channel and the background threads. The split keeps
//! the timing-heavy wire behavior testable without sockets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::config::{
    RuntimeConfig, APP_MAX_DELAY, MESSAGE_ID_CACHE_CAPACITY, SHUTDOWN_STAGE_DEADLINE,
    UDP_MULTICAST_REPEAT, UDP_UNICAST_REPEAT,
};
use crate::discovery::messages::{
    self, Announcement, AppSequence, DiscoveryMessage, Probe, QNameOwned,
};
use crate::discovery::proxy::{ProxyDatabase, ProxyUpdate, RemoteDevice};
use crate::discovery::scopes::ScopeMatcher;
use crate::discovery::udp::{select_adapter, Jitter, UdpChannel};
use crate::Result;

/// What happened to a remote entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Hello,
    Bye,
    ProbeMatch,
    ResolveMatch,
}

/// Observer over remote-device lifecycle events.
pub type DiscoveryObserver = Box<dyn Fn(&RemoteDevice, DiscoveryEvent) + Send + Sync>;

/// A datagram the core wants transmitted.
#[derive(Debug)]
pub enum Outgoing {
    Multicast {
        payload: String,
    },
    Unicast {
        payload: String,
        dest: SocketAddr,
        /// Random reply delay, bounded by `APP_MAX_DELAY` for match replies.
        delay: Duration,
    },
}

/// Protocol state machine, free of any I/O.
pub struct DiscoveryCore {
    proxies: ProxyDatabase,
    local: RwLock<Option<Announcement>>,
    /// Duplicate suppression over `wsa:MessageID` (SOAP-over-UDP repeats).
    seen: Mutex<LruCache<String, ()>>,
    observers: RwLock<Vec<DiscoveryObserver>>,
    /// Collectors for outstanding probe/resolve message ids.
    pending: Mutex<HashMap<String, Sender<Announcement>>>,
    app_instance: u64,
    app_counter: AtomicU64,
    jitter: Mutex<Jitter>,
}

impl DiscoveryCore {
    pub fn new() -> Self {
        let app_instance = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(1);
        Self {
            proxies: ProxyDatabase::new(),
            local: RwLock::new(None),
            seen: Mutex::new(LruCache::new(
                NonZeroUsize::new(MESSAGE_ID_CACHE_CAPACITY).expect("nonzero capacity"),
            )),
            observers: RwLock::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            app_instance,
            app_counter: AtomicU64::new(0),
            jitter: Mutex::new(Jitter::new()),
        }
    }

    pub fn proxies(&self) -> &ProxyDatabase {
        &self.proxies
    }

    pub fn register_observer(&self, observer: DiscoveryObserver) {
        self.observers.write().push(observer);
    }

    /// Install or replace the locally announced service.
    pub fn set_local(&self, announcement: Announcement) {
        *self.local.write() = Some(announcement);
    }

    pub fn local(&self) -> Option<Announcement> {
        self.local.read().clone()
    }

    /// Bump the local `MetadataVersion` (device metadata changed). Returns
    /// the new announcement for re-Hello.
    pub fn bump_metadata_version(&self) -> Option<Announcement> {
        let mut local = self.local.write();
        let announcement = local.as_mut()?;
        announcement.metadata_version += 1;
        Some(announcement.clone())
    }

    pub fn next_sequence(&self) -> AppSequence {
        AppSequence {
            instance_id: self.app_instance,
            message_number: self.app_counter.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    /// Register a collector for match responses relating to `message_id`.
    pub fn begin_collect(&self, message_id: &str) -> Receiver<Announcement> {
        let (tx, rx) = unbounded();
        self.pending.lock().insert(message_id.to_string(), tx);
        rx
    }

    pub fn end_collect(&self, message_id: &str) {
        self.pending.lock().remove(message_id);
    }

    /// Feed one received datagram through the state machine; returns the
    /// datagrams to transmit in response.
    pub fn handle_datagram(&self, input: &str, from: SocketAddr) -> Vec<Outgoing> {
        let (headers, message) = match messages::decode_datagram(input) {
            Ok(decoded) => decoded,
            Err(error) => {
                log::debug!("[wsd] undecodable datagram from {}: {}", from, error);
                return Vec::new();
            }
        };

        // SOAP-over-UDP retransmissions: same MessageID, drop repeats.
        if let Some(message_id) = &headers.message_id {
            if self.seen.lock().put(message_id.clone(), ()).is_some() {
                return Vec::new();
            }
        }

        match message {
            DiscoveryMessage::Hello(announcement) => {
                self.ingest(announcement, DiscoveryEvent::Hello);
                Vec::new()
            }
            DiscoveryMessage::Bye { endpoint } => {
                if let Some(removed) = self.proxies.remove(&endpoint) {
                    self.notify(&removed, DiscoveryEvent::Bye);
                }
                Vec::new()
            }
            DiscoveryMessage::Probe(probe) => {
                self.answer_probe(&probe, headers.message_id.as_deref(), from)
            }
            DiscoveryMessage::Resolve { endpoint } => {
                self.answer_resolve(&endpoint, headers.message_id.as_deref(), from)
            }
            DiscoveryMessage::ProbeMatches(matches) => {
                let collector = headers
                    .relates_to
                    .as_ref()
                    .and_then(|id| self.pending.lock().get(id).cloned());
                for announcement in matches {
                    self.ingest(announcement.clone(), DiscoveryEvent::ProbeMatch);
                    if let Some(collector) = &collector {
                        let _ = collector.send(announcement);
                    }
                }
                Vec::new()
            }
            DiscoveryMessage::ResolveMatches(matched) => {
                if let Some(announcement) = matched {
                    self.ingest(announcement.clone(), DiscoveryEvent::ResolveMatch);
                    if let Some(collector) = headers
                        .relates_to
                        .as_ref()
                        .and_then(|id| self.pending.lock().get(id).cloned())
                    {
                        let _ = collector.send(announcement);
                    }
                }
                Vec::new()
            }
        }
    }

    fn ingest(&self, announcement: Announcement, event: DiscoveryEvent) {
        let device = RemoteDevice {
            endpoint: announcement.endpoint,
            types: announcement.types,
            scopes: announcement.scopes,
            xaddrs: announcement.xaddrs,
            metadata_version: announcement.metadata_version,
            last_seen: Instant::now(),
        };
        let update = self.proxies.observe(device.clone());
        if update != ProxyUpdate::Unchanged {
            self.notify(&device, event);
        }
    }

    fn notify(&self, device: &RemoteDevice, event: DiscoveryEvent) {
        for observer in self.observers.read().iter() {
            observer(device, event);
        }
    }

    /// Answer a Probe when the local service matches its types and scopes.
    /// The reply is delayed by a random amount below `APP_MAX_DELAY`.
    fn answer_probe(
        &self,
        probe: &Probe,
        probe_message_id: Option<&str>,
        from: SocketAddr,
    ) -> Vec<Outgoing> {
        let Some(local) = self.local.read().clone() else {
            return Vec::new();
        };
        let Some(relates_to) = probe_message_id else {
            return Vec::new();
        };
        let Some(matcher) = ScopeMatcher::from_match_by(probe.match_by.as_deref()) else {
            log::debug!("[wsd] unsupported MatchBy from {}, not answering", from);
            return Vec::new();
        };
        if !types_match(&local.types, &probe.types) {
            return Vec::new();
        }
        if !matcher.matches_all(&local.scopes, &probe.scopes) {
            return Vec::new();
        }

        let payload = messages::encode_probe_matches(
            std::slice::from_ref(&local),
            relates_to,
            self.next_sequence(),
        );
        vec![Outgoing::Unicast {
            payload,
            dest: from,
            delay: self.jitter.lock().up_to(APP_MAX_DELAY),
        }]
    }

    fn answer_resolve(
        &self,
        endpoint: &str,
        resolve_message_id: Option<&str>,
        from: SocketAddr,
    ) -> Vec<Outgoing> {
        let Some(local) = self.local.read().clone() else {
            return Vec::new();
        };
        let Some(relates_to) = resolve_message_id else {
            return Vec::new();
        };
        if local.endpoint != endpoint {
            return Vec::new();
        }
        let payload =
            messages::encode_resolve_matches(&local, relates_to, self.next_sequence());
        vec![Outgoing::Unicast {
            payload,
            dest: from,
            delay: self.jitter.lock().up_to(APP_MAX_DELAY),
        }]
    }
}

fn types_match(supplied: &[QNameOwned], requested: &[QNameOwned]) -> bool {
    requested.iter().all(|r| supplied.contains(r))
}

impl Default for DiscoveryCore {
    fn default() -> Self {
        Self::new()
    }
}

/// The bound WS-Discovery node.
pub struct WsDiscovery {
    core: Arc<DiscoveryCore>,
    channel: UdpChannel,
    config: RuntimeConfig,
}

impl WsDiscovery {
    /// Bind the multicast node on the configured (or auto-selected) adapter
    /// and start its receive/send threads.
    pub fn start(config: RuntimeConfig) -> Result<Arc<Self>> {
        let adapter = select_adapter(&config)?;
        let core = Arc::new(DiscoveryCore::new());
        let sink_core = Arc::clone(&core);
        let channel = UdpChannel::start(
            adapter,
            Box::new(move |datagram, from| {
                sink_core
                    .handle_datagram(datagram, from)
                    .into_iter()
                    .map(Outgoing::into_reply)
                    .collect()
            }),
        )?;
        Ok(Arc::new(Self {
            core,
            channel,
            config,
        }))
    }

    pub fn core(&self) -> &Arc<DiscoveryCore> {
        &self.core
    }

    pub fn proxies(&self) -> &ProxyDatabase {
        self.core.proxies()
    }

    pub fn register_observer(&self, observer: DiscoveryObserver) {
        self.core.register_observer(observer);
    }

    /// Announce the local service: store it and multicast Hello.
    pub fn announce(&self, announcement: Announcement) {
        self.core.set_local(announcement.clone());
        let hello = messages::encode_hello(&announcement, self.core.next_sequence());
        self.channel
            .send_multicast(hello, UDP_MULTICAST_REPEAT, Duration::ZERO);
    }

    /// Multicast a Probe and collect matches for the match window.
    pub fn probe(&self, types: &[QNameOwned], scopes: &[String]) -> Vec<Announcement> {
        let probe = Probe {
            types: types.to_vec(),
            scopes: scopes.to_vec(),
            match_by: None,
        };
        let (envelope, message_id) = messages::encode_probe(&probe);
        let collector = self.core.begin_collect(&message_id);
        self.channel
            .send_multicast(envelope, UDP_MULTICAST_REPEAT, Duration::ZERO);

        let deadline = Instant::now() + self.config.timing().match_timeout;
        let mut matches = Vec::new();
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match collector.recv_timeout(remaining) {
                Ok(announcement) => {
                    if !matches
                        .iter()
                        .any(|m: &Announcement| m.endpoint == announcement.endpoint)
                    {
                        matches.push(announcement);
                    }
                }
                Err(_) => break,
            }
        }
        self.core.end_collect(&message_id);
        matches
    }

    /// Multicast a Resolve for one endpoint and wait for the first match.
    pub fn resolve(&self, endpoint: &str) -> Option<Announcement> {
        let (envelope, message_id) = messages::encode_resolve(endpoint);
        let collector = self.core.begin_collect(&message_id);
        self.channel
            .send_multicast(envelope, UDP_MULTICAST_REPEAT, Duration::ZERO);
        let result = collector
            .recv_timeout(self.config.timing().match_timeout)
            .ok();
        self.core.end_collect(&message_id);
        result
    }

    /// Graceful shutdown: Bye, drain the send queue, close sockets.
    pub fn shutdown(&self) {
        if let Some(local) = self.core.local() {
            let bye = messages::encode_bye(&local.endpoint, self.core.next_sequence());
            self.channel
                .send_multicast(bye, UDP_MULTICAST_REPEAT, Duration::ZERO);
        }
        self.channel.shutdown(SHUTDOWN_STAGE_DEADLINE);
    }
}

impl Outgoing {
    fn into_reply(self) -> crate::discovery::udp::Reply {
        match self {
            Outgoing::Multicast { payload } => crate::discovery::udp::Reply {
                payload,
                dest: None,
                repeats: UDP_MULTICAST_REPEAT,
                delay: Duration::ZERO,
            },
            Outgoing::Unicast {
                payload,
                dest,
                delay,
            } => crate::discovery::udp::Reply {
                payload,
                dest: Some(dest),
                repeats: UDP_UNICAST_REPEAT,
                delay,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::actions;

    fn local_announcement() -> Announcement {
        Announcement {
            endpoint: "urn:uuid:11111111-2222-4333-8444-555555555555".to_string(),
            types: vec![QNameOwned::dpws_device(), QNameOwned::medical_device()],
            scopes: vec!["sdc.ctxt.loc:/sdc/bldng/H1/flr/1".to_string()],
            xaddrs: vec!["http://10.0.0.5:6464/device".to_string()],
            metadata_version: 1,
        }
    }

    fn from_addr() -> SocketAddr {
        "10.0.0.9:3702".parse().unwrap()
    }

    #[test]
    fn test_hello_updates_proxies_and_observers() {
        let core = DiscoveryCore::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        core.register_observer(Box::new(move |device, event| {
            events_clone
                .lock()
                .push((device.endpoint.clone(), event));
        }));

        let hello = messages::encode_hello(&local_announcement(), AppSequence {
            instance_id: 1,
            message_number: 1,
        });
        assert!(core.handle_datagram(&hello, from_addr()).is_empty());
        assert_eq!(core.proxies().len(), 1);
        assert_eq!(
            events.lock().as_slice(),
            &[(local_announcement().endpoint, DiscoveryEvent::Hello)]
        );

        // The SOAP-over-UDP repeat of the same datagram is suppressed.
        core.handle_datagram(&hello, from_addr());
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_bye_removes_and_notifies() {
        let core = DiscoveryCore::new();
        let hello = messages::encode_hello(&local_announcement(), AppSequence {
            instance_id: 1,
            message_number: 1,
        });
        core.handle_datagram(&hello, from_addr());

        let bye = messages::encode_bye(&local_announcement().endpoint, AppSequence {
            instance_id: 1,
            message_number: 2,
        });
        core.handle_datagram(&bye, from_addr());
        assert!(core.proxies().is_empty());
    }

    #[test]
    fn test_probe_match_collection() {
        let core = DiscoveryCore::new();
        let (probe_envelope, message_id) = messages::encode_probe(&Probe {
            types: vec![QNameOwned::dpws_device()],
            scopes: Vec::new(),
            match_by: None,
        });
        let _ = probe_envelope;
        let collector = core.begin_collect(&message_id);

        let matches = messages::encode_probe_matches(
            &[local_announcement()],
            &message_id,
            AppSequence {
                instance_id: 7,
                message_number: 1,
            },
        );
        core.handle_datagram(&matches, from_addr());
        let received = collector.try_recv().unwrap();
        assert_eq!(received.endpoint, local_announcement().endpoint);
        core.end_collect(&message_id);
    }

    #[test]
    fn test_metadata_version_bump() {
        let core = DiscoveryCore::new();
        core.set_local(local_announcement());
        let bumped = core.bump_metadata_version().unwrap();
        assert_eq!(bumped.metadata_version, 2);
        assert_eq!(core.local().unwrap().metadata_version, 2);
    }

    #[test]
    fn test_app_sequence_monotonic() {
        let core = DiscoveryCore::new();
        let first = core.next_sequence();
        let second = core.next_sequence();
        assert_eq!(first.instance_id, second.instance_id);
        assert!(second.message_number > first.message_number);
    }

    #[test]
    fn test_probe_answered_when_matching() {
        let core = DiscoveryCore::new();
        core.set_local(local_announcement());

        let (probe, message_id) = messages::encode_probe(&Probe {
            types: vec![QNameOwned::dpws_device(), QNameOwned::medical_device()],
            scopes: vec!["sdc.ctxt.loc:/sdc/bldng/H1".to_string()],
            match_by: None,
        });
        let replies = core.handle_datagram(&probe, from_addr());
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            Outgoing::Unicast {
                payload,
                dest,
                delay,
            } => {
                assert_eq!(*dest, from_addr());
                assert!(*delay < APP_MAX_DELAY);
                assert!(payload.contains(actions::PROBE_MATCHES));
                assert!(payload.contains(&message_id));
            }
            other => panic!("expected unicast reply, got {:?}", other),
        }
    }

    #[test]
    fn test_probe_unmatched_scope_not_answered() {
        let core = DiscoveryCore::new();
        core.set_local(local_announcement());

        let (probe, _) = messages::encode_probe(&Probe {
            types: vec![QNameOwned::dpws_device()],
            scopes: vec!["sdc.ctxt.loc:/sdc/bldng/OTHER".to_string()],
            match_by: None,
        });
        assert!(core.handle_datagram(&probe, from_addr()).is_empty());

        // Unsupported MatchBy rules are answered with silence.
        let (probe, _) = messages::encode_probe(&Probe {
            types: Vec::new(),
            scopes: vec!["sdc.ctxt.loc:/sdc/bldng/H1".to_string()],
            match_by: Some("urn:custom-rule".to_string()),
        });
        assert!(core.handle_datagram(&probe, from_addr()).is_empty());
    }

    #[test]
    fn test_resolve_answered_for_own_endpoint_only() {
        let core = DiscoveryCore::new();
        core.set_local(local_announcement());

        let (resolve, message_id) = messages::encode_resolve(&local_announcement().endpoint);
        let replies = core.handle_datagram(&resolve, from_addr());
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            Outgoing::Unicast { payload, .. } => {
                assert!(payload.contains(actions::RESOLVE_MATCHES));
                assert!(payload.contains(&message_id));
            }
            other => panic!("expected unicast reply, got {:?}", other),
        }

        let (resolve, _) = messages::encode_resolve("urn:uuid:someone-else");
        assert!(core.handle_datagram(&resolve, from_addr()).is_empty());
    }

    #[test]
    fn test_probe_action_constant() {
        // The probe envelope carries the 2005/04 action and discovery URN.
        let (envelope, _) = messages::encode_probe(&Probe::default());
        assert!(envelope.contains(actions::PROBE));
        assert!(envelope.contains(actions::DISCOVERY_URN));
    }
}
