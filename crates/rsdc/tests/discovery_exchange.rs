// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Probe/resolve exchange between two discovery cores, socket-free.
//!
//! The datagrams are the real wire payloads; only the UDP hop is replaced
//! by handing each output straight to the other core.

use std::net::SocketAddr;

use rsdc::discovery::engine::Outgoing;
use rsdc::discovery::messages::{
    decode_datagram, encode_probe, encode_resolve, Announcement, Probe, QNameOwned,
};
use rsdc::discovery::{DiscoveryCore, DiscoveryEvent, MATCH_BY_STRCMP0};

fn provider_core() -> DiscoveryCore {
    let core = DiscoveryCore::new();
    core.set_local(Announcement {
        endpoint: "urn:uuid:0a1b2c3d-4e5f-4012-8345-67890abcdef0".to_string(),
        types: vec![QNameOwned::dpws_device(), QNameOwned::medical_device()],
        scopes: vec![
            "sdc.mds.pkp:1.2.840.10004.20701.1.1".to_string(),
            "sdc.ctxt.loc:/sdc/bldng/H1/flr/1".to_string(),
        ],
        xaddrs: vec!["http://10.0.0.5:6464/device".to_string()],
        metadata_version: 1,
    });
    core
}

fn provider_addr() -> SocketAddr {
    "10.0.0.5:3702".parse().unwrap()
}

fn consumer_addr() -> SocketAddr {
    "10.0.0.9:3702".parse().unwrap()
}

/// Deliver every unicast reply of `replies` into `target`, returning its
/// own replies (none expected for matches).
fn deliver(replies: Vec<Outgoing>, target: &DiscoveryCore, from: SocketAddr) -> Vec<Outgoing> {
    let mut out = Vec::new();
    for reply in replies {
        match reply {
            Outgoing::Unicast { payload, .. } | Outgoing::Multicast { payload } => {
                out.extend(target.handle_datagram(&payload, from));
            }
        }
    }
    out
}

#[test]
fn test_probe_resolve_exchange() {
    let provider = provider_core();
    let consumer = DiscoveryCore::new();

    // S1: probe for medical devices in building H1.
    let (probe, probe_id) = encode_probe(&Probe {
        types: vec![QNameOwned::dpws_device(), QNameOwned::medical_device()],
        scopes: vec!["sdc.ctxt.loc:/sdc/bldng/H1".to_string()],
        match_by: None,
    });
    let collector = consumer.begin_collect(&probe_id);
    let replies = provider.handle_datagram(&probe, consumer_addr());
    assert_eq!(replies.len(), 1);
    deliver(replies, &consumer, provider_addr());

    let matched = collector.try_recv().expect("a probe match");
    assert_eq!(matched.endpoint, provider.local().unwrap().endpoint);
    assert_eq!(matched.xaddrs, vec!["http://10.0.0.5:6464/device".to_string()]);
    consumer.end_collect(&probe_id);

    // The match also landed in the consumer's proxy database.
    assert_eq!(consumer.proxies().len(), 1);

    // Resolve the endpoint: the ResolveMatch carries the same UUID.
    let (resolve, resolve_id) = encode_resolve(&matched.endpoint);
    let collector = consumer.begin_collect(&resolve_id);
    let replies = provider.handle_datagram(&resolve, consumer_addr());
    deliver(replies, &consumer, provider_addr());
    let resolved = collector.try_recv().expect("a resolve match");
    assert_eq!(resolved.endpoint, matched.endpoint);
    consumer.end_collect(&resolve_id);
}

#[test]
fn test_unmatched_probe_gets_no_answer() {
    let provider = provider_core();

    // Wrong scope.
    let (probe, _) = encode_probe(&Probe {
        types: vec![QNameOwned::dpws_device()],
        scopes: vec!["sdc.ctxt.loc:/sdc/bldng/OTHER".to_string()],
        match_by: None,
    });
    assert!(provider.handle_datagram(&probe, consumer_addr()).is_empty());

    // Wrong type.
    let (probe, _) = encode_probe(&Probe {
        types: vec![QNameOwned::new("urn:example", "Printer")],
        scopes: Vec::new(),
        match_by: None,
    });
    assert!(provider.handle_datagram(&probe, consumer_addr()).is_empty());

    // Exact-compare rule with a prefix-only scope.
    let (probe, _) = encode_probe(&Probe {
        types: Vec::new(),
        scopes: vec!["sdc.ctxt.loc:/sdc/bldng/H1".to_string()],
        match_by: Some(MATCH_BY_STRCMP0.to_string()),
    });
    assert!(provider.handle_datagram(&probe, consumer_addr()).is_empty());
}

#[test]
fn test_hello_bye_lifecycle_with_observer() {
    use parking_lot::Mutex;
    use std::sync::Arc;

    let provider = provider_core();
    let consumer = DiscoveryCore::new();
    let events: Arc<Mutex<Vec<(String, DiscoveryEvent)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    consumer.register_observer(Box::new(move |device, event| {
        sink.lock().push((device.endpoint.clone(), event));
    }));

    let local = provider.local().unwrap();
    let hello = rsdc::discovery::messages::encode_hello(&local, provider.next_sequence());
    consumer.handle_datagram(&hello, provider_addr());

    // Re-announce with a bumped metadata version updates the entry.
    let bumped = provider.bump_metadata_version().unwrap();
    let hello2 = rsdc::discovery::messages::encode_hello(&bumped, provider.next_sequence());
    consumer.handle_datagram(&hello2, provider_addr());
    assert_eq!(
        consumer.proxies().get(&local.endpoint).unwrap().metadata_version,
        2
    );

    let bye = rsdc::discovery::messages::encode_bye(&local.endpoint, provider.next_sequence());
    consumer.handle_datagram(&bye, provider_addr());
    assert!(consumer.proxies().is_empty());

    let events = events.lock();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].1, DiscoveryEvent::Hello);
    assert_eq!(events[1].1, DiscoveryEvent::Hello);
    assert_eq!(events[2].1, DiscoveryEvent::Bye);

    // Wire sanity: both datagrams decode as their own message types.
    assert!(decode_datagram(&hello).is_ok());
    assert!(decode_datagram(&bye).is_ok());
}
