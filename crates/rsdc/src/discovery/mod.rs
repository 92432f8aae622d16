// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # WS-Discovery engine
//!
//! SOAP-over-UDP multicast discovery (WS-Discovery 2005/04): Hello/Bye
//! announcements, Probe/Resolve answering with the mandated reply jitter
//! and repeat schedule, scope matching, and the known-remote database.
//!
//! The node binds exactly one network adapter. Send and receive are
//! separated: a dedicated receive thread classifies inbound datagrams, a
//! serialized send queue spaces out transmissions and is drained before
//! shutdown so `Bye` actually leaves the host.

pub mod engine;
pub mod messages;
pub mod proxy;
pub mod scopes;
pub mod udp;

pub use engine::{DiscoveryCore, DiscoveryEvent, DiscoveryObserver, WsDiscovery};
pub use messages::{Announcement, AppSequence, DiscoveryMessage, Probe, QNameOwned};
pub use proxy::{ProxyDatabase, ProxyUpdate, RemoteDevice};
pub use scopes::{ScopeMatcher, MATCH_BY_LDAP, MATCH_BY_RFC3986, MATCH_BY_STRCMP0};
