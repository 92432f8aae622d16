// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Known-remote database: one entry per discovered endpoint reference.

use std::time::Instant;

use dashmap::DashMap;

use crate::discovery::messages::QNameOwned;

/// State kept per known remote device.
#[derive(Debug, Clone)]
pub struct RemoteDevice {
    /// Stable endpoint reference address (`urn:uuid:...`).
    pub endpoint: String,
    pub types: Vec<QNameOwned>,
    pub scopes: Vec<String>,
    /// Transport addresses, if announced or resolved.
    pub xaddrs: Vec<String>,
    /// Monotonic per endpoint; peers must keep the highest seen.
    pub metadata_version: u64,
    pub last_seen: Instant,
}

/// Outcome of feeding an announcement into the database.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProxyUpdate {
    /// First sighting of this endpoint.
    Added,
    /// Metadata version advanced (or transport addresses appeared).
    Updated,
    /// Stale or identical announcement; `last_seen` refreshed only.
    Unchanged,
}

/// Concurrent map of known remotes, keyed by endpoint reference address.
#[derive(Default)]
pub struct ProxyDatabase {
    devices: DashMap<String, RemoteDevice>,
}

impl ProxyDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an announcement (Hello, ProbeMatch or ResolveMatch payload).
    /// Older metadata versions never overwrite newer state.
    pub fn observe(&self, device: RemoteDevice) -> ProxyUpdate {
        let mut update = ProxyUpdate::Added;
        let endpoint = device.endpoint.clone();
        self.devices
            .entry(endpoint)
            .and_modify(|existing| {
                if device.metadata_version > existing.metadata_version {
                    *existing = device.clone();
                    update = ProxyUpdate::Updated;
                } else if device.metadata_version == existing.metadata_version {
                    // Same generation: fill in addresses a Hello may omit.
                    if existing.xaddrs.is_empty() && !device.xaddrs.is_empty() {
                        existing.xaddrs = device.xaddrs.clone();
                        update = ProxyUpdate::Updated;
                    } else {
                        update = ProxyUpdate::Unchanged;
                    }
                    existing.last_seen = device.last_seen;
                } else {
                    log::debug!(
                        "[wsd] stale announcement for {} (v{} < v{})",
                        existing.endpoint,
                        device.metadata_version,
                        existing.metadata_version
                    );
                    existing.last_seen = device.last_seen;
                    update = ProxyUpdate::Unchanged;
                }
            })
            .or_insert(device);
        update
    }

    /// Remove an endpoint (Bye). Returns the removed entry.
    pub fn remove(&self, endpoint: &str) -> Option<RemoteDevice> {
        self.devices.remove(endpoint).map(|(_, device)| device)
    }

    pub fn get(&self, endpoint: &str) -> Option<RemoteDevice> {
        self.devices.get(endpoint).map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<RemoteDevice> {
        self.devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
