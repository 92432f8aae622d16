// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global configuration - single source of truth.
//!
//! This module centralizes ALL protocol constants and runtime configuration.
//! **NEVER hardcode elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time constants (WS-Discovery timing, ports,
//!   multicast group, default expirations)
//! - **Level 2 (Dynamic)**: [`RuntimeConfig`] for runtime settings (adapter
//!   pinning, cadences, queue depths)
//!
//! # Example
//!
//! ```ignore
//! use rsdc::config::*;
//!
//! // Static constants
//! let port = WS_DISCOVERY_PORT; // 3702
//!
//! // Dynamic config
//! let config = RuntimeConfig::new();
//! config.set("discovery.adapter", "192.168.1.10");
//! ```

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

// =======================================================================
// WS-Discovery 2005/04 and the SOAP-over-UDP binding
// IANA registered: 3702 (UDP)
// =======================================================================

/// WS-Discovery IPv4 multicast group (WS-Discovery 2005/04 Sec.2.4)
pub const WS_DISCOVERY_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// WS-Discovery UDP port (IANA registered)
pub const WS_DISCOVERY_PORT: u16 = 3702;

/// Upper bound for the random delay before answering a multicast Probe/Resolve
/// (WS-Discovery 2005/04 Sec.3.1.3, `APP_MAX_DELAY`).
pub const APP_MAX_DELAY: Duration = Duration::from_millis(500);

/// Window for collecting ProbeMatch/ResolveMatch responses after a multicast
/// send (`MATCH_TIMEOUT`).
pub const MATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// SOAP-over-UDP retransmission schedule (Sec.3.1 of the binding):
/// first resend after a random delay in `[UDP_MIN_DELAY, UDP_MAX_DELAY]`,
/// the gap doubles on every attempt and is capped at `UDP_UPPER_DELAY`.
pub const UDP_MIN_DELAY: Duration = Duration::from_millis(50);
/// See [`UDP_MIN_DELAY`].
pub const UDP_MAX_DELAY: Duration = Duration::from_millis(250);
/// Cap for the exponentially growing inter-send gap.
pub const UDP_UPPER_DELAY: Duration = Duration::from_millis(500);

/// Number of transmissions for a unicast SOAP-over-UDP message.
pub const UDP_UNICAST_REPEAT: u32 = 2;
/// Number of transmissions for a multicast SOAP-over-UDP message.
pub const UDP_MULTICAST_REPEAT: u32 = 4;

/// Capacity of the duplicate-suppression cache keyed by `wsa:MessageID`.
///
/// SOAP-over-UDP retransmits every message up to 4 times; the receive path
/// drops repeats through this cache.
pub const MESSAGE_ID_CACHE_CAPACITY: usize = 1024;

// =======================================================================
// WS-Eventing defaults
// =======================================================================

/// Expiration granted when a Subscribe carries no `wse:Expires`.
pub const DEFAULT_SUBSCRIPTION_EXPIRES: Duration = Duration::from_secs(60);

/// Hard cap on granted subscription lifetime. Longer requests are clamped
/// silently (WS-Eventing allows the source to grant less than requested).
pub const MAX_SUBSCRIPTION_DURATION: Duration = Duration::from_secs(3600);

/// Safety margin subtracted from the expiration instant when the consumer
/// auto-renews on deadline.
pub const RENEW_SAFETY_MARGIN: Duration = Duration::from_secs(10);

/// Poll interval of the provider-side expiration sweeper.
pub const SUBSCRIPTION_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded depth of one per-subscription delivery lane.
pub const DELIVERY_QUEUE_DEPTH: usize = 128;

// =======================================================================
// MDIB / report processing defaults
// =======================================================================

/// How long the consumer holds an out-of-order report before declaring a gap.
pub const REORDER_WINDOW: Duration = Duration::from_millis(50);

/// Capacity of the consumer-side re-order buffer. Overflow triggers gap
/// recovery immediately, without waiting for the window.
pub const REORDER_BUFFER_CAPACITY: usize = 16;

/// Default waveform emission cadence. Not part of the protocol; tune per
/// device via [`RuntimeConfig`] key `waveform.cadence_ms`.
pub const WAVEFORM_CADENCE: Duration = Duration::from_millis(100);

/// Default periodic report interval (Periodic*Report actions).
pub const PERIODIC_REPORT_INTERVAL: Duration = Duration::from_secs(5);

// =======================================================================
// Transport / shutdown
// =======================================================================

/// Per-stage deadline of the graceful shutdown sequence (drain sends,
/// emit Bye/SubscriptionEnd, close sockets).
pub const SHUTDOWN_STAGE_DEADLINE: Duration = Duration::from_secs(2);

/// Receive poll tick of the discovery socket. Bounds shutdown latency of the
/// receive thread.
pub const RECV_POLL_TICK: Duration = Duration::from_millis(100);

/// Environment variable prefix recognized by [`RuntimeConfig::from_env`].
pub const ENV_PREFIX: &str = "RSDC_";

// =======================================================================
// Runtime configuration
// =======================================================================

/// Swappable timing profile consulted by the background loops.
///
/// Swapping a profile takes effect on the next timer tick of each loop; the
/// loops never cache durations across iterations.
#[derive(Debug, Clone)]
pub struct Timing {
    pub reorder_window: Duration,
    pub waveform_cadence: Duration,
    pub periodic_report_interval: Duration,
    pub renew_safety_margin: Duration,
    pub max_subscription_duration: Duration,
    pub match_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reorder_window: REORDER_WINDOW,
            waveform_cadence: WAVEFORM_CADENCE,
            periodic_report_interval: PERIODIC_REPORT_INTERVAL,
            renew_safety_margin: RENEW_SAFETY_MARGIN,
            max_subscription_duration: MAX_SUBSCRIPTION_DURATION,
            match_timeout: MATCH_TIMEOUT,
        }
    }
}

/// Dynamic runtime configuration shared by provider/consumer components.
///
/// Lock-free reads: keyed settings live in a `DashMap`, the structured timing
/// profile behind an `ArcSwap`. Cloning the handle is cheap (`Arc` inside).
#[derive(Clone)]
pub struct RuntimeConfig {
    settings: Arc<DashMap<Arc<str>, Arc<str>>>,
    timing: Arc<ArcSwap<Timing>>,
}

impl RuntimeConfig {
    /// Create a config with built-in defaults and no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: Arc::new(DashMap::new()),
            timing: Arc::new(ArcSwap::from_pointee(Timing::default())),
        }
    }

    /// Create a config seeded from `RSDC_*` environment variables.
    ///
    /// `RSDC_DISCOVERY_ADAPTER=10.0.0.5` becomes key `discovery.adapter`.
    /// Unknown keys are stored verbatim so call sites can look them up.
    #[must_use]
    pub fn from_env() -> Self {
        let config = Self::new();
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let dotted = stripped.to_ascii_lowercase().replace('_', ".");
                log::debug!("[config] env override {} = {}", dotted, value);
                config.set(&dotted, &value);
            }
        }
        config
    }

    /// Store a keyed setting.
    pub fn set(&self, key: &str, value: &str) {
        self.settings.insert(Arc::from(key), Arc::from(value));
    }

    /// Look up a keyed setting.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        self.settings.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a setting parsed as milliseconds, with fallback.
    #[must_use]
    pub fn get_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|raw| raw.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    /// Current timing profile.
    #[must_use]
    pub fn timing(&self) -> Arc<Timing> {
        self.timing.load_full()
    }

    /// Atomically replace the timing profile.
    pub fn set_timing(&self, timing: Timing) {
        self.timing.store(Arc::new(timing));
    }

    /// Pinned discovery adapter (`discovery.adapter`), if any.
    #[must_use]
    pub fn discovery_adapter(&self) -> Option<Ipv4Addr> {
        self.get("discovery.adapter")
            .and_then(|raw| raw.parse::<Ipv4Addr>().ok())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("settings", &self.settings.len())
            .field("timing", &self.timing.load())
            .finish()
    }
}
