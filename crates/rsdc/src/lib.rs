// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RSDC - IEEE 11073 SDC core
//!
//! A pure Rust implementation of the IEEE 11073 SDC (Service-oriented Device
//! Connectivity) core: the MDIB engine, the WS-Eventing subscription
//! pipeline, the WS-Discovery multicast engine and the SOAP/DPWS dispatch
//! layer that ties them together.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Application Layer                           |
//! |      SdcProvider (device role)   |   SdcConsumer (client role)     |
//! +--------------------------------------------------------------------+
//! |                          MDIB Layer                                |
//! |   Versioned store | Transactions | Change-sets | Report processor  |
//! +--------------------------------------------------------------------+
//! |                        Messaging Layer                             |
//! |   SOAP 1.2 + WS-Addressing | WS-Eventing fan-out | Dispatch        |
//! +--------------------------------------------------------------------+
//! |                        Discovery Layer                             |
//! |   WS-Discovery 2005/04 over UDP multicast 239.255.255.250:3702     |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`mdib::Mdib`] | Versioned descriptor/state container with lock-free snapshots |
//! | [`mdib::Transaction`] | Atomically staged MDIB mutation producing a change-set |
//! | [`provider::SdcProvider`] | Device side: services, subscriptions, discovery announce |
//! | [`consumer::SdcConsumer`] | Client side: mirror, report processing, operations |
//! | [`discovery::WsDiscovery`] | Multicast probe/resolve/hello/bye node |
//!
//! ## Roles
//!
//! A **provider** publishes its MDIB, fans reports out to subscribed
//! consumers in commit order, and executes control operations through its
//! SCO. A **consumer** discovers providers, mirrors their MDIB, and detects
//! and repairs report gaps by refetching.
//!
//! Transport plumbing (HTTP client/server, TLS) is pluggable: the library
//! speaks through [`soap::SoapPoster`] for outbound messages and
//! [`soap::SoapDispatcher`] for inbound ones.

/// BICEPS participant model (descriptors, states, names, actions).
pub mod biceps;
/// Global configuration (protocol constants, runtime config).
pub mod config;
/// Consumer role: report processor and consumer facade.
pub mod consumer;
/// WS-Discovery engine (multicast probe/resolve, proxy database).
pub mod discovery;
/// WS-Eventing: subscriptions, provider fan-out, consumer client.
pub mod eventing;
/// UUIDs for endpoint references, message ids and sequence ids.
pub mod ident;
/// MDIB store, change-sets and the transaction manager.
pub mod mdib;
/// Provider role: services, operations, waveform pump, reporters.
pub mod provider;
/// SOAP 1.2 envelope, WS-Addressing, faults, dispatch, client.
pub mod soap;
/// XML reading/writing and the participant-model codec.
pub mod xml;

pub use biceps::Handle;
pub use ident::Uuid;

/// Errors returned by RSDC operations.
///
/// Variants are grouped by concern; transport errors keep their underlying
/// `std::io::Error` as `source()`.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid or missing configuration value.
    Config(String),
    /// No network adapter matches the requested binding.
    NoAdapter(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    IoError(std::io::Error),
    /// Failed to bind socket to address.
    BindFailed(String),
    /// Failed to join multicast group.
    MulticastJoinFailed(String),
    /// Send operation failed.
    SendFailed(String),
    /// Outbound SOAP POST failed (connection refused, timeout).
    PostFailed(String),
    /// Operation did not complete within its deadline.
    Timeout(String),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or schema-invalid XML.
    Xml(String),
    /// Peer answered with a SOAP fault.
    Fault(soap::Fault),
    /// No handler registered for the `wsa:Action`.
    UnknownAction(String),

    // ========================================================================
    // MDIB Errors
    // ========================================================================
    /// Handle does not resolve in the MDIB.
    UnknownHandle(String),
    /// Handle already present on create.
    DuplicateHandle(String),
    /// State/descriptor kind mismatch, or entity touched outside its
    /// transaction kind.
    KindMismatch(String),
    /// Transaction staged an edit that no longer applies.
    StaleTransaction(String),

    // ========================================================================
    // Eventing Errors
    // ========================================================================
    /// Subscription identifier does not resolve.
    UnknownSubscription(String),
    /// Requested expiration is invalid (zero, past, unparseable).
    InvalidExpiration(String),
    /// Per-subscription delivery lane overflowed.
    DeliveryOverflow(String),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Probe/resolve window elapsed without a match.
    DiscoveryTimeout,
    /// Invalid state for the requested operation.
    InvalidState(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Configuration
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::NoAdapter(msg) => write!(f, "No matching network adapter: {}", msg),
            // Transport
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            Error::MulticastJoinFailed(msg) => write!(f, "Multicast join failed: {}", msg),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::PostFailed(msg) => write!(f, "POST failed: {}", msg),
            Error::Timeout(msg) => write!(f, "Timed out: {}", msg),
            // Protocol
            Error::Xml(msg) => write!(f, "XML error: {}", msg),
            Error::Fault(fault) => write!(f, "SOAP fault: {}", fault),
            Error::UnknownAction(action) => write!(f, "Unknown action: {}", action),
            // MDIB
            Error::UnknownHandle(handle) => write!(f, "Unknown handle: {}", handle),
            Error::DuplicateHandle(handle) => write!(f, "Duplicate handle: {}", handle),
            Error::KindMismatch(msg) => write!(f, "Kind mismatch: {}", msg),
            Error::StaleTransaction(msg) => write!(f, "Stale transaction: {}", msg),
            // Eventing
            Error::UnknownSubscription(id) => write!(f, "Unknown subscription: {}", id),
            Error::InvalidExpiration(msg) => write!(f, "Invalid expiration: {}", msg),
            Error::DeliveryOverflow(id) => write!(f, "Delivery queue overflow: {}", id),
            // Other
            Error::DiscoveryTimeout => write!(f, "Discovery timed out"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Convenient alias for API results using the public [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;
