// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # WS-Eventing pipeline
//!
//! Provider side: the [`SubscriptionManager`] keeps event-sink bookkeeping,
//! matches action filters, clamps and sweeps expirations, and fans reports
//! out over one bounded FIFO lane per subscription (order preserved per
//! subscriber, waveforms shed first under backpressure).
//!
//! Consumer side: the [`SubscriptionClient`] runs the
//! subscribe/renew/unsubscribe lifecycle with auto-renew and resubscribes
//! (reporting a gap) when the provider has forgotten a subscription.

pub mod client;
pub mod manager;
pub mod subscription;

pub use client::{ClientSubscription, GapListener, SubscriptionClient};
pub use manager::{SubscriptionEntry, SubscriptionManager};
pub use subscription::{
    EndReason, EndpointReference, SubscribeRequest, SubscribeResponse, ACTION_DIALECT,
};
