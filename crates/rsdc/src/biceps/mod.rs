// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # BICEPS participant model
//!
//! Typed data model of the IEEE 11073-10207 participant vocabulary: the
//! descriptor tree (structure), the state tables (runtime values) and the
//! canonical name/action registries everything else dispatches on.
//!
//! Deep schema inheritance is flattened into one sum type per family
//! ([`Descriptor`], [`State`], [`ContextState`]); shared header fields live
//! in the struct, kind-specific attributes in the payload variant. The
//! decoded XML text of an entity is preserved next to the typed value and
//! dropped on first mutation.

/// Action URIs (SDC services, WS-Eventing, WS-Discovery, WS-Transfer).
pub mod actions;
/// Descriptor sum type and kind registry.
pub mod descriptor;
/// Namespaces, QNames, prefix table.
pub mod qname;
/// State and context-state sum types.
pub mod state;
/// Shared value types and BICEPS lexical tokens.
pub mod values;

pub use descriptor::{Descriptor, DescriptorKind, DescriptorPayload, OperationKind};
pub use qname::{ns, QName};
pub use state::{
    ContextKind, ContextPayload, ContextState, State, StateKind, StatePayload,
};
pub use values::{
    AlertActivation, AlertConditionKind, AlertConditionPriority, AlertSignalManifestation,
    AlertSignalPresence, CodedValue, ComponentActivation, ContextAssociation, Handle,
    InstanceIdentifier, InvocationError, InvocationState, MeasurementValidity, MetricAvailability,
    MetricCategory, MetricValue, OperatingMode, SafetyClassification, SampleArrayValue, Sex,
    StringMetricValue, Timestamp,
};
