// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime states: single-states keyed by their descriptor handle and
//! multi-states (contexts) carrying their own handle.

use std::sync::Arc;

use super::descriptor::{DescriptorKind, OperationKind};
use super::values::{
    AlertActivation, AlertSignalPresence, ComponentActivation, ContextAssociation, Handle,
    InstanceIdentifier, MetricValue, OperatingMode, SampleArrayValue, Sex, StringMetricValue,
    Timestamp,
};

/// Change-set bucket a state belongs to. Context states route through their
/// own type and are not covered here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StateKind {
    Metric,
    Waveform,
    Alert,
    Component,
    Operational,
}

/// Kind-specific state attributes of a single-state.
#[derive(Debug, Clone, PartialEq)]
pub enum StatePayload {
    Mds {
        activation: ComponentActivation,
    },
    Vmd {
        activation: ComponentActivation,
    },
    Channel {
        activation: ComponentActivation,
    },
    SystemContext {
        activation: ComponentActivation,
    },
    Battery {
        activation: ComponentActivation,
    },
    Clock {
        activation: ComponentActivation,
    },
    NumericMetric {
        activation: ComponentActivation,
        value: Option<MetricValue>,
    },
    StringMetric {
        activation: ComponentActivation,
        value: Option<StringMetricValue>,
    },
    EnumStringMetric {
        activation: ComponentActivation,
        value: Option<StringMetricValue>,
    },
    RealTimeSampleArrayMetric {
        activation: ComponentActivation,
        value: Option<SampleArrayValue>,
    },
    AlertSystem {
        activation: AlertActivation,
        last_self_check: Option<Timestamp>,
    },
    AlertCondition {
        activation: AlertActivation,
        presence: bool,
        determination_time: Option<Timestamp>,
    },
    AlertSignal {
        activation: AlertActivation,
        presence: AlertSignalPresence,
    },
    Sco {
        activation: ComponentActivation,
    },
    Operation {
        kind: OperationKind,
        operating_mode: OperatingMode,
    },
}

impl StatePayload {
    /// Change-set bucket this payload belongs to.
    pub fn kind(&self) -> StateKind {
        match self {
            Self::NumericMetric { .. }
            | Self::StringMetric { .. }
            | Self::EnumStringMetric { .. } => StateKind::Metric,
            Self::RealTimeSampleArrayMetric { .. } => StateKind::Waveform,
            Self::AlertSystem { .. } | Self::AlertCondition { .. } | Self::AlertSignal { .. } => {
                StateKind::Alert
            }
            Self::Operation { .. } => StateKind::Operational,
            Self::Mds { .. }
            | Self::Vmd { .. }
            | Self::Channel { .. }
            | Self::SystemContext { .. }
            | Self::Battery { .. }
            | Self::Clock { .. }
            | Self::Sco { .. } => StateKind::Component,
        }
    }

    /// Descriptor kind this payload is legal for (invariant: every state
    /// references an existing descriptor of the matching kind).
    pub fn descriptor_kind(&self) -> DescriptorKind {
        match self {
            Self::Mds { .. } => DescriptorKind::Mds,
            Self::Vmd { .. } => DescriptorKind::Vmd,
            Self::Channel { .. } => DescriptorKind::Channel,
            Self::SystemContext { .. } => DescriptorKind::SystemContext,
            Self::Battery { .. } => DescriptorKind::Battery,
            Self::Clock { .. } => DescriptorKind::Clock,
            Self::NumericMetric { .. } => DescriptorKind::NumericMetric,
            Self::StringMetric { .. } => DescriptorKind::StringMetric,
            Self::EnumStringMetric { .. } => DescriptorKind::EnumStringMetric,
            Self::RealTimeSampleArrayMetric { .. } => DescriptorKind::RealTimeSampleArrayMetric,
            Self::AlertSystem { .. } => DescriptorKind::AlertSystem,
            Self::AlertCondition { .. } => DescriptorKind::AlertCondition,
            Self::AlertSignal { .. } => DescriptorKind::AlertSignal,
            Self::Sco { .. } => DescriptorKind::Sco,
            Self::Operation { kind, .. } => DescriptorKind::Operation(*kind),
        }
    }

    /// Default state for a freshly created descriptor of `kind`.
    /// None for multi-state (context) descriptors.
    pub fn default_for(kind: DescriptorKind) -> Option<Self> {
        Some(match kind {
            DescriptorKind::Mds => Self::Mds {
                activation: ComponentActivation::On,
            },
            DescriptorKind::Vmd => Self::Vmd {
                activation: ComponentActivation::On,
            },
            DescriptorKind::Channel => Self::Channel {
                activation: ComponentActivation::On,
            },
            DescriptorKind::SystemContext => Self::SystemContext {
                activation: ComponentActivation::On,
            },
            DescriptorKind::Battery => Self::Battery {
                activation: ComponentActivation::On,
            },
            DescriptorKind::Clock => Self::Clock {
                activation: ComponentActivation::On,
            },
            DescriptorKind::NumericMetric => Self::NumericMetric {
                activation: ComponentActivation::On,
                value: None,
            },
            DescriptorKind::StringMetric => Self::StringMetric {
                activation: ComponentActivation::On,
                value: None,
            },
            DescriptorKind::EnumStringMetric => Self::EnumStringMetric {
                activation: ComponentActivation::On,
                value: None,
            },
            DescriptorKind::RealTimeSampleArrayMetric => Self::RealTimeSampleArrayMetric {
                activation: ComponentActivation::On,
                value: None,
            },
            DescriptorKind::AlertSystem => Self::AlertSystem {
                activation: AlertActivation::On,
                last_self_check: None,
            },
            DescriptorKind::AlertCondition => Self::AlertCondition {
                activation: AlertActivation::On,
                presence: false,
                determination_time: None,
            },
            DescriptorKind::AlertSignal => Self::AlertSignal {
                activation: AlertActivation::On,
                presence: AlertSignalPresence::Off,
            },
            DescriptorKind::Sco => Self::Sco {
                activation: ComponentActivation::On,
            },
            DescriptorKind::Operation(kind) => Self::Operation {
                kind,
                operating_mode: OperatingMode::Enabled,
            },
            DescriptorKind::PatientContext
            | DescriptorKind::LocationContext
            | DescriptorKind::EnsembleContext => return None,
        })
    }
}

/// A single-state: exactly one per non-context descriptor, identified by the
/// descriptor handle.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub descriptor_handle: Handle,
    /// Strictly non-decreasing; bumped by one on every change.
    pub version: u64,
    /// Version of the referenced descriptor at the time of the change.
    pub descriptor_version: u64,
    pub payload: StatePayload,
    /// Source XML of this node if it was decoded and not mutated since.
    pub source_xml: Option<Arc<str>>,
}

impl State {
    pub fn new(descriptor_handle: &str, payload: StatePayload) -> Self {
        Self {
            descriptor_handle: descriptor_handle.to_string(),
            version: 0,
            descriptor_version: 0,
            payload,
            source_xml: None,
        }
    }

    pub fn kind(&self) -> StateKind {
        self.payload.kind()
    }

    pub fn invalidate_source(&mut self) {
        self.source_xml = None;
    }
}

/// Kind-specific context attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextPayload {
    Patient {
        given_name: Option<String>,
        family_name: Option<String>,
        sex: Option<Sex>,
        date_of_birth: Option<String>,
    },
    Location {
        point_of_care: Option<String>,
        facility: Option<String>,
        building: Option<String>,
        floor: Option<String>,
        room: Option<String>,
        bed: Option<String>,
    },
    Ensemble,
}

/// Which context family a payload belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Patient,
    Location,
    Ensemble,
}

impl ContextKind {
    /// Patient and location contexts allow at most one `Assoc` state per
    /// descriptor; ensembles may associate many.
    pub fn singleton_association(&self) -> bool {
        matches!(self, Self::Patient | Self::Location)
    }

    pub fn descriptor_kind(&self) -> DescriptorKind {
        match self {
            Self::Patient => DescriptorKind::PatientContext,
            Self::Location => DescriptorKind::LocationContext,
            Self::Ensemble => DescriptorKind::EnsembleContext,
        }
    }
}

impl ContextPayload {
    pub fn kind(&self) -> ContextKind {
        match self {
            Self::Patient { .. } => ContextKind::Patient,
            Self::Location { .. } => ContextKind::Location,
            Self::Ensemble => ContextKind::Ensemble,
        }
    }

    pub fn empty_patient() -> Self {
        Self::Patient {
            given_name: None,
            family_name: None,
            sex: None,
            date_of_birth: None,
        }
    }

    pub fn empty_location() -> Self {
        Self::Location {
            point_of_care: None,
            facility: None,
            building: None,
            floor: None,
            room: None,
            bed: None,
        }
    }
}

/// A multi-state attached to a context descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextState {
    /// Own handle, distinct from the descriptor handle.
    pub handle: Handle,
    pub descriptor_handle: Handle,
    pub version: u64,
    pub descriptor_version: u64,
    pub association: ContextAssociation,
    /// MDIB version of the commit that moved this state to `Assoc`.
    pub binding_mdib_version: Option<u64>,
    /// MDIB version of the commit that moved this state out of `Assoc`.
    pub unbinding_mdib_version: Option<u64>,
    pub identifications: Vec<InstanceIdentifier>,
    pub validators: Vec<InstanceIdentifier>,
    pub payload: ContextPayload,
    pub source_xml: Option<Arc<str>>,
}

impl ContextState {
    pub fn new(handle: &str, descriptor_handle: &str, payload: ContextPayload) -> Self {
        Self {
            handle: handle.to_string(),
            descriptor_handle: descriptor_handle.to_string(),
            version: 0,
            descriptor_version: 0,
            association: ContextAssociation::NotAssociated,
            binding_mdib_version: None,
            unbinding_mdib_version: None,
            identifications: Vec::new(),
            validators: Vec::new(),
            payload,
            source_xml: None,
        }
    }

    pub fn kind(&self) -> ContextKind {
        self.payload.kind()
    }

    pub fn invalidate_source(&mut self) {
        self.source_xml = None;
    }

    pub fn is_associated(&self) -> bool {
        self.association == ContextAssociation::Associated
    }
}
