// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Descriptor tree: structural nodes of the MDIB.
//!
//! One sum type per the descriptor family; shared header fields live in
//! [`Descriptor`], kind-specific attributes in [`DescriptorPayload`]. The
//! original XML text of a loaded descriptor is kept alongside and dropped on
//! the first typed mutation.

use std::sync::Arc;
use std::time::Duration;

use super::values::{
    AlertConditionKind, AlertConditionPriority, AlertSignalManifestation, CodedValue, Handle,
    MetricAvailability, MetricCategory, SafetyClassification,
};

/// Flat kind tag of a descriptor. Decoding dispatches on the `xsi:type`
/// QName into this tag; encoding goes the other way.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Mds,
    Vmd,
    Channel,
    SystemContext,
    PatientContext,
    LocationContext,
    EnsembleContext,
    NumericMetric,
    StringMetric,
    EnumStringMetric,
    RealTimeSampleArrayMetric,
    AlertSystem,
    AlertCondition,
    AlertSignal,
    Sco,
    Operation(OperationKind),
    Battery,
    Clock,
}

/// Which set-service operation an SCO operation descriptor models.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SetValue,
    SetString,
    SetMetricState,
    SetComponentState,
    SetAlertState,
    SetContextState,
    Activate,
}

impl DescriptorKind {
    /// `xsi:type` local name in the participant-model namespace.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Mds => "MdsDescriptor",
            Self::Vmd => "VmdDescriptor",
            Self::Channel => "ChannelDescriptor",
            Self::SystemContext => "SystemContextDescriptor",
            Self::PatientContext => "PatientContextDescriptor",
            Self::LocationContext => "LocationContextDescriptor",
            Self::EnsembleContext => "EnsembleContextDescriptor",
            Self::NumericMetric => "NumericMetricDescriptor",
            Self::StringMetric => "StringMetricDescriptor",
            Self::EnumStringMetric => "EnumStringMetricDescriptor",
            Self::RealTimeSampleArrayMetric => "RealTimeSampleArrayMetricDescriptor",
            Self::AlertSystem => "AlertSystemDescriptor",
            Self::AlertCondition => "AlertConditionDescriptor",
            Self::AlertSignal => "AlertSignalDescriptor",
            Self::Sco => "ScoDescriptor",
            Self::Operation(op) => op.descriptor_type_name(),
            Self::Battery => "BatteryDescriptor",
            Self::Clock => "ClockDescriptor",
        }
    }

    /// `xsi:type` local name of the matching state.
    pub fn state_type_name(&self) -> &'static str {
        match self {
            Self::Mds => "MdsState",
            Self::Vmd => "VmdState",
            Self::Channel => "ChannelState",
            Self::SystemContext => "SystemContextState",
            Self::PatientContext => "PatientContextState",
            Self::LocationContext => "LocationContextState",
            Self::EnsembleContext => "EnsembleContextState",
            Self::NumericMetric => "NumericMetricState",
            Self::StringMetric => "StringMetricState",
            Self::EnumStringMetric => "EnumStringMetricState",
            Self::RealTimeSampleArrayMetric => "RealTimeSampleArrayMetricState",
            Self::AlertSystem => "AlertSystemState",
            Self::AlertCondition => "AlertConditionState",
            Self::AlertSignal => "AlertSignalState",
            Self::Sco => "ScoState",
            Self::Operation(op) => op.state_type_name(),
            Self::Battery => "BatteryState",
            Self::Clock => "ClockState",
        }
    }

    /// Reverse of [`type_name`](Self::type_name).
    pub fn from_type_name(local: &str) -> Option<Self> {
        Some(match local {
            "MdsDescriptor" => Self::Mds,
            "VmdDescriptor" => Self::Vmd,
            "ChannelDescriptor" => Self::Channel,
            "SystemContextDescriptor" => Self::SystemContext,
            "PatientContextDescriptor" => Self::PatientContext,
            "LocationContextDescriptor" => Self::LocationContext,
            "EnsembleContextDescriptor" => Self::EnsembleContext,
            "NumericMetricDescriptor" => Self::NumericMetric,
            "StringMetricDescriptor" => Self::StringMetric,
            "EnumStringMetricDescriptor" => Self::EnumStringMetric,
            "RealTimeSampleArrayMetricDescriptor" => Self::RealTimeSampleArrayMetric,
            "AlertSystemDescriptor" => Self::AlertSystem,
            "AlertConditionDescriptor" => Self::AlertCondition,
            "AlertSignalDescriptor" => Self::AlertSignal,
            "ScoDescriptor" => Self::Sco,
            "BatteryDescriptor" => Self::Battery,
            "ClockDescriptor" => Self::Clock,
            other => Self::Operation(OperationKind::from_descriptor_type_name(other)?),
        })
    }

    /// Context descriptors own zero-or-more multi-states instead of exactly
    /// one single-state.
    pub fn is_multi_state(&self) -> bool {
        matches!(
            self,
            Self::PatientContext | Self::LocationContext | Self::EnsembleContext
        )
    }

    /// Root of the containment tree.
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Mds)
    }

    pub fn is_metric(&self) -> bool {
        matches!(
            self,
            Self::NumericMetric
                | Self::StringMetric
                | Self::EnumStringMetric
                | Self::RealTimeSampleArrayMetric
        )
    }

    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }
}

impl OperationKind {
    pub fn descriptor_type_name(&self) -> &'static str {
        match self {
            Self::SetValue => "SetValueOperationDescriptor",
            Self::SetString => "SetStringOperationDescriptor",
            Self::SetMetricState => "SetMetricStateOperationDescriptor",
            Self::SetComponentState => "SetComponentStateOperationDescriptor",
            Self::SetAlertState => "SetAlertStateOperationDescriptor",
            Self::SetContextState => "SetContextStateOperationDescriptor",
            Self::Activate => "ActivateOperationDescriptor",
        }
    }

    pub fn state_type_name(&self) -> &'static str {
        match self {
            Self::SetValue => "SetValueOperationState",
            Self::SetString => "SetStringOperationState",
            Self::SetMetricState => "SetMetricStateOperationState",
            Self::SetComponentState => "SetComponentStateOperationState",
            Self::SetAlertState => "SetAlertStateOperationState",
            Self::SetContextState => "SetContextStateOperationState",
            Self::Activate => "ActivateOperationState",
        }
    }

    pub fn from_descriptor_type_name(local: &str) -> Option<Self> {
        Some(match local {
            "SetValueOperationDescriptor" => Self::SetValue,
            "SetStringOperationDescriptor" => Self::SetString,
            "SetMetricStateOperationDescriptor" => Self::SetMetricState,
            "SetComponentStateOperationDescriptor" => Self::SetComponentState,
            "SetAlertStateOperationDescriptor" => Self::SetAlertState,
            "SetContextStateOperationDescriptor" => Self::SetContextState,
            "ActivateOperationDescriptor" => Self::Activate,
            _ => return None,
        })
    }
}

/// Kind-specific descriptor attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorPayload {
    Mds,
    Vmd,
    Channel,
    SystemContext,
    PatientContext,
    LocationContext,
    EnsembleContext,
    NumericMetric {
        unit: CodedValue,
        resolution: f64,
        category: MetricCategory,
        availability: MetricAvailability,
    },
    StringMetric {
        unit: CodedValue,
        category: MetricCategory,
        availability: MetricAvailability,
    },
    EnumStringMetric {
        unit: CodedValue,
        category: MetricCategory,
        availability: MetricAvailability,
        allowed_values: Vec<String>,
    },
    RealTimeSampleArrayMetric {
        unit: CodedValue,
        resolution: f64,
        category: MetricCategory,
        availability: MetricAvailability,
        sample_period: Duration,
    },
    AlertSystem {
        self_check_period: Option<Duration>,
    },
    AlertCondition {
        kind: AlertConditionKind,
        priority: AlertConditionPriority,
        sources: Vec<Handle>,
    },
    AlertSignal {
        condition_signaled: Option<Handle>,
        manifestation: AlertSignalManifestation,
        latching: bool,
    },
    Sco,
    Operation {
        kind: OperationKind,
        operation_target: Handle,
    },
    Battery,
    Clock,
}

impl DescriptorPayload {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::Mds => DescriptorKind::Mds,
            Self::Vmd => DescriptorKind::Vmd,
            Self::Channel => DescriptorKind::Channel,
            Self::SystemContext => DescriptorKind::SystemContext,
            Self::PatientContext => DescriptorKind::PatientContext,
            Self::LocationContext => DescriptorKind::LocationContext,
            Self::EnsembleContext => DescriptorKind::EnsembleContext,
            Self::NumericMetric { .. } => DescriptorKind::NumericMetric,
            Self::StringMetric { .. } => DescriptorKind::StringMetric,
            Self::EnumStringMetric { .. } => DescriptorKind::EnumStringMetric,
            Self::RealTimeSampleArrayMetric { .. } => DescriptorKind::RealTimeSampleArrayMetric,
            Self::AlertSystem { .. } => DescriptorKind::AlertSystem,
            Self::AlertCondition { .. } => DescriptorKind::AlertCondition,
            Self::AlertSignal { .. } => DescriptorKind::AlertSignal,
            Self::Sco => DescriptorKind::Sco,
            Self::Operation { kind, .. } => DescriptorKind::Operation(*kind),
            Self::Battery => DescriptorKind::Battery,
            Self::Clock => DescriptorKind::Clock,
        }
    }
}

/// A structural node of the MDIB.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub handle: Handle,
    /// None for MDS roots; must resolve for everything else.
    pub parent: Option<Handle>,
    /// Strictly non-decreasing; bumped by one on every change to this node.
    pub version: u64,
    pub type_code: Option<CodedValue>,
    pub safety: SafetyClassification,
    pub payload: DescriptorPayload,
    /// Source XML of this node if it was decoded and not mutated since.
    pub source_xml: Option<Arc<str>>,
}

impl Descriptor {
    pub fn new(handle: &str, parent: Option<&str>, payload: DescriptorPayload) -> Self {
        Self {
            handle: handle.to_string(),
            parent: parent.map(str::to_string),
            version: 0,
            type_code: None,
            safety: SafetyClassification::Informational,
            payload,
            source_xml: None,
        }
    }

    pub fn kind(&self) -> DescriptorKind {
        self.payload.kind()
    }

    /// Drop the preserved source text; called on every typed mutation.
    pub fn invalidate_source(&mut self) {
        self.source_xml = None;
    }

    /// Operation target handle, for operation descriptors.
    pub fn operation_target(&self) -> Option<&Handle> {
        match &self.payload {
            DescriptorPayload::Operation {
                operation_target, ..
            } => Some(operation_target),
            _ => None,
        }
    }
}
