// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed change-sets emitted by committed transactions.

use std::sync::Arc;

use crate::biceps::{actions, ContextState, Descriptor, Handle, State};
use crate::ident::Uuid;

/// Descriptor-tree changes of one transaction, with the created/updated/
/// deleted split the description modification report needs.
#[derive(Debug, Clone, Default)]
pub struct DescriptorChanges {
    pub created: Vec<Arc<Descriptor>>,
    pub updated: Vec<Arc<Descriptor>>,
    pub deleted: Vec<Handle>,
    /// States touched alongside their descriptors (created or re-versioned).
    pub states: Vec<Arc<State>>,
}

impl DescriptorChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Everything one committed transaction changed, tagged with the resulting
/// `mdib_version`. One change-set can produce reports of several actions.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub mdib_version: u64,
    pub sequence_id: Uuid,
    pub instance_id: Option<u64>,

    pub descriptors: DescriptorChanges,
    pub metric_states: Vec<Arc<State>>,
    pub alert_states: Vec<Arc<State>>,
    pub component_states: Vec<Arc<State>>,
    pub operational_states: Vec<Arc<State>>,
    pub context_states: Vec<Arc<ContextState>>,
    pub waveform_states: Vec<Arc<State>>,
}

impl ChangeSet {
    pub fn new(mdib_version: u64, sequence_id: Uuid, instance_id: Option<u64>) -> Self {
        Self {
            mdib_version,
            sequence_id,
            instance_id,
            descriptors: DescriptorChanges::default(),
            metric_states: Vec::new(),
            alert_states: Vec::new(),
            component_states: Vec::new(),
            operational_states: Vec::new(),
            context_states: Vec::new(),
            waveform_states: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
            && self.metric_states.is_empty()
            && self.alert_states.is_empty()
            && self.component_states.is_empty()
            && self.operational_states.is_empty()
            && self.context_states.is_empty()
            && self.waveform_states.is_empty()
    }

    /// Episodic report actions this change-set produces, in a stable order.
    pub fn report_actions(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.descriptors.is_empty() {
            out.push(actions::DESCRIPTION_MODIFICATION_REPORT);
        }
        if !self.metric_states.is_empty() {
            out.push(actions::EPISODIC_METRIC_REPORT);
        }
        if !self.alert_states.is_empty() {
            out.push(actions::EPISODIC_ALERT_REPORT);
        }
        if !self.component_states.is_empty() {
            out.push(actions::EPISODIC_COMPONENT_REPORT);
        }
        if !self.operational_states.is_empty() {
            out.push(actions::EPISODIC_OPERATIONAL_STATE_REPORT);
        }
        if !self.context_states.is_empty() {
            out.push(actions::EPISODIC_CONTEXT_REPORT);
        }
        if !self.waveform_states.is_empty() {
            out.push(actions::WAVEFORM_STREAM);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::{ComponentActivation, StatePayload};

    #[test]
    fn test_empty_changeset() {
        let change = ChangeSet::new(1, Uuid::generate(), None);
        assert!(change.is_empty());
        assert!(change.report_actions().is_empty());
    }

    #[test]
    fn test_report_actions_per_bucket() {
        let mut change = ChangeSet::new(7, Uuid::generate(), None);
        change.metric_states.push(Arc::new(State::new(
            "hr.num",
            StatePayload::NumericMetric {
                activation: ComponentActivation::On,
                value: None,
            },
        )));
        change.waveform_states.push(Arc::new(State::new(
            "ecg.rtsa",
            StatePayload::RealTimeSampleArrayMetric {
                activation: ComponentActivation::On,
                value: None,
            },
        )));
        assert_eq!(
            change.report_actions(),
            vec![actions::EPISODIC_METRIC_REPORT, actions::WAVEFORM_STREAM]
        );
    }
}
