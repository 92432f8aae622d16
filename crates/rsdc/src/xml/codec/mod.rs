// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant-model XML codec.
//!
//! Bi-directional mapping between the typed model in [`crate::biceps`] and
//! its BICEPS XML form. A decoded entity keeps its source text and re-emits
//! it verbatim until the first typed mutation invalidates it; everything
//! else is regenerated through the writer.

mod descriptor;
mod state;

pub use descriptor::{decode_descriptor, encode_descriptor, encode_descriptor_open};
pub use state::{
    decode_context_state, decode_state, encode_context_state, encode_state,
};

use crate::biceps::qname::{ns, QName, PREFIXES};
use crate::biceps::DescriptorKind;

/// Containment element name of a descriptor kind inside its parent
/// (`pm:Vmd`, `pm:Channel`, `pm:Metric`, ...).
pub fn containment_element(kind: DescriptorKind) -> QName {
    let local = match kind {
        DescriptorKind::Mds => "Mds",
        DescriptorKind::Vmd => "Vmd",
        DescriptorKind::Channel => "Channel",
        DescriptorKind::SystemContext => "SystemContext",
        DescriptorKind::PatientContext => "PatientContext",
        DescriptorKind::LocationContext => "LocationContext",
        DescriptorKind::EnsembleContext => "EnsembleContext",
        DescriptorKind::NumericMetric
        | DescriptorKind::StringMetric
        | DescriptorKind::EnumStringMetric
        | DescriptorKind::RealTimeSampleArrayMetric => "Metric",
        DescriptorKind::AlertSystem => "AlertSystem",
        DescriptorKind::AlertCondition => "AlertCondition",
        DescriptorKind::AlertSignal => "AlertSignal",
        DescriptorKind::Sco => "Sco",
        DescriptorKind::Operation(_) => "Operation",
        DescriptorKind::Battery => "Battery",
        DescriptorKind::Clock => "Clock",
    };
    QName::new(ns::PM, local)
}

/// Descriptor kind determined by element name alone, where unambiguous.
/// `pm:Metric` and `pm:Operation` need `xsi:type`.
pub(crate) fn kind_from_element(local: &str) -> Option<DescriptorKind> {
    Some(match local {
        "Mds" => DescriptorKind::Mds,
        "Vmd" => DescriptorKind::Vmd,
        "Channel" => DescriptorKind::Channel,
        "SystemContext" => DescriptorKind::SystemContext,
        "PatientContext" => DescriptorKind::PatientContext,
        "LocationContext" => DescriptorKind::LocationContext,
        "EnsembleContext" => DescriptorKind::EnsembleContext,
        "AlertSystem" => DescriptorKind::AlertSystem,
        "AlertCondition" => DescriptorKind::AlertCondition,
        "AlertSignal" => DescriptorKind::AlertSignal,
        "Sco" => DescriptorKind::Sco,
        "Battery" => DescriptorKind::Battery,
        "Clock" => DescriptorKind::Clock,
        _ => return None,
    })
}

/// True when the document binds the canonical prefixes for the namespaces
/// the codec re-emits. Source-text preservation is only safe then: a kept
/// snippet relies on the root-level prefix declarations of the regenerated
/// document.
pub fn uses_canonical_prefixes(doc: &roxmltree::Document<'_>) -> bool {
    doc.root_element().namespaces().all(|binding| {
        let Some(name) = binding.name() else {
            return true; // default namespace does not collide with prefixed output
        };
        match PREFIXES.iter().find(|(prefix, _)| *prefix == name) {
            Some((_, uri)) => *uri == binding.uri(),
            // Unknown prefixes are fine as long as they do not shadow a
            // canonical namespace under a different name.
            None => !PREFIXES.iter().any(|(_, uri)| *uri == binding.uri()),
        }
    })
}

/// Render a float the way BICEPS expects (no exponent for common ranges,
/// integral values without the trailing `.0`).
pub(crate) fn format_decimal(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
