// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Descriptor encode/decode.

use std::sync::Arc;
use std::time::Duration;

use roxmltree::Node;

use crate::biceps::qname::{ns, QName};
use crate::biceps::values::{format_xsd_duration, parse_xsd_duration};
use crate::biceps::{
    AlertConditionKind, AlertConditionPriority, AlertSignalManifestation, CodedValue, Descriptor,
    DescriptorKind, DescriptorPayload, MetricAvailability, MetricCategory, SafetyClassification,
};
use crate::xml::reader;
use crate::xml::writer::XmlWriter;
use crate::{Error, Result};

use super::{format_decimal, kind_from_element};

/// Encode one descriptor node (without its containment children) as
/// `element`. Re-emits preserved source text when still valid.
pub fn encode_descriptor(w: &mut XmlWriter, element: QName, descriptor: &Descriptor) {
    if let Some(source) = &descriptor.source_xml {
        w.raw(source);
        return;
    }
    encode_descriptor_open(w, element, descriptor);
    w.close();
}

/// Like [`encode_descriptor`], but leaves the element open so the caller
/// can nest containment children before closing. Preserved source text is
/// ignored on this path (a kept snippet could not take children).
pub fn encode_descriptor_open(w: &mut XmlWriter, element: QName, descriptor: &Descriptor) {
    let kind = descriptor.kind();
    w.open(element);
    if kind_from_element(element.local) != Some(kind) {
        w.attr_qname("xsi:type", QName::new(ns::PM, kind.type_name()));
    }
    w.attr("Handle", &descriptor.handle);
    if descriptor.version > 0 {
        w.attr("DescriptorVersion", &descriptor.version.to_string());
    }
    w.attr("SafetyClassification", descriptor.safety.as_str());

    match &descriptor.payload {
        DescriptorPayload::NumericMetric {
            unit,
            resolution,
            category,
            availability,
        } => {
            w.attr("Resolution", &format_decimal(*resolution));
            w.attr("MetricCategory", category.as_str());
            w.attr("MetricAvailability", availability.as_str());
            encode_type(w, descriptor);
            encode_coded_value(w, QName::new(ns::PM, "Unit"), unit);
        }
        DescriptorPayload::StringMetric {
            unit,
            category,
            availability,
        } => {
            w.attr("MetricCategory", category.as_str());
            w.attr("MetricAvailability", availability.as_str());
            encode_type(w, descriptor);
            encode_coded_value(w, QName::new(ns::PM, "Unit"), unit);
        }
        DescriptorPayload::EnumStringMetric {
            unit,
            category,
            availability,
            allowed_values,
        } => {
            w.attr("MetricCategory", category.as_str());
            w.attr("MetricAvailability", availability.as_str());
            encode_type(w, descriptor);
            encode_coded_value(w, QName::new(ns::PM, "Unit"), unit);
            for value in allowed_values {
                w.open(QName::new(ns::PM, "AllowedValue"));
                w.leaf(QName::new(ns::PM, "Value"), value);
                w.close();
            }
        }
        DescriptorPayload::RealTimeSampleArrayMetric {
            unit,
            resolution,
            category,
            availability,
            sample_period,
        } => {
            w.attr("Resolution", &format_decimal(*resolution));
            w.attr("MetricCategory", category.as_str());
            w.attr("MetricAvailability", availability.as_str());
            w.attr("SamplePeriod", &format_xsd_duration(*sample_period));
            encode_type(w, descriptor);
            encode_coded_value(w, QName::new(ns::PM, "Unit"), unit);
        }
        DescriptorPayload::AlertSystem { self_check_period } => {
            if let Some(period) = self_check_period {
                w.attr("SelfCheckPeriod", &format_xsd_duration(*period));
            }
            encode_type(w, descriptor);
        }
        DescriptorPayload::AlertCondition {
            kind,
            priority,
            sources,
        } => {
            w.attr("Kind", kind.as_str());
            w.attr("Priority", priority.as_str());
            encode_type(w, descriptor);
            for source in sources {
                w.leaf(QName::new(ns::PM, "Source"), source);
            }
        }
        DescriptorPayload::AlertSignal {
            condition_signaled,
            manifestation,
            latching,
        } => {
            if let Some(condition) = condition_signaled {
                w.attr("ConditionSignaled", condition);
            }
            w.attr("Manifestation", manifestation.as_str());
            w.attr("Latching", if *latching { "true" } else { "false" });
            encode_type(w, descriptor);
        }
        DescriptorPayload::Operation {
            operation_target, ..
        } => {
            w.attr("OperationTarget", operation_target);
            encode_type(w, descriptor);
        }
        // Plain components carry only the shared header.
        DescriptorPayload::Mds
        | DescriptorPayload::Vmd
        | DescriptorPayload::Channel
        | DescriptorPayload::SystemContext
        | DescriptorPayload::PatientContext
        | DescriptorPayload::LocationContext
        | DescriptorPayload::EnsembleContext
        | DescriptorPayload::Sco
        | DescriptorPayload::Battery
        | DescriptorPayload::Clock => {
            encode_type(w, descriptor);
        }
    }
}

fn encode_type(w: &mut XmlWriter, descriptor: &Descriptor) {
    if let Some(type_code) = &descriptor.type_code {
        encode_coded_value(w, QName::new(ns::PM, "Type"), type_code);
    }
}

pub(crate) fn encode_coded_value(w: &mut XmlWriter, element: QName, value: &CodedValue) {
    w.open(element);
    w.attr("Code", &value.code);
    if let Some(system) = &value.coding_system {
        w.attr("CodingSystem", system);
    }
    if let Some(version) = &value.coding_system_version {
        w.attr("CodingSystemVersion", version);
    }
    w.close();
}

pub(crate) fn decode_coded_value(node: Node<'_, '_>) -> Result<CodedValue> {
    Ok(CodedValue {
        code: reader::require_attr(node, "Code")?.to_string(),
        coding_system: node.attribute("CodingSystem").map(str::to_string),
        coding_system_version: node.attribute("CodingSystemVersion").map(str::to_string),
    })
}

/// Decode one descriptor element. `keep_source` preserves the element's
/// source text for later re-emission; the caller decides based on
/// [`super::uses_canonical_prefixes`]. Parent linkage is the caller's job
/// (nesting or `@ParentDescriptor`).
pub fn decode_descriptor(node: Node<'_, '_>, input: &str, keep_source: bool) -> Result<Descriptor> {
    let kind = resolve_kind(node)?;
    let handle = reader::require_attr(node, "Handle")?.to_string();
    let version = reader::attr_u64(node, "DescriptorVersion")?.unwrap_or(0);
    let safety = match node.attribute("SafetyClassification") {
        Some(token) => SafetyClassification::parse(token)
            .ok_or_else(|| Error::Xml(format!("bad SafetyClassification '{}'", token)))?,
        None => SafetyClassification::Informational,
    };
    let type_code = match reader::child(node, ns::PM, "Type") {
        Some(type_node) => Some(decode_coded_value(type_node)?),
        None => None,
    };

    let payload = decode_payload(node, kind)?;

    Ok(Descriptor {
        handle,
        parent: None,
        version,
        type_code,
        safety,
        payload,
        source_xml: keep_source.then(|| Arc::from(reader::source_slice(node, input))),
    })
}

fn resolve_kind(node: Node<'_, '_>) -> Result<DescriptorKind> {
    if let Some((uri, local)) = reader::xsi_type(node)? {
        if uri != ns::PM {
            return Err(Error::Xml(format!("xsi:type outside pm namespace: {}", local)));
        }
        return DescriptorKind::from_type_name(local)
            .ok_or_else(|| Error::Xml(format!("unknown descriptor type '{}'", local)));
    }
    kind_from_element(node.tag_name().name()).ok_or_else(|| {
        Error::Xml(format!(
            "<{}> needs an xsi:type",
            node.tag_name().name()
        ))
    })
}

fn decode_payload(node: Node<'_, '_>, kind: DescriptorKind) -> Result<DescriptorPayload> {
    Ok(match kind {
        DescriptorKind::Mds => DescriptorPayload::Mds,
        DescriptorKind::Vmd => DescriptorPayload::Vmd,
        DescriptorKind::Channel => DescriptorPayload::Channel,
        DescriptorKind::SystemContext => DescriptorPayload::SystemContext,
        DescriptorKind::PatientContext => DescriptorPayload::PatientContext,
        DescriptorKind::LocationContext => DescriptorPayload::LocationContext,
        DescriptorKind::EnsembleContext => DescriptorPayload::EnsembleContext,
        DescriptorKind::Sco => DescriptorPayload::Sco,
        DescriptorKind::Battery => DescriptorPayload::Battery,
        DescriptorKind::Clock => DescriptorPayload::Clock,
        DescriptorKind::NumericMetric => DescriptorPayload::NumericMetric {
            unit: decode_unit(node)?,
            resolution: reader::attr_f64(node, "Resolution")?.unwrap_or(1.0),
            category: decode_category(node)?,
            availability: decode_availability(node)?,
        },
        DescriptorKind::StringMetric => DescriptorPayload::StringMetric {
            unit: decode_unit(node)?,
            category: decode_category(node)?,
            availability: decode_availability(node)?,
        },
        DescriptorKind::EnumStringMetric => DescriptorPayload::EnumStringMetric {
            unit: decode_unit(node)?,
            category: decode_category(node)?,
            availability: decode_availability(node)?,
            allowed_values: reader::children(node, ns::PM, "AllowedValue")
                .into_iter()
                .filter_map(|allowed| reader::child(allowed, ns::PM, "Value"))
                .map(|value| reader::text(value).to_string())
                .collect(),
        },
        DescriptorKind::RealTimeSampleArrayMetric => DescriptorPayload::RealTimeSampleArrayMetric {
            unit: decode_unit(node)?,
            resolution: reader::attr_f64(node, "Resolution")?.unwrap_or(1.0),
            category: decode_category(node)?,
            availability: decode_availability(node)?,
            sample_period: decode_duration_attr(node, "SamplePeriod")?
                .unwrap_or(Duration::from_millis(10)),
        },
        DescriptorKind::AlertSystem => DescriptorPayload::AlertSystem {
            self_check_period: decode_duration_attr(node, "SelfCheckPeriod")?,
        },
        DescriptorKind::AlertCondition => DescriptorPayload::AlertCondition {
            kind: match node.attribute("Kind") {
                Some(token) => AlertConditionKind::parse(token)
                    .ok_or_else(|| Error::Xml(format!("bad alert Kind '{}'", token)))?,
                None => AlertConditionKind::Other,
            },
            priority: match node.attribute("Priority") {
                Some(token) => AlertConditionPriority::parse(token)
                    .ok_or_else(|| Error::Xml(format!("bad Priority '{}'", token)))?,
                None => AlertConditionPriority::None,
            },
            sources: reader::children(node, ns::PM, "Source")
                .into_iter()
                .map(|source| reader::text(source).to_string())
                .collect(),
        },
        DescriptorKind::AlertSignal => DescriptorPayload::AlertSignal {
            condition_signaled: node.attribute("ConditionSignaled").map(str::to_string),
            manifestation: match node.attribute("Manifestation") {
                Some(token) => AlertSignalManifestation::parse(token)
                    .ok_or_else(|| Error::Xml(format!("bad Manifestation '{}'", token)))?,
                None => AlertSignalManifestation::Other,
            },
            latching: reader::attr_bool(node, "Latching")?.unwrap_or(false),
        },
        DescriptorKind::Operation(op) => DescriptorPayload::Operation {
            kind: op,
            operation_target: reader::require_attr(node, "OperationTarget")?.to_string(),
        },
    })
}

fn decode_unit(node: Node<'_, '_>) -> Result<CodedValue> {
    decode_coded_value(reader::require_child(node, ns::PM, "Unit")?)
}

fn decode_category(node: Node<'_, '_>) -> Result<MetricCategory> {
    match node.attribute("MetricCategory") {
        Some(token) => MetricCategory::parse(token)
            .ok_or_else(|| Error::Xml(format!("bad MetricCategory '{}'", token))),
        None => Ok(MetricCategory::Unspecified),
    }
}

fn decode_availability(node: Node<'_, '_>) -> Result<MetricAvailability> {
    match node.attribute("MetricAvailability") {
        Some(token) => MetricAvailability::parse(token)
            .ok_or_else(|| Error::Xml(format!("bad MetricAvailability '{}'", token))),
        None => Ok(MetricAvailability::Continuous),
    }
}

fn decode_duration_attr(node: Node<'_, '_>, name: &str) -> Result<Option<Duration>> {
    match node.attribute(name) {
        None => Ok(None),
        Some(raw) => parse_xsd_duration(raw)
            .map(Some)
            .ok_or_else(|| Error::Xml(format!("@{}='{}' is not a duration", name, raw))),
    }
}
