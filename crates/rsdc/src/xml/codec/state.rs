// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State and context-state encode/decode.

use std::sync::Arc;

use roxmltree::Node;

use crate::biceps::qname::{ns, QName};
use crate::biceps::{
    AlertActivation, AlertSignalPresence, ComponentActivation, ContextAssociation, ContextPayload,
    ContextState, DescriptorKind, InstanceIdentifier, MeasurementValidity, MetricValue,
    OperatingMode, SampleArrayValue, Sex, State, StatePayload, StringMetricValue, Timestamp,
};
use crate::xml::reader;
use crate::xml::writer::XmlWriter;
use crate::{Error, Result};

use super::format_decimal;

/// Encode a single-state as `element`, dispatching `xsi:type` from the
/// payload. Re-emits preserved source text when still valid.
pub fn encode_state(w: &mut XmlWriter, element: QName, state: &State) {
    if let Some(source) = &state.source_xml {
        w.raw(source);
        return;
    }

    let descriptor_kind = state.payload.descriptor_kind();
    w.open(element);
    w.attr_qname(
        "xsi:type",
        QName::new(ns::PM, descriptor_kind.state_type_name()),
    );
    w.attr("DescriptorHandle", &state.descriptor_handle);
    if state.version > 0 {
        w.attr("StateVersion", &state.version.to_string());
    }
    if state.descriptor_version > 0 {
        w.attr("DescriptorVersion", &state.descriptor_version.to_string());
    }

    match &state.payload {
        StatePayload::Mds { activation }
        | StatePayload::Vmd { activation }
        | StatePayload::Channel { activation }
        | StatePayload::SystemContext { activation }
        | StatePayload::Battery { activation }
        | StatePayload::Clock { activation }
        | StatePayload::Sco { activation } => {
            w.attr("ActivationState", activation.as_str());
        }
        StatePayload::NumericMetric { activation, value } => {
            w.attr("ActivationState", activation.as_str());
            if let Some(value) = value {
                encode_metric_value(w, value);
            }
        }
        StatePayload::StringMetric { activation, value }
        | StatePayload::EnumStringMetric { activation, value } => {
            w.attr("ActivationState", activation.as_str());
            if let Some(value) = value {
                encode_string_value(w, value);
            }
        }
        StatePayload::RealTimeSampleArrayMetric { activation, value } => {
            w.attr("ActivationState", activation.as_str());
            if let Some(value) = value {
                encode_sample_array(w, value);
            }
        }
        StatePayload::AlertSystem {
            activation,
            last_self_check,
        } => {
            w.attr("ActivationState", activation.as_str());
            if let Some(stamp) = last_self_check {
                w.attr("LastSelfCheck", &stamp.0.to_string());
            }
        }
        StatePayload::AlertCondition {
            activation,
            presence,
            determination_time,
        } => {
            w.attr("ActivationState", activation.as_str());
            w.attr("Presence", if *presence { "true" } else { "false" });
            if let Some(stamp) = determination_time {
                w.attr("DeterminationTime", &stamp.0.to_string());
            }
        }
        StatePayload::AlertSignal {
            activation,
            presence,
        } => {
            w.attr("ActivationState", activation.as_str());
            w.attr("Presence", presence.as_str());
        }
        StatePayload::Operation { operating_mode, .. } => {
            w.attr("OperatingMode", operating_mode.as_str());
        }
    }

    w.close();
}

fn encode_metric_value(w: &mut XmlWriter, value: &MetricValue) {
    w.open(QName::new(ns::PM, "MetricValue"));
    if let Some(v) = value.value {
        w.attr("Value", &format_decimal(v));
    }
    if let Some(stamp) = value.determination_time {
        w.attr("DeterminationTime", &stamp.0.to_string());
    }
    encode_quality(w, value.validity);
    w.close();
}

fn encode_string_value(w: &mut XmlWriter, value: &StringMetricValue) {
    w.open(QName::new(ns::PM, "MetricValue"));
    if let Some(v) = &value.value {
        w.attr("Value", v);
    }
    if let Some(stamp) = value.determination_time {
        w.attr("DeterminationTime", &stamp.0.to_string());
    }
    encode_quality(w, value.validity);
    w.close();
}

fn encode_sample_array(w: &mut XmlWriter, value: &SampleArrayValue) {
    w.open(QName::new(ns::PM, "MetricValue"));
    if !value.samples.is_empty() {
        let joined = value
            .samples
            .iter()
            .map(|s| format_decimal(*s))
            .collect::<Vec<_>>()
            .join(" ");
        w.attr("Samples", &joined);
    }
    if let Some(stamp) = value.determination_time {
        w.attr("DeterminationTime", &stamp.0.to_string());
    }
    encode_quality(w, value.validity);
    w.close();
}

fn encode_quality(w: &mut XmlWriter, validity: MeasurementValidity) {
    w.open(QName::new(ns::PM, "MetricQuality"));
    w.attr("Validity", validity.as_str());
    w.close();
}

/// Decode a single-state element; the state kind comes from `xsi:type`.
pub fn decode_state(node: Node<'_, '_>, input: &str, keep_source: bool) -> Result<State> {
    let Some((uri, local)) = reader::xsi_type(node)? else {
        return Err(Error::Xml(format!(
            "<{}> state needs an xsi:type",
            node.tag_name().name()
        )));
    };
    if uri != ns::PM {
        return Err(Error::Xml(format!("xsi:type outside pm namespace: {}", local)));
    }
    let descriptor_kind = descriptor_kind_for_state_type(local)
        .ok_or_else(|| Error::Xml(format!("unknown state type '{}'", local)))?;

    let descriptor_handle = reader::require_attr(node, "DescriptorHandle")?.to_string();
    let version = reader::attr_u64(node, "StateVersion")?.unwrap_or(0);
    let descriptor_version = reader::attr_u64(node, "DescriptorVersion")?.unwrap_or(0);
    let payload = decode_payload(node, descriptor_kind)?;

    Ok(State {
        descriptor_handle,
        version,
        descriptor_version,
        payload,
        source_xml: keep_source.then(|| Arc::from(reader::source_slice(node, input))),
    })
}

fn descriptor_kind_for_state_type(local: &str) -> Option<DescriptorKind> {
    // State type names are <DescriptorStem>State, descriptor type names
    // <DescriptorStem>Descriptor; operations included.
    let stem = local.strip_suffix("State")?;
    DescriptorKind::from_type_name(&format!("{}Descriptor", stem))
}

fn decode_payload(node: Node<'_, '_>, kind: DescriptorKind) -> Result<StatePayload> {
    Ok(match kind {
        DescriptorKind::Mds => StatePayload::Mds {
            activation: decode_activation(node)?,
        },
        DescriptorKind::Vmd => StatePayload::Vmd {
            activation: decode_activation(node)?,
        },
        DescriptorKind::Channel => StatePayload::Channel {
            activation: decode_activation(node)?,
        },
        DescriptorKind::SystemContext => StatePayload::SystemContext {
            activation: decode_activation(node)?,
        },
        DescriptorKind::Battery => StatePayload::Battery {
            activation: decode_activation(node)?,
        },
        DescriptorKind::Clock => StatePayload::Clock {
            activation: decode_activation(node)?,
        },
        DescriptorKind::Sco => StatePayload::Sco {
            activation: decode_activation(node)?,
        },
        DescriptorKind::NumericMetric => StatePayload::NumericMetric {
            activation: decode_activation(node)?,
            value: decode_metric_value(node)?,
        },
        DescriptorKind::StringMetric => StatePayload::StringMetric {
            activation: decode_activation(node)?,
            value: decode_string_value(node)?,
        },
        DescriptorKind::EnumStringMetric => StatePayload::EnumStringMetric {
            activation: decode_activation(node)?,
            value: decode_string_value(node)?,
        },
        DescriptorKind::RealTimeSampleArrayMetric => StatePayload::RealTimeSampleArrayMetric {
            activation: decode_activation(node)?,
            value: decode_sample_array(node)?,
        },
        DescriptorKind::AlertSystem => StatePayload::AlertSystem {
            activation: decode_alert_activation(node)?,
            last_self_check: decode_timestamp(node, "LastSelfCheck")?,
        },
        DescriptorKind::AlertCondition => StatePayload::AlertCondition {
            activation: decode_alert_activation(node)?,
            presence: reader::attr_bool(node, "Presence")?.unwrap_or(false),
            determination_time: decode_timestamp(node, "DeterminationTime")?,
        },
        DescriptorKind::AlertSignal => StatePayload::AlertSignal {
            activation: decode_alert_activation(node)?,
            presence: match node.attribute("Presence") {
                Some(token) => AlertSignalPresence::parse(token)
                    .ok_or_else(|| Error::Xml(format!("bad Presence '{}'", token)))?,
                None => AlertSignalPresence::Off,
            },
        },
        DescriptorKind::Operation(op) => StatePayload::Operation {
            kind: op,
            operating_mode: match node.attribute("OperatingMode") {
                Some(token) => OperatingMode::parse(token)
                    .ok_or_else(|| Error::Xml(format!("bad OperatingMode '{}'", token)))?,
                None => OperatingMode::Enabled,
            },
        },
        DescriptorKind::PatientContext
        | DescriptorKind::LocationContext
        | DescriptorKind::EnsembleContext => {
            return Err(Error::Xml(
                "context states decode through decode_context_state".to_string(),
            ))
        }
    })
}

fn decode_activation(node: Node<'_, '_>) -> Result<ComponentActivation> {
    match node.attribute("ActivationState") {
        Some(token) => ComponentActivation::parse(token)
            .ok_or_else(|| Error::Xml(format!("bad ActivationState '{}'", token))),
        None => Ok(ComponentActivation::On),
    }
}

fn decode_alert_activation(node: Node<'_, '_>) -> Result<AlertActivation> {
    match node.attribute("ActivationState") {
        Some(token) => AlertActivation::parse(token)
            .ok_or_else(|| Error::Xml(format!("bad ActivationState '{}'", token))),
        None => Ok(AlertActivation::On),
    }
}

fn decode_timestamp(node: Node<'_, '_>, name: &str) -> Result<Option<Timestamp>> {
    Ok(reader::attr_u64(node, name)?.map(Timestamp))
}

fn decode_quality(node: Node<'_, '_>) -> Result<MeasurementValidity> {
    let Some(quality) = reader::child(node, ns::PM, "MetricQuality") else {
        return Ok(MeasurementValidity::Valid);
    };
    match quality.attribute("Validity") {
        Some(token) => MeasurementValidity::parse(token)
            .ok_or_else(|| Error::Xml(format!("bad Validity '{}'", token))),
        None => Ok(MeasurementValidity::Valid),
    }
}

fn decode_metric_value(node: Node<'_, '_>) -> Result<Option<MetricValue>> {
    let Some(value_node) = reader::child(node, ns::PM, "MetricValue") else {
        return Ok(None);
    };
    Ok(Some(MetricValue {
        value: reader::attr_f64(value_node, "Value")?,
        validity: decode_quality(value_node)?,
        determination_time: decode_timestamp(value_node, "DeterminationTime")?,
    }))
}

fn decode_string_value(node: Node<'_, '_>) -> Result<Option<StringMetricValue>> {
    let Some(value_node) = reader::child(node, ns::PM, "MetricValue") else {
        return Ok(None);
    };
    Ok(Some(StringMetricValue {
        value: value_node.attribute("Value").map(str::to_string),
        validity: decode_quality(value_node)?,
        determination_time: decode_timestamp(value_node, "DeterminationTime")?,
    }))
}

fn decode_sample_array(node: Node<'_, '_>) -> Result<Option<SampleArrayValue>> {
    let Some(value_node) = reader::child(node, ns::PM, "MetricValue") else {
        return Ok(None);
    };
    let samples = match value_node.attribute("Samples") {
        None => Vec::new(),
        Some(raw) => raw
            .split_ascii_whitespace()
            .map(|token| {
                token
                    .parse::<f64>()
                    .map_err(|_| Error::Xml(format!("bad sample '{}'", token)))
            })
            .collect::<Result<Vec<_>>>()?,
    };
    Ok(Some(SampleArrayValue {
        samples,
        validity: decode_quality(value_node)?,
        determination_time: decode_timestamp(value_node, "DeterminationTime")?,
    }))
}

// ---------------------------------------------------------------- contexts

/// Encode a context state as `element`.
pub fn encode_context_state(w: &mut XmlWriter, element: QName, state: &ContextState) {
    if let Some(source) = &state.source_xml {
        w.raw(source);
        return;
    }

    let type_name = match &state.payload {
        ContextPayload::Patient { .. } => "PatientContextState",
        ContextPayload::Location { .. } => "LocationContextState",
        ContextPayload::Ensemble => "EnsembleContextState",
    };
    w.open(element);
    w.attr_qname("xsi:type", QName::new(ns::PM, type_name));
    w.attr("Handle", &state.handle);
    w.attr("DescriptorHandle", &state.descriptor_handle);
    if state.version > 0 {
        w.attr("StateVersion", &state.version.to_string());
    }
    if state.descriptor_version > 0 {
        w.attr("DescriptorVersion", &state.descriptor_version.to_string());
    }
    w.attr("ContextAssociation", state.association.as_str());
    if let Some(version) = state.binding_mdib_version {
        w.attr("BindingMdibVersion", &version.to_string());
    }
    if let Some(version) = state.unbinding_mdib_version {
        w.attr("UnbindingMdibVersion", &version.to_string());
    }

    for identification in &state.identifications {
        encode_instance_identifier(w, QName::new(ns::PM, "Identification"), identification);
    }
    for validator in &state.validators {
        encode_instance_identifier(w, QName::new(ns::PM, "Validator"), validator);
    }

    match &state.payload {
        ContextPayload::Patient {
            given_name,
            family_name,
            sex,
            date_of_birth,
        } => {
            w.open(QName::new(ns::PM, "CoreData"));
            if let Some(name) = given_name {
                w.leaf(QName::new(ns::PM, "Givenname"), name);
            }
            if let Some(name) = family_name {
                w.leaf(QName::new(ns::PM, "Familyname"), name);
            }
            if let Some(sex) = sex {
                w.leaf(QName::new(ns::PM, "Sex"), sex.as_str());
            }
            if let Some(dob) = date_of_birth {
                w.leaf(QName::new(ns::PM, "DateOfBirth"), dob);
            }
            w.close();
        }
        ContextPayload::Location {
            point_of_care,
            facility,
            building,
            floor,
            room,
            bed,
        } => {
            w.open(QName::new(ns::PM, "LocationDetail"));
            if let Some(poc) = point_of_care {
                w.attr("PoC", poc);
            }
            if let Some(facility) = facility {
                w.attr("Facility", facility);
            }
            if let Some(building) = building {
                w.attr("Building", building);
            }
            if let Some(floor) = floor {
                w.attr("Floor", floor);
            }
            if let Some(room) = room {
                w.attr("Room", room);
            }
            if let Some(bed) = bed {
                w.attr("Bed", bed);
            }
            w.close();
        }
        ContextPayload::Ensemble => {}
    }

    w.close();
}

fn encode_instance_identifier(w: &mut XmlWriter, element: QName, id: &InstanceIdentifier) {
    w.open(element);
    if let Some(root) = &id.root {
        w.attr("Root", root);
    }
    if let Some(extension) = &id.extension {
        w.attr("Extension", extension);
    }
    w.close();
}

/// Decode a context state element; the context kind comes from `xsi:type`.
pub fn decode_context_state(
    node: Node<'_, '_>,
    input: &str,
    keep_source: bool,
) -> Result<ContextState> {
    let Some((uri, local)) = reader::xsi_type(node)? else {
        return Err(Error::Xml("context state needs an xsi:type".to_string()));
    };
    if uri != ns::PM {
        return Err(Error::Xml(format!("xsi:type outside pm namespace: {}", local)));
    }

    let payload = match local {
        "PatientContextState" => {
            let core = reader::child(node, ns::PM, "CoreData");
            let leaf_text = |name: &str| {
                core.and_then(|c| reader::child(c, ns::PM, name))
                    .map(|n| reader::text(n).to_string())
            };
            ContextPayload::Patient {
                given_name: leaf_text("Givenname"),
                family_name: leaf_text("Familyname"),
                sex: match leaf_text("Sex") {
                    Some(token) => Some(
                        Sex::parse(&token)
                            .ok_or_else(|| Error::Xml(format!("bad Sex '{}'", token)))?,
                    ),
                    None => None,
                },
                date_of_birth: leaf_text("DateOfBirth"),
            }
        }
        "LocationContextState" => {
            let detail = reader::child(node, ns::PM, "LocationDetail");
            let attr = |name: &str| {
                detail
                    .and_then(|d| d.attribute(name))
                    .map(str::to_string)
            };
            ContextPayload::Location {
                point_of_care: attr("PoC"),
                facility: attr("Facility"),
                building: attr("Building"),
                floor: attr("Floor"),
                room: attr("Room"),
                bed: attr("Bed"),
            }
        }
        "EnsembleContextState" => ContextPayload::Ensemble,
        other => return Err(Error::Xml(format!("unknown context state type '{}'", other))),
    };

    let association = match node.attribute("ContextAssociation") {
        Some(token) => ContextAssociation::parse(token)
            .ok_or_else(|| Error::Xml(format!("bad ContextAssociation '{}'", token)))?,
        None => ContextAssociation::NotAssociated,
    };

    let decode_ids = |name: &str| -> Vec<InstanceIdentifier> {
        reader::children(node, ns::PM, name)
            .into_iter()
            .map(|id| InstanceIdentifier {
                root: id.attribute("Root").map(str::to_string),
                extension: id.attribute("Extension").map(str::to_string),
            })
            .collect()
    };

    Ok(ContextState {
        handle: reader::require_attr(node, "Handle")?.to_string(),
        descriptor_handle: reader::require_attr(node, "DescriptorHandle")?.to_string(),
        version: reader::attr_u64(node, "StateVersion")?.unwrap_or(0),
        descriptor_version: reader::attr_u64(node, "DescriptorVersion")?.unwrap_or(0),
        association,
        binding_mdib_version: reader::attr_u64(node, "BindingMdibVersion")?,
        unbinding_mdib_version: reader::attr_u64(node, "UnbindingMdibVersion")?,
        identifications: decode_ids("Identification"),
        validators: decode_ids("Validator"),
        payload,
        source_xml: keep_source.then(|| Arc::from(reader::source_slice(node, input))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::OperationKind;

    fn wrap(inner: &str) -> String {
        format!(
            r#"<root xmlns:pm="{}" xmlns:msg="{}" xmlns:xsi="{}">{}</root>"#,
            ns::PM,
            ns::MSG,
            ns::XSI,
            inner
        )
    }

    fn state_roundtrip(state: &State) -> State {
        let mut w = XmlWriter::new();
        encode_state(&mut w, QName::new(ns::MSG, "MetricState"), state);
        let xml = wrap(&w.finish());
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let node = doc.root_element().first_element_child().unwrap();
        decode_state(node, &xml, false).unwrap()
    }

    #[test]
    fn test_numeric_state_roundtrip() {
        let mut state = State::new(
            "hr.num",
            StatePayload::NumericMetric {
                activation: ComponentActivation::On,
                value: Some(MetricValue {
                    value: Some(72.0),
                    validity: MeasurementValidity::Valid,
                    determination_time: Some(Timestamp(1_700_000_000_000)),
                }),
            },
        );
        state.version = 5;
        state.descriptor_version = 1;
        let decoded = state_roundtrip(&state);
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_sample_array_roundtrip() {
        let state = State::new(
            "ecg.rtsa",
            StatePayload::RealTimeSampleArrayMetric {
                activation: ComponentActivation::On,
                value: Some(SampleArrayValue {
                    samples: vec![0.0, 0.25, -0.25, 1.0],
                    validity: MeasurementValidity::Valid,
                    determination_time: Some(Timestamp(42)),
                }),
            },
        );
        let decoded = state_roundtrip(&state);
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_operation_state_roundtrip() {
        let state = State::new(
            "op.set_hr",
            StatePayload::Operation {
                kind: OperationKind::SetValue,
                operating_mode: OperatingMode::Enabled,
            },
        );
        let decoded = state_roundtrip(&state);
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_alert_condition_roundtrip() {
        let state = State::new(
            "ac0",
            StatePayload::AlertCondition {
                activation: AlertActivation::On,
                presence: true,
                determination_time: Some(Timestamp(1_700_000_000_123)),
            },
        );
        let decoded = state_roundtrip(&state);
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_context_state_roundtrip() {
        let mut state = ContextState::new(
            "pat.1",
            "pat",
            ContextPayload::Patient {
                given_name: Some("Anna".into()),
                family_name: Some("Nyberg".into()),
                sex: Some(Sex::Female),
                date_of_birth: Some("1980-05-04".into()),
            },
        );
        state.version = 2;
        state.association = ContextAssociation::Associated;
        state.binding_mdib_version = Some(17);
        state.identifications.push(InstanceIdentifier {
            root: Some("urn:oid:1.2.3".into()),
            extension: Some("MRN-1".into()),
        });

        let mut w = XmlWriter::new();
        encode_context_state(&mut w, QName::new(ns::MSG, "ContextState"), &state);
        let xml = wrap(&w.finish());
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let node = doc.root_element().first_element_child().unwrap();
        let decoded = decode_context_state(node, &xml, false).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_location_context_roundtrip() {
        let state = ContextState::new(
            "loc.1",
            "loc",
            ContextPayload::Location {
                point_of_care: Some("ICU".into()),
                facility: Some("H1".into()),
                building: None,
                floor: Some("1".into()),
                room: Some("101".into()),
                bed: Some("A".into()),
            },
        );
        let mut w = XmlWriter::new();
        encode_context_state(&mut w, QName::new(ns::MSG, "ContextState"), &state);
        let xml = wrap(&w.finish());
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let node = doc.root_element().first_element_child().unwrap();
        let decoded = decode_context_state(node, &xml, false).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_state_without_type_is_error() {
        let xml = wrap(r#"<msg:MetricState DescriptorHandle="hr.num"/>"#);
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let node = doc.root_element().first_element_child().unwrap();
        assert!(decode_state(node, &xml, false).is_err());
    }

    #[test]
    fn test_absent_metric_value() {
        let state = State::new(
            "hr.num",
            StatePayload::NumericMetric {
                activation: ComponentActivation::Off,
                value: None,
            },
        );
        let decoded = state_roundtrip(&state);
        assert_eq!(decoded, state);
    }
}
