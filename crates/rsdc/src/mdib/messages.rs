// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! BICEPS message bodies that carry MDIB content: the get-service
//! responses and every report shape, in both directions.

use std::sync::Arc;

use roxmltree::Node;

use crate::biceps::qname::{ns, QName};
use crate::biceps::{
    actions, ContextState, Descriptor, Handle, InvocationError, InvocationState, State,
};
use crate::ident::Uuid;
use crate::mdib::changeset::ChangeSet;
use crate::mdib::store::{MdibSnapshot, SnapshotBuilder};
use crate::xml::codec::{
    containment_element, decode_context_state, decode_descriptor, decode_state,
    encode_context_state, encode_descriptor, encode_descriptor_open, encode_state,
    uses_canonical_prefixes,
};
use crate::xml::{reader, XmlWriter};
use crate::{Error, Result};

fn stamp_mdib_attrs(w: &mut XmlWriter, snapshot: &MdibSnapshot) {
    w.attr("MdibVersion", &snapshot.mdib_version.to_string());
    w.attr("SequenceId", &snapshot.sequence_id.to_urn());
    if let Some(instance_id) = snapshot.instance_id {
        w.attr("InstanceId", &instance_id.to_string());
    }
}

fn in_filter(filter: Option<&[Handle]>, handle: &str) -> bool {
    filter.map_or(true, |handles| handles.iter().any(|h| h == handle))
}

/// Encode the descriptor tree (`msg:MdDescription`), nested in containment
/// order. With a filter, only the subtrees rooted at matching handles are
/// included.
fn encode_md_description(w: &mut XmlWriter, snapshot: &MdibSnapshot, filter: Option<&[Handle]>) {
    w.open(QName::new(ns::MSG, "MdDescription"));
    for root in snapshot.roots() {
        encode_subtree(w, snapshot, root, filter, filter.is_none());
    }
    w.close();
}

fn encode_subtree(
    w: &mut XmlWriter,
    snapshot: &MdibSnapshot,
    handle: &str,
    filter: Option<&[Handle]>,
    mut included: bool,
) {
    let Some(descriptor) = snapshot.get_descriptor(handle) else {
        return;
    };
    included = included || in_filter(filter, handle);
    if !included {
        for child in snapshot.children_of(handle) {
            encode_subtree(w, snapshot, child, filter, false);
        }
        return;
    }

    let element = containment_element(descriptor.kind());
    if snapshot.children_of(handle).is_empty() {
        // Leaves go through the preserving encoder.
        encode_descriptor(w, element, descriptor);
    } else {
        encode_descriptor_open(w, element, descriptor);
        for child in snapshot.children_of(handle) {
            encode_subtree(w, snapshot, child, filter, true);
        }
        w.close();
    }
}

/// Encode the state table (`msg:MdState`). Context states match the filter
/// by their own or their descriptor handle.
fn encode_md_state(w: &mut XmlWriter, snapshot: &MdibSnapshot, filter: Option<&[Handle]>) {
    w.open(QName::new(ns::MSG, "MdState"));
    for root in snapshot.roots() {
        for handle in snapshot.subtree(root) {
            if let Some(state) = snapshot.get_state(&handle) {
                if in_filter(filter, &handle) {
                    encode_state(w, QName::new(ns::PM, "State"), state);
                }
            }
            for context in snapshot.context_states_of(&handle) {
                if in_filter(filter, &context.handle) || in_filter(filter, &handle) {
                    encode_context_state(w, QName::new(ns::PM, "State"), &context);
                }
            }
        }
    }
    w.close();
}

/// `msg:GetMdibResponse` body.
pub fn encode_get_mdib_response(snapshot: &MdibSnapshot) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "GetMdibResponse"));
    stamp_mdib_attrs(&mut w, snapshot);
    w.open(QName::new(ns::MSG, "Mdib"));
    stamp_mdib_attrs(&mut w, snapshot);
    encode_md_description(&mut w, snapshot, None);
    encode_md_state(&mut w, snapshot, None);
    w.close();
    w.close();
    w.finish()
}

/// `msg:GetMdDescriptionResponse` body (optional handle filter).
pub fn encode_get_md_description_response(
    snapshot: &MdibSnapshot,
    filter: Option<&[Handle]>,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "GetMdDescriptionResponse"));
    stamp_mdib_attrs(&mut w, snapshot);
    encode_md_description(&mut w, snapshot, filter);
    w.close();
    w.finish()
}

/// `msg:GetMdStateResponse` body (optional handle filter).
pub fn encode_get_md_state_response(snapshot: &MdibSnapshot, filter: Option<&[Handle]>) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "GetMdStateResponse"));
    stamp_mdib_attrs(&mut w, snapshot);
    encode_md_state(&mut w, snapshot, filter);
    w.close();
    w.finish()
}

/// `msg:GetContextStatesResponse` body.
pub fn encode_get_context_states_response(
    snapshot: &MdibSnapshot,
    filter: Option<&[Handle]>,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "GetContextStatesResponse"));
    stamp_mdib_attrs(&mut w, snapshot);
    for context in ordered_context_states(snapshot) {
        if in_filter(filter, &context.handle) || in_filter(filter, &context.descriptor_handle) {
            encode_context_state(&mut w, QName::new(ns::MSG, "ContextState"), &context);
        }
    }
    w.close();
    w.finish()
}

fn ordered_context_states(snapshot: &MdibSnapshot) -> Vec<Arc<ContextState>> {
    let mut out = Vec::new();
    for root in snapshot.roots() {
        for handle in snapshot.subtree(root) {
            out.extend(snapshot.context_states_of(&handle));
        }
    }
    out
}

/// `msg:GetContainmentTreeResponse` body: one entry per child of the
/// requested handles (or the roots when unfiltered).
pub fn encode_containment_tree_response(
    snapshot: &MdibSnapshot,
    filter: Option<&[Handle]>,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "GetContainmentTreeResponse"));
    stamp_mdib_attrs(&mut w, snapshot);
    w.open(QName::new(ns::MSG, "ContainmentTree"));
    let parents: Vec<Handle> = match filter {
        Some(handles) => handles.to_vec(),
        None => snapshot.roots().to_vec(),
    };
    for parent in parents {
        let children: Vec<&str> = match filter {
            Some(_) => snapshot.children_of(&parent).iter().map(String::as_str).collect(),
            None => vec![parent.as_str()],
        };
        for handle in children {
            if let Some(descriptor) = snapshot.get_descriptor(handle) {
                w.open(QName::new(ns::MSG, "Entry"));
                w.attr_qname(
                    "xsi:type",
                    QName::new(ns::PM, descriptor.kind().type_name()),
                );
                w.attr("HandleRef", handle);
                if let Some(mds) = find_mds(snapshot, handle) {
                    w.attr("ParentMds", &mds);
                }
                w.attr(
                    "ChildrenCount",
                    &snapshot.children_of(handle).len().to_string(),
                );
                w.close();
            }
        }
    }
    w.close();
    w.close();
    w.finish()
}

fn find_mds(snapshot: &MdibSnapshot, handle: &str) -> Option<Handle> {
    let mut current = handle.to_string();
    loop {
        let descriptor = snapshot.get_descriptor(&current)?;
        match &descriptor.parent {
            None => return Some(current),
            Some(parent) => current = parent.clone(),
        }
    }
}

/// `msg:GetDescriptorResponse` body for explicit handle lookups.
pub fn encode_get_descriptor_response(snapshot: &MdibSnapshot, handles: &[Handle]) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "GetDescriptorResponse"));
    stamp_mdib_attrs(&mut w, snapshot);
    for handle in handles {
        if let Some(descriptor) = snapshot.get_descriptor(handle) {
            encode_descriptor(&mut w, QName::new(ns::MSG, "Descriptor"), descriptor);
        }
    }
    w.close();
    w.finish()
}

// ------------------------------------------------------------------ reports

fn encode_state_report(
    element_local: &'static str,
    state_element: &'static str,
    states: &[Arc<State>],
    change: &ChangeSet,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, element_local));
    w.attr("MdibVersion", &change.mdib_version.to_string());
    w.attr("SequenceId", &change.sequence_id.to_urn());
    if let Some(instance_id) = change.instance_id {
        w.attr("InstanceId", &instance_id.to_string());
    }
    w.open(QName::new(ns::MSG, "ReportPart"));
    for state in states {
        encode_state(&mut w, QName::new(ns::MSG, state_element), state);
    }
    w.close();
    w.close();
    w.finish()
}

/// Build `(action, body)` pairs for every report a change-set produces.
pub fn build_reports(change: &ChangeSet) -> Vec<(&'static str, String)> {
    let mut out = Vec::new();

    if !change.descriptors.is_empty() {
        out.push((
            actions::DESCRIPTION_MODIFICATION_REPORT,
            encode_description_report(change),
        ));
    }
    if !change.metric_states.is_empty() {
        out.push((
            actions::EPISODIC_METRIC_REPORT,
            encode_state_report(
                "EpisodicMetricReport",
                "MetricState",
                &change.metric_states,
                change,
            ),
        ));
    }
    if !change.alert_states.is_empty() {
        out.push((
            actions::EPISODIC_ALERT_REPORT,
            encode_state_report(
                "EpisodicAlertReport",
                "AlertState",
                &change.alert_states,
                change,
            ),
        ));
    }
    if !change.component_states.is_empty() {
        out.push((
            actions::EPISODIC_COMPONENT_REPORT,
            encode_state_report(
                "EpisodicComponentReport",
                "ComponentState",
                &change.component_states,
                change,
            ),
        ));
    }
    if !change.operational_states.is_empty() {
        out.push((
            actions::EPISODIC_OPERATIONAL_STATE_REPORT,
            encode_state_report(
                "EpisodicOperationalStateReport",
                "OperationState",
                &change.operational_states,
                change,
            ),
        ));
    }
    if !change.context_states.is_empty() {
        out.push((actions::EPISODIC_CONTEXT_REPORT, encode_context_report(change)));
    }
    if !change.waveform_states.is_empty() {
        out.push((actions::WAVEFORM_STREAM, encode_waveform_stream(change)));
    }
    out
}

fn encode_description_report(change: &ChangeSet) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "DescriptionModificationReport"));
    w.attr("MdibVersion", &change.mdib_version.to_string());
    w.attr("SequenceId", &change.sequence_id.to_urn());

    let state_of = |handle: &str| {
        change
            .descriptors
            .states
            .iter()
            .find(|state| state.descriptor_handle == handle)
    };

    for descriptor in &change.descriptors.created {
        w.open(QName::new(ns::MSG, "ReportPart"));
        w.attr("ModificationType", "Crt");
        if let Some(parent) = &descriptor.parent {
            w.attr("ParentDescriptor", parent);
        }
        encode_descriptor(&mut w, QName::new(ns::MSG, "Descriptor"), descriptor);
        if let Some(state) = state_of(&descriptor.handle) {
            encode_state(&mut w, QName::new(ns::MSG, "State"), state);
        }
        w.close();
    }
    for descriptor in &change.descriptors.updated {
        w.open(QName::new(ns::MSG, "ReportPart"));
        w.attr("ModificationType", "Upt");
        if let Some(parent) = &descriptor.parent {
            w.attr("ParentDescriptor", parent);
        }
        encode_descriptor(&mut w, QName::new(ns::MSG, "Descriptor"), descriptor);
        if let Some(state) = state_of(&descriptor.handle) {
            encode_state(&mut w, QName::new(ns::MSG, "State"), state);
        }
        w.close();
    }
    if !change.descriptors.deleted.is_empty() {
        w.open(QName::new(ns::MSG, "ReportPart"));
        w.attr("ModificationType", "Del");
        for handle in &change.descriptors.deleted {
            w.leaf(QName::new(ns::MSG, "HandleRef"), handle);
        }
        w.close();
    }
    w.close();
    w.finish()
}

fn encode_context_report(change: &ChangeSet) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "EpisodicContextReport"));
    w.attr("MdibVersion", &change.mdib_version.to_string());
    w.attr("SequenceId", &change.sequence_id.to_urn());
    w.open(QName::new(ns::MSG, "ReportPart"));
    for state in &change.context_states {
        encode_context_state(&mut w, QName::new(ns::MSG, "ContextState"), state);
    }
    w.close();
    w.close();
    w.finish()
}

fn encode_waveform_stream(change: &ChangeSet) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "WaveformStream"));
    w.attr("MdibVersion", &change.mdib_version.to_string());
    w.attr("SequenceId", &change.sequence_id.to_urn());
    for state in &change.waveform_states {
        encode_state(&mut w, QName::new(ns::MSG, "State"), state);
    }
    w.close();
    w.finish()
}

/// Periodic report body for single-states of one bucket. Same shape as the
/// episodic reports, stamped with the current snapshot version.
pub fn encode_periodic_state_report(
    element_local: &'static str,
    state_element: &'static str,
    states: &[Arc<State>],
    snapshot: &MdibSnapshot,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, element_local));
    stamp_mdib_attrs(&mut w, snapshot);
    w.open(QName::new(ns::MSG, "ReportPart"));
    for state in states {
        encode_state(&mut w, QName::new(ns::MSG, state_element), state);
    }
    w.close();
    w.close();
    w.finish()
}

/// Periodic context report body.
pub fn encode_periodic_context_report(
    states: &[Arc<ContextState>],
    snapshot: &MdibSnapshot,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "PeriodicContextReport"));
    stamp_mdib_attrs(&mut w, snapshot);
    w.open(QName::new(ns::MSG, "ReportPart"));
    for state in states {
        encode_context_state(&mut w, QName::new(ns::MSG, "ContextState"), state);
    }
    w.close();
    w.close();
    w.finish()
}

/// One part of an OperationInvokedReport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationReportPart {
    pub operation_handle: Handle,
    pub transaction_id: u64,
    pub invocation_state: InvocationState,
    pub operation_target: Option<Handle>,
    pub error: Option<(InvocationError, String)>,
}

/// `msg:OperationInvokedReport` body.
pub fn encode_operation_invoked_report(
    mdib_version: u64,
    sequence_id: Uuid,
    part: &InvocationReportPart,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "OperationInvokedReport"));
    w.attr("MdibVersion", &mdib_version.to_string());
    w.attr("SequenceId", &sequence_id.to_urn());
    w.open(QName::new(ns::MSG, "ReportPart"));
    w.attr("OperationHandleRef", &part.operation_handle);
    if let Some(target) = &part.operation_target {
        w.attr("OperationTarget", target);
    }
    w.open(QName::new(ns::MSG, "InvocationInfo"));
    w.leaf(
        QName::new(ns::MSG, "TransactionId"),
        &part.transaction_id.to_string(),
    );
    w.leaf(
        QName::new(ns::MSG, "InvocationState"),
        part.invocation_state.as_str(),
    );
    if let Some((error, message)) = &part.error {
        w.leaf(QName::new(ns::MSG, "InvocationError"), error.as_str());
        w.open(QName::new(ns::MSG, "InvocationErrorMessage"));
        w.attr("xml:lang", "en");
        w.text(message);
        w.close();
    }
    w.close();
    w.close();
    w.close();
    w.finish()
}

/// `msg:SystemErrorReport` body.
pub fn encode_system_error_report(
    mdib_version: u64,
    sequence_id: Uuid,
    code: &str,
    text: &str,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, "SystemErrorReport"));
    w.attr("MdibVersion", &mdib_version.to_string());
    w.attr("SequenceId", &sequence_id.to_urn());
    w.open(QName::new(ns::MSG, "ReportPart"));
    w.open(QName::new(ns::MSG, "ErrorCode"));
    w.attr("Code", code);
    w.close();
    w.open(QName::new(ns::MSG, "ErrorInfo"));
    w.text(text);
    w.close();
    w.close();
    w.close();
    w.finish()
}

// ------------------------------------------------------------------ decode

/// A typed inbound report.
#[derive(Debug, Clone)]
pub enum Report {
    Description {
        created: Vec<Descriptor>,
        updated: Vec<Descriptor>,
        deleted: Vec<Handle>,
        states: Vec<State>,
    },
    Metric(Vec<State>),
    Alert(Vec<State>),
    Component(Vec<State>),
    Operational(Vec<State>),
    Context(Vec<ContextState>),
    Waveform(Vec<State>),
    OperationInvoked(Vec<InvocationReportPart>),
    SystemError {
        code: String,
        text: String,
    },
}

fn decode_states_in(
    body: Node<'_, '_>,
    element: &str,
    input: &str,
    keep_source: bool,
) -> Result<Vec<State>> {
    let mut states = Vec::new();
    for part in reader::children(body, ns::MSG, "ReportPart") {
        for node in reader::children(part, ns::MSG, element) {
            states.push(decode_state(node, input, keep_source)?);
        }
    }
    Ok(states)
}

/// Decode one report body by its action URI.
pub fn decode_report(action: &str, body: Node<'_, '_>, input: &str) -> Result<Report> {
    let doc = body.document();
    let keep_source = uses_canonical_prefixes(doc);
    Ok(match action {
        actions::EPISODIC_METRIC_REPORT | actions::PERIODIC_METRIC_REPORT => {
            Report::Metric(decode_states_in(body, "MetricState", input, keep_source)?)
        }
        actions::EPISODIC_ALERT_REPORT | actions::PERIODIC_ALERT_REPORT => {
            Report::Alert(decode_states_in(body, "AlertState", input, keep_source)?)
        }
        actions::EPISODIC_COMPONENT_REPORT | actions::PERIODIC_COMPONENT_REPORT => {
            Report::Component(decode_states_in(body, "ComponentState", input, keep_source)?)
        }
        actions::EPISODIC_OPERATIONAL_STATE_REPORT
        | actions::PERIODIC_OPERATIONAL_STATE_REPORT => Report::Operational(decode_states_in(
            body,
            "OperationState",
            input,
            keep_source,
        )?),
        actions::EPISODIC_CONTEXT_REPORT | actions::PERIODIC_CONTEXT_REPORT => {
            let mut states = Vec::new();
            for part in reader::children(body, ns::MSG, "ReportPart") {
                for node in reader::children(part, ns::MSG, "ContextState") {
                    states.push(decode_context_state(node, input, keep_source)?);
                }
            }
            Report::Context(states)
        }
        actions::WAVEFORM_STREAM => {
            let mut states = Vec::new();
            for node in reader::children(body, ns::MSG, "State") {
                states.push(decode_state(node, input, keep_source)?);
            }
            Report::Waveform(states)
        }
        actions::DESCRIPTION_MODIFICATION_REPORT => decode_description_report(body, input)?,
        actions::OPERATION_INVOKED_REPORT => {
            let mut parts = Vec::new();
            for part in reader::children(body, ns::MSG, "ReportPart") {
                parts.push(decode_invocation_part(part)?);
            }
            Report::OperationInvoked(parts)
        }
        actions::SYSTEM_ERROR_REPORT => {
            let part = reader::require_child(body, ns::MSG, "ReportPart")?;
            Report::SystemError {
                code: reader::child(part, ns::MSG, "ErrorCode")
                    .and_then(|node| node.attribute("Code"))
                    .unwrap_or_default()
                    .to_string(),
                text: reader::child(part, ns::MSG, "ErrorInfo")
                    .map(|node| reader::text(node).to_string())
                    .unwrap_or_default(),
            }
        }
        other => return Err(Error::UnknownAction(other.to_string())),
    })
}

fn decode_description_report(body: Node<'_, '_>, input: &str) -> Result<Report> {
    let keep_source = uses_canonical_prefixes(body.document());
    let mut created = Vec::new();
    let mut updated = Vec::new();
    let mut deleted = Vec::new();
    let mut states = Vec::new();

    for part in reader::children(body, ns::MSG, "ReportPart") {
        let modification = part.attribute("ModificationType").unwrap_or("Upt");
        match modification {
            "Del" => {
                for handle in reader::children(part, ns::MSG, "HandleRef") {
                    deleted.push(reader::text(handle).to_string());
                }
            }
            _ => {
                let parent = part.attribute("ParentDescriptor").map(str::to_string);
                for node in reader::children(part, ns::MSG, "Descriptor") {
                    let mut descriptor = decode_descriptor(node, input, keep_source)?;
                    descriptor.parent = parent.clone();
                    if modification == "Crt" {
                        created.push(descriptor);
                    } else {
                        updated.push(descriptor);
                    }
                }
                for node in reader::children(part, ns::MSG, "State") {
                    states.push(decode_state(node, input, keep_source)?);
                }
            }
        }
    }
    Ok(Report::Description {
        created,
        updated,
        deleted,
        states,
    })
}

fn decode_invocation_part(part: Node<'_, '_>) -> Result<InvocationReportPart> {
    let info = reader::require_child(part, ns::MSG, "InvocationInfo")?;
    let transaction_id = reader::text(reader::require_child(info, ns::MSG, "TransactionId")?)
        .parse::<u64>()
        .map_err(|_| Error::Xml("bad TransactionId".to_string()))?;
    let state_text = reader::text(reader::require_child(info, ns::MSG, "InvocationState")?);
    let invocation_state = InvocationState::parse(state_text)
        .ok_or_else(|| Error::Xml(format!("bad InvocationState '{}'", state_text)))?;
    let error = match reader::child(info, ns::MSG, "InvocationError") {
        Some(error_node) => {
            let token = reader::text(error_node);
            let error = InvocationError::parse(token)
                .ok_or_else(|| Error::Xml(format!("bad InvocationError '{}'", token)))?;
            let message = reader::child(info, ns::MSG, "InvocationErrorMessage")
                .map(|node| reader::text(node).to_string())
                .unwrap_or_default();
            Some((error, message))
        }
        None => None,
    };
    Ok(InvocationReportPart {
        operation_handle: reader::require_attr(part, "OperationHandleRef")?.to_string(),
        transaction_id,
        invocation_state,
        operation_target: part.attribute("OperationTarget").map(str::to_string),
        error,
    })
}

/// Decode a full `GetMdibResponse` body into a snapshot.
pub fn decode_mdib(body: Node<'_, '_>, input: &str) -> Result<MdibSnapshot> {
    let mdib_version = reader::attr_u64(body, "MdibVersion")?.unwrap_or(0);
    let sequence_id = body
        .attribute("SequenceId")
        .and_then(Uuid::parse)
        .ok_or_else(|| Error::Xml("GetMdibResponse without SequenceId".to_string()))?;
    let instance_id = reader::attr_u64(body, "InstanceId")?;

    let mdib = reader::child(body, ns::MSG, "Mdib").unwrap_or(body);
    let keep_source = uses_canonical_prefixes(body.document());

    let empty = MdibSnapshot::empty(sequence_id);
    let mut builder = SnapshotBuilder::from(&empty);

    if let Some(description) = reader::child(mdib, ns::MSG, "MdDescription") {
        for root in description.children().filter(Node::is_element) {
            decode_descriptor_tree(&mut builder, root, None, input, keep_source)?;
        }
    }

    if let Some(md_state) = reader::child(mdib, ns::MSG, "MdState") {
        for node in reader::children(md_state, ns::PM, "State") {
            let is_context = reader::xsi_type(node)?
                .map(|(_, local)| local.contains("ContextState"))
                .unwrap_or(false);
            if is_context {
                builder.put_context_state(Arc::new(decode_context_state(
                    node,
                    input,
                    keep_source,
                )?));
            } else {
                builder.put_state(Arc::new(decode_state(node, input, keep_source)?));
            }
        }
    }

    let snapshot = builder.build(mdib_version, sequence_id, instance_id);
    snapshot.validate()?;
    Ok(snapshot)
}

fn decode_descriptor_tree(
    builder: &mut SnapshotBuilder,
    node: Node<'_, '_>,
    parent: Option<&str>,
    input: &str,
    keep_source: bool,
) -> Result<()> {
    let mut descriptor = decode_descriptor(node, input, keep_source)?;
    descriptor.parent = parent.map(str::to_string);
    let handle = descriptor.handle.clone();
    // The preserved source of an inner tree node would re-emit its whole
    // subtree; keep it only for leaves.
    if node.children().any(|c| c.is_element() && c.tag_name().namespace() == Some(ns::PM) && is_containment_child(c.tag_name().name())) {
        descriptor.source_xml = None;
    }
    builder.put_descriptor(Arc::new(descriptor));
    for child in node.children().filter(Node::is_element) {
        if is_containment_child(child.tag_name().name()) {
            decode_descriptor_tree(builder, child, Some(&handle), input, keep_source)?;
        }
    }
    Ok(())
}

fn is_containment_child(local: &str) -> bool {
    matches!(
        local,
        "Mds" | "Vmd"
            | "Channel"
            | "Metric"
            | "SystemContext"
            | "PatientContext"
            | "LocationContext"
            | "EnsembleContext"
            | "AlertSystem"
            | "AlertCondition"
            | "AlertSignal"
            | "Sco"
            | "Operation"
            | "Battery"
            | "Clock"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::{
        CodedValue, ComponentActivation, ContextAssociation, ContextPayload, DescriptorPayload,
        MetricAvailability, MetricCategory, MetricValue, StatePayload,
    };
    use crate::mdib::{Mdib, TransactionKind};

    fn provider_mdib() -> Mdib {
        let mdib = Mdib::new();
        let mut t = mdib.begin(TransactionKind::Descriptor);
        t.insert(Descriptor::new("mds0", None, DescriptorPayload::Mds), None)
            .unwrap();
        t.insert(Descriptor::new("vmd0", Some("mds0"), DescriptorPayload::Vmd), None)
            .unwrap();
        t.insert(
            Descriptor::new("ch0", Some("vmd0"), DescriptorPayload::Channel),
            None,
        )
        .unwrap();
        let mut metric = Descriptor::new(
            "hr.num",
            Some("ch0"),
            DescriptorPayload::NumericMetric {
                unit: CodedValue::new("264864"),
                resolution: 1.0,
                category: MetricCategory::Measurement,
                availability: MetricAvailability::Continuous,
            },
        );
        metric.type_code = Some(CodedValue::new("147842"));
        t.insert(metric, None).unwrap();
        t.insert(
            Descriptor::new("pat", Some("mds0"), DescriptorPayload::PatientContext),
            None,
        )
        .unwrap();
        t.commit().unwrap();

        let mut t = mdib.begin(TransactionKind::Context);
        let mut patient = ContextState::new("pat.1", "pat", ContextPayload::empty_patient());
        patient.association = ContextAssociation::Associated;
        t.insert_context_state(patient).unwrap();
        t.commit().unwrap();
        mdib
    }

    fn parse_body(xml: &str) -> roxmltree::Document<'_> {
        reader::parse(xml).unwrap()
    }

    fn wrap(inner: &str) -> String {
        let mut root = String::from("<r");
        for (prefix, uri) in crate::biceps::qname::PREFIXES {
            root.push_str(&format!(r#" xmlns:{}="{}""#, prefix, uri));
        }
        root.push('>');
        root.push_str(inner);
        root.push_str("</r>");
        root
    }

    #[test]
    fn test_get_mdib_roundtrip() {
        let mdib = provider_mdib();
        let snapshot = mdib.snapshot();
        let xml = wrap(&encode_get_mdib_response(&snapshot));
        let doc = parse_body(&xml);
        let body = doc.root_element().first_element_child().unwrap();

        let decoded = decode_mdib(body, &xml).unwrap();
        assert_eq!(decoded.mdib_version, snapshot.mdib_version);
        assert_eq!(decoded.sequence_id, snapshot.sequence_id);
        assert_eq!(decoded.descriptor_count(), snapshot.descriptor_count());
        assert_eq!(decoded.children_of("vmd0"), snapshot.children_of("vmd0"));
        assert_eq!(
            decoded.get_descriptor("hr.num").unwrap().type_code,
            snapshot.get_descriptor("hr.num").unwrap().type_code
        );
        assert!(decoded.get_state("hr.num").is_some());
        let contexts = decoded.context_states_of("pat");
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].is_associated());
        assert!(decoded.validate().is_ok());
        // Code index rebuilt on decode.
        assert_eq!(decoded.metrics_by_code("", "147842"), &["hr.num"]);
    }

    #[test]
    fn test_metric_report_roundtrip() {
        let mdib = provider_mdib();
        let reports: Arc<parking_lot::Mutex<Vec<(String, String)>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        mdib.register_observer(Box::new(move |change| {
            for (action, body) in build_reports(change) {
                sink.lock().push((action.to_string(), body));
            }
        }));

        let mut t = mdib.begin(TransactionKind::Metric);
        match &mut t.write_state("hr.num").unwrap().payload {
            StatePayload::NumericMetric { value, .. } => *value = Some(MetricValue::new(72.0)),
            _ => unreachable!(),
        }
        t.commit().unwrap();

        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        let (action, body) = &reports[0];
        assert_eq!(action, actions::EPISODIC_METRIC_REPORT);

        let xml = wrap(body);
        let doc = parse_body(&xml);
        let node = doc.root_element().first_element_child().unwrap();
        match decode_report(action, node, &xml).unwrap() {
            Report::Metric(states) => {
                assert_eq!(states.len(), 1);
                assert_eq!(states[0].descriptor_handle, "hr.num");
                match &states[0].payload {
                    StatePayload::NumericMetric { value, .. } => {
                        assert_eq!(value.as_ref().unwrap().value, Some(72.0));
                    }
                    _ => panic!("wrong payload"),
                }
            }
            other => panic!("expected metric report, got {:?}", other),
        }
    }

    #[test]
    fn test_description_report_roundtrip() {
        let mdib = provider_mdib();
        let change: Arc<parking_lot::Mutex<Option<ChangeSet>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&change);
        mdib.register_observer(Box::new(move |c| *sink.lock() = Some(c.clone())));

        let mut t = mdib.begin(TransactionKind::Descriptor);
        t.insert(
            Descriptor::new("ch1", Some("vmd0"), DescriptorPayload::Channel),
            None,
        )
        .unwrap();
        t.remove("hr.num").unwrap();
        t.commit().unwrap();

        let change = change.lock().clone().unwrap();
        let body = encode_description_report(&change);
        let xml = wrap(&body);
        let doc = parse_body(&xml);
        let node = doc.root_element().first_element_child().unwrap();
        match decode_report(actions::DESCRIPTION_MODIFICATION_REPORT, node, &xml).unwrap() {
            Report::Description {
                created,
                deleted,
                states,
                ..
            } => {
                assert_eq!(created.len(), 1);
                assert_eq!(created[0].handle, "ch1");
                assert_eq!(created[0].parent.as_deref(), Some("vmd0"));
                assert_eq!(deleted, vec!["hr.num".to_string()]);
                assert_eq!(states.len(), 1); // ch1's default state
            }
            other => panic!("expected description report, got {:?}", other),
        }
    }

    #[test]
    fn test_operation_invoked_roundtrip() {
        let part = InvocationReportPart {
            operation_handle: "op.set_hr".to_string(),
            transaction_id: 17,
            invocation_state: InvocationState::Finished,
            operation_target: Some("hr.num".to_string()),
            error: None,
        };
        let body = encode_operation_invoked_report(9, Uuid::generate(), &part);
        let xml = wrap(&body);
        let doc = parse_body(&xml);
        let node = doc.root_element().first_element_child().unwrap();
        match decode_report(actions::OPERATION_INVOKED_REPORT, node, &xml).unwrap() {
            Report::OperationInvoked(parts) => assert_eq!(parts, vec![part]),
            other => panic!("expected invocation report, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_invocation_roundtrip() {
        let part = InvocationReportPart {
            operation_handle: "op.ctx".to_string(),
            transaction_id: 4,
            invocation_state: InvocationState::Failed,
            operation_target: None,
            error: Some((InvocationError::InvalidValue, "unknown descriptor".to_string())),
        };
        let body = encode_operation_invoked_report(3, Uuid::generate(), &part);
        let xml = wrap(&body);
        let doc = parse_body(&xml);
        let node = doc.root_element().first_element_child().unwrap();
        match decode_report(actions::OPERATION_INVOKED_REPORT, node, &xml).unwrap() {
            Report::OperationInvoked(parts) => assert_eq!(parts, vec![part]),
            other => panic!("expected invocation report, got {:?}", other),
        }
    }

    #[test]
    fn test_system_error_roundtrip() {
        let body = encode_system_error_report(5, Uuid::generate(), "E-42", "sensor offline");
        let xml = wrap(&body);
        let doc = parse_body(&xml);
        let node = doc.root_element().first_element_child().unwrap();
        match decode_report(actions::SYSTEM_ERROR_REPORT, node, &xml).unwrap() {
            Report::SystemError { code, text } => {
                assert_eq!(code, "E-42");
                assert_eq!(text, "sensor offline");
            }
            other => panic!("expected system error report, got {:?}", other),
        }
    }

    #[test]
    fn test_filtered_md_state() {
        let mdib = provider_mdib();
        let snapshot = mdib.snapshot();
        let filter = vec!["hr.num".to_string()];
        let body = encode_get_md_state_response(&snapshot, Some(&filter));
        assert!(body.contains("hr.num"));
        assert!(!body.contains(r#"DescriptorHandle="vmd0""#));
        // Context states match via their descriptor handle too.
        let filter = vec!["pat".to_string()];
        let body = encode_get_md_state_response(&snapshot, Some(&filter));
        assert!(body.contains(r#"Handle="pat.1""#));
    }

    #[test]
    fn test_containment_tree_entries() {
        let mdib = provider_mdib();
        let snapshot = mdib.snapshot();
        let body = encode_containment_tree_response(&snapshot, None);
        assert!(body.contains(r#"HandleRef="mds0""#));

        let filter = vec!["vmd0".to_string()];
        let body = encode_containment_tree_response(&snapshot, Some(&filter));
        assert!(body.contains(r#"HandleRef="ch0""#));
        assert!(body.contains(r#"ParentMds="mds0""#));
    }
}
