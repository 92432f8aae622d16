// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! GetService, ContextService (read side) and ContainmentTreeService
//! handlers. All of them answer from the current committed snapshot, so a
//! response is internally consistent by construction.

use std::sync::Arc;

use roxmltree::Node;

use crate::biceps::qname::ns;
use crate::biceps::{actions, Handle};
use crate::mdib::{messages, Mdib, MdibSnapshot};
use crate::soap::{MdibHeaders, RequestContext, SoapDispatcher, SoapResponse};
use crate::xml::reader;
use crate::Result;

/// `msg:HandleRef` children of a get request body; empty means everything.
fn handle_refs(body: Node<'_, '_>) -> Option<Vec<Handle>> {
    let handles: Vec<Handle> = reader::children(body, ns::MSG, "HandleRef")
        .into_iter()
        .map(|node| reader::text(node).to_string())
        .filter(|handle| !handle.is_empty())
        .collect();
    if handles.is_empty() {
        None
    } else {
        Some(handles)
    }
}

fn mdib_headers(snapshot: &MdibSnapshot) -> MdibHeaders {
    MdibHeaders {
        mdib_version: snapshot.mdib_version,
        sequence_id: snapshot.sequence_id,
        instance_id: snapshot.instance_id,
    }
}

/// Register the read-side port types on a dispatcher.
pub fn register_get_handlers(mdib: &Arc<Mdib>, dispatcher: &mut SoapDispatcher) {
    let source = Arc::clone(mdib);
    dispatcher.register(
        actions::GET_MDIB,
        Arc::new(move |_: &RequestContext<'_, '_>| -> Result<SoapResponse> {
            let snapshot = source.snapshot();
            Ok(SoapResponse::new(
                actions::GET_MDIB_RESPONSE,
                messages::encode_get_mdib_response(&snapshot),
            )
            .with_mdib(mdib_headers(&snapshot)))
        }),
    );

    let source = Arc::clone(mdib);
    dispatcher.register(
        actions::GET_MD_DESCRIPTION,
        Arc::new(move |ctx: &RequestContext<'_, '_>| -> Result<SoapResponse> {
            let snapshot = source.snapshot();
            let filter = handle_refs(ctx.body);
            Ok(SoapResponse::new(
                actions::GET_MD_DESCRIPTION_RESPONSE,
                messages::encode_get_md_description_response(&snapshot, filter.as_deref()),
            )
            .with_mdib(mdib_headers(&snapshot)))
        }),
    );

    let source = Arc::clone(mdib);
    dispatcher.register(
        actions::GET_MD_STATE,
        Arc::new(move |ctx: &RequestContext<'_, '_>| -> Result<SoapResponse> {
            let snapshot = source.snapshot();
            let filter = handle_refs(ctx.body);
            Ok(SoapResponse::new(
                actions::GET_MD_STATE_RESPONSE,
                messages::encode_get_md_state_response(&snapshot, filter.as_deref()),
            )
            .with_mdib(mdib_headers(&snapshot)))
        }),
    );

    let source = Arc::clone(mdib);
    dispatcher.register(
        actions::GET_CONTEXT_STATES,
        Arc::new(move |ctx: &RequestContext<'_, '_>| -> Result<SoapResponse> {
            let snapshot = source.snapshot();
            let filter = handle_refs(ctx.body);
            Ok(SoapResponse::new(
                actions::GET_CONTEXT_STATES_RESPONSE,
                messages::encode_get_context_states_response(&snapshot, filter.as_deref()),
            )
            .with_mdib(mdib_headers(&snapshot)))
        }),
    );

    let source = Arc::clone(mdib);
    dispatcher.register(
        actions::GET_CONTAINMENT_TREE,
        Arc::new(move |ctx: &RequestContext<'_, '_>| -> Result<SoapResponse> {
            let snapshot = source.snapshot();
            let filter = handle_refs(ctx.body);
            Ok(SoapResponse::new(
                actions::GET_CONTAINMENT_TREE_RESPONSE,
                messages::encode_containment_tree_response(&snapshot, filter.as_deref()),
            )
            .with_mdib(mdib_headers(&snapshot)))
        }),
    );

    let source = Arc::clone(mdib);
    dispatcher.register(
        actions::GET_DESCRIPTOR,
        Arc::new(move |ctx: &RequestContext<'_, '_>| -> Result<SoapResponse> {
            let snapshot = source.snapshot();
            let handles = handle_refs(ctx.body).unwrap_or_default();
            Ok(SoapResponse::new(
                actions::GET_DESCRIPTOR_RESPONSE,
                messages::encode_get_descriptor_response(&snapshot, &handles),
            )
            .with_mdib(mdib_headers(&snapshot)))
        }),
    );
}

/// Encode a get request body with optional `msg:HandleRef` entries.
pub fn encode_get_request(element_local: &'static str, handles: &[&str]) -> String {
    use crate::biceps::qname::QName;
    use crate::xml::XmlWriter;
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::MSG, element_local));
    for handle in handles {
        w.leaf(QName::new(ns::MSG, "HandleRef"), handle);
    }
    w.close();
    w.finish()
}
