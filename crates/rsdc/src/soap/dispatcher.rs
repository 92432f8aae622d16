// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound request router keyed by `wsa:Action`.
//!
//! The HTTP server plumbing hands every inbound request body to
//! [`SoapDispatcher::dispatch`] and posts back whatever string it returns;
//! the dispatcher never panics and always produces a complete envelope
//! (typed response or fault).

use std::collections::HashMap;
use std::sync::Arc;

use roxmltree::Node;

use crate::soap::envelope::{
    body_element, parse_headers, EnvelopeBuilder, MdibHeaders, WsaHeaders,
};
use crate::soap::fault::Fault;
use crate::xml::reader;
use crate::{Error, Result};

/// One inbound request as seen by a handler.
pub struct RequestContext<'a, 'input> {
    pub headers: &'a WsaHeaders,
    /// First element of the SOAP body.
    pub body: Node<'a, 'input>,
    /// Full request text, for source slicing.
    pub input: &'input str,
}

/// Typed response returned by a handler; the dispatcher wraps it into an
/// envelope with `wsa:RelatesTo` and the MDIB headers.
pub struct SoapResponse {
    pub action: String,
    pub body_xml: String,
    pub mdib: Option<MdibHeaders>,
}

impl SoapResponse {
    pub fn new(action: &str, body_xml: String) -> Self {
        Self {
            action: action.to_string(),
            body_xml,
            mdib: None,
        }
    }

    pub fn with_mdib(mut self, mdib: MdibHeaders) -> Self {
        self.mdib = Some(mdib);
        self
    }
}

/// Handler invoked per action. Returning `Error::Fault` encodes that fault;
/// any other error becomes a `Receiver` fault.
pub trait SoapHandler: Send + Sync {
    fn handle(&self, ctx: &RequestContext<'_, '_>) -> Result<SoapResponse>;
}

impl<F> SoapHandler for F
where
    F: Fn(&RequestContext<'_, '_>) -> Result<SoapResponse> + Send + Sync,
{
    fn handle(&self, ctx: &RequestContext<'_, '_>) -> Result<SoapResponse> {
        self(ctx)
    }
}

/// Action-keyed request router. Port types register their operations at
/// startup; dispatch is lock-free afterwards.
pub struct SoapDispatcher {
    handlers: HashMap<String, Arc<dyn SoapHandler>>,
    strict: bool,
}

impl SoapDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            strict: true,
        }
    }

    /// Relax envelope validation (missing headers tolerated).
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            handlers: HashMap::new(),
            strict: false,
        }
    }

    /// Register a handler for an action URI. Last registration wins.
    pub fn register(&mut self, action: &str, handler: Arc<dyn SoapHandler>) {
        if self.handlers.insert(action.to_string(), handler).is_some() {
            log::debug!("[dispatch] handler for {} replaced", action);
        }
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Route one inbound request; always returns a response envelope.
    pub fn dispatch(&self, request: &str) -> String {
        match self.try_dispatch(request) {
            Ok(response) => response,
            Err((fault, relates_to)) => fault.to_envelope(relates_to.as_deref()),
        }
    }

    fn try_dispatch(&self, request: &str) -> core::result::Result<String, (Fault, Option<String>)> {
        let doc = reader::parse(request)
            .map_err(|e| (Fault::malformed(&e.to_string()), None))?;
        let headers = parse_headers(&doc, request, self.strict)
            .map_err(|e| (Fault::sender("wsa:MessageAddressingHeaderRequired", &e.to_string()), None))?;
        let relates_to = headers.message_id.clone();

        let handler = self.handlers.get(&headers.action).ok_or_else(|| {
            log::debug!("[dispatch] no handler for action {}", headers.action);
            (
                Fault::action_not_supported(&headers.action),
                relates_to.clone(),
            )
        })?;

        // An empty body is legal for some requests (WS-Transfer Get); hand
        // the Body element itself to the handler then.
        let body = match body_element(&doc) {
            Ok(body) => body,
            Err(_) => reader::require_child(
                doc.root_element(),
                crate::biceps::qname::ns::SOAP,
                "Body",
            )
            .map_err(|e| (Fault::malformed(&e.to_string()), relates_to.clone()))?,
        };

        let ctx = RequestContext {
            headers: &headers,
            body,
            input: request,
        };
        let response = handler.handle(&ctx).map_err(|error| {
            let fault = match error {
                Error::Fault(fault) => fault,
                other => {
                    log::debug!("[dispatch] handler error for {}: {}", headers.action, other);
                    Fault::receiver(&other.to_string())
                }
            };
            (fault, relates_to.clone())
        })?;

        let mut builder = EnvelopeBuilder::new(&response.action).body(&response.body_xml);
        if let Some(message_id) = &headers.message_id {
            builder = builder.relates_to(message_id);
        }
        if let Some(mdib) = response.mdib {
            builder = builder.mdib_headers(mdib);
        }
        Ok(builder.build())
    }
}

impl Default for SoapDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
