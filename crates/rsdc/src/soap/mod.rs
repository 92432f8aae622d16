// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # SOAP/DPWS dispatch layer
//!
//! SOAP 1.2 envelopes with WS-Addressing 2005/08 headers, fault encoding,
//! the action-keyed request router and the outbound client. HTTP transport
//! itself stays outside the crate: inbound bytes enter through
//! [`SoapDispatcher::dispatch`], outbound ones leave through a
//! [`SoapPoster`] implementation.

mod client;
mod dispatcher;
mod envelope;
mod fault;

pub use client::{ResponseEnvelope, SoapClient, SoapPoster};
pub use dispatcher::{RequestContext, SoapDispatcher, SoapHandler, SoapResponse};
pub use envelope::{
    body_element, header_node, parse_headers, parse_mdib_headers, EnvelopeBuilder, MdibHeaders,
    WsaHeaders,
};
pub use fault::{Fault, FaultCode};
