// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WS-Eventing message bodies and the endpoint-reference model.
//!
//! Shared by the provider-side manager and the consumer-side client; both
//! sides round-trip these bodies, so encode/decode live together here.

use std::time::Duration;

use roxmltree::Node;

use crate::biceps::qname::{ns, QName};
use crate::biceps::values::{format_xsd_duration, parse_xsd_duration};
use crate::xml::{reader, XmlWriter};
use crate::{Error, Result};

/// Filter dialect for action-URI filters (DPWS Action dialect).
pub const ACTION_DIALECT: &str = "http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01/Action";

/// Push delivery mode (the only mode this stack supports).
pub const DELIVERY_MODE_PUSH: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing/DeliveryModes/Push";

/// `SubscriptionEnd` status codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EndReason {
    SourceShuttingDown,
    DeliveryFailure,
    SourceCancelling,
}

impl EndReason {
    pub fn as_uri(&self) -> &'static str {
        match self {
            Self::SourceShuttingDown => {
                "http://schemas.xmlsoap.org/ws/2004/08/eventing/SourceShuttingDown"
            }
            Self::DeliveryFailure => {
                "http://schemas.xmlsoap.org/ws/2004/08/eventing/DeliveryFailure"
            }
            Self::SourceCancelling => {
                "http://schemas.xmlsoap.org/ws/2004/08/eventing/SourceCancelling"
            }
        }
    }

    pub fn parse(uri: &str) -> Option<Self> {
        Some(match uri.rsplit('/').next()? {
            "SourceShuttingDown" => Self::SourceShuttingDown,
            "DeliveryFailure" => Self::DeliveryFailure,
            "SourceCancelling" => Self::SourceCancelling,
            _ => return None,
        })
    }
}

/// WS-Addressing endpoint reference with opaque reference parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndpointReference {
    pub address: String,
    /// Raw reference-parameter elements, echoed verbatim.
    pub reference_parameters: Vec<String>,
}

impl EndpointReference {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            reference_parameters: Vec::new(),
        }
    }

    pub fn encode(&self, w: &mut XmlWriter, element: QName) {
        w.open(element);
        w.leaf(QName::new(ns::WSA, "Address"), &self.address);
        if !self.reference_parameters.is_empty() {
            w.open(QName::new(ns::WSA, "ReferenceParameters"));
            for parameter in &self.reference_parameters {
                w.raw(parameter);
            }
            w.close();
        }
        w.close();
    }

    pub fn decode(node: Node<'_, '_>, input: &str) -> Result<Self> {
        let address = reader::require_child(node, ns::WSA, "Address")
            .map(|address| reader::text(address).to_string())?;
        let reference_parameters = match reader::child(node, ns::WSA, "ReferenceParameters") {
            Some(parameters) => parameters
                .children()
                .filter(Node::is_element)
                .map(|child| reader::source_slice(child, input).to_string())
                .collect(),
            None => Vec::new(),
        };
        Ok(Self {
            address,
            reference_parameters,
        })
    }
}

/// Parsed `wse:Subscribe` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub notify_to: EndpointReference,
    pub end_to: Option<EndpointReference>,
    pub expires: Option<Duration>,
    /// Ordered set of action URIs.
    pub filter: Vec<String>,
}

impl SubscribeRequest {
    pub fn new(notify_to: &str, filter: &[&str]) -> Self {
        Self {
            notify_to: EndpointReference::new(notify_to),
            end_to: None,
            expires: None,
            filter: filter.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn encode(&self) -> String {
        let mut w = XmlWriter::new();
        w.open(QName::new(ns::WSE, "Subscribe"));
        if let Some(end_to) = &self.end_to {
            end_to.encode(&mut w, QName::new(ns::WSE, "EndTo"));
        }
        w.open(QName::new(ns::WSE, "Delivery"));
        w.attr("Mode", DELIVERY_MODE_PUSH);
        self.notify_to.encode(&mut w, QName::new(ns::WSE, "NotifyTo"));
        w.close();
        if let Some(expires) = self.expires {
            w.leaf(QName::new(ns::WSE, "Expires"), &format_xsd_duration(expires));
        }
        w.open(QName::new(ns::WSE, "Filter"));
        w.attr("Dialect", ACTION_DIALECT);
        w.text(&self.filter.join(" "));
        w.close();
        w.close();
        w.finish()
    }

    pub fn decode(body: Node<'_, '_>, input: &str) -> Result<Self> {
        let delivery = reader::require_child(body, ns::WSE, "Delivery")?;
        if let Some(mode) = delivery.attribute("Mode") {
            if mode != DELIVERY_MODE_PUSH {
                return Err(Error::Fault(crate::soap::Fault::delivery_mode_unavailable()));
            }
        }
        let notify_to =
            EndpointReference::decode(reader::require_child(delivery, ns::WSE, "NotifyTo")?, input)?;
        let end_to = match reader::child(body, ns::WSE, "EndTo") {
            Some(end_to) => Some(EndpointReference::decode(end_to, input)?),
            None => None,
        };
        let expires = decode_expires(body)?;
        let filter = match reader::child(body, ns::WSE, "Filter") {
            Some(filter) => reader::text(filter)
                .split_ascii_whitespace()
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };
        Ok(Self {
            notify_to,
            end_to,
            expires,
            filter,
        })
    }
}

/// `wse:SubscribeResponse` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResponse {
    pub subscription_manager: EndpointReference,
    pub expires: Duration,
}

impl SubscribeResponse {
    pub fn encode(&self) -> String {
        let mut w = XmlWriter::new();
        w.open(QName::new(ns::WSE, "SubscribeResponse"));
        self.subscription_manager
            .encode(&mut w, QName::new(ns::WSE, "SubscriptionManager"));
        w.leaf(
            QName::new(ns::WSE, "Expires"),
            &format_xsd_duration(self.expires),
        );
        w.close();
        w.finish()
    }

    pub fn decode(body: Node<'_, '_>, input: &str) -> Result<Self> {
        let subscription_manager = EndpointReference::decode(
            reader::require_child(body, ns::WSE, "SubscriptionManager")?,
            input,
        )?;
        let expires = decode_expires(body)?
            .ok_or_else(|| Error::Xml("SubscribeResponse without Expires".to_string()))?;
        Ok(Self {
            subscription_manager,
            expires,
        })
    }
}

/// Encode a `wse:Renew` / `wse:GetStatus` style body carrying an optional
/// expiration request.
pub fn encode_renew(expires: Option<Duration>) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::WSE, "Renew"));
    if let Some(expires) = expires {
        w.leaf(QName::new(ns::WSE, "Expires"), &format_xsd_duration(expires));
    }
    w.close();
    w.finish()
}

/// Encode a `wse:RenewResponse`/`wse:GetStatusResponse` body.
pub fn encode_expires_response(element_local: &'static str, expires: Duration) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::WSE, element_local));
    w.leaf(QName::new(ns::WSE, "Expires"), &format_xsd_duration(expires));
    w.close();
    w.finish()
}

/// `wse:Expires` child of a body, if present.
pub fn decode_expires(node: Node<'_, '_>) -> Result<Option<Duration>> {
    match reader::child(node, ns::WSE, "Expires") {
        None => Ok(None),
        Some(expires) => {
            let text = reader::text(expires);
            parse_xsd_duration(text)
                .map(Some)
                .ok_or_else(|| Error::InvalidExpiration(text.to_string()))
        }
    }
}

/// Encode a `wse:SubscriptionEnd` body.
pub fn encode_subscription_end(manager: &EndpointReference, reason: EndReason) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::WSE, "SubscriptionEnd"));
    manager.encode(&mut w, QName::new(ns::WSE, "SubscriptionManager"));
    w.leaf(QName::new(ns::WSE, "Status"), reason.as_uri());
    w.close();
    w.finish()
}

/// Decode a `wse:SubscriptionEnd` body into `(manager, reason)`.
pub fn decode_subscription_end(
    body: Node<'_, '_>,
    input: &str,
) -> Result<(EndpointReference, Option<EndReason>)> {
    let manager = EndpointReference::decode(
        reader::require_child(body, ns::WSE, "SubscriptionManager")?,
        input,
    )?;
    let reason = reader::child(body, ns::WSE, "Status")
        .and_then(|status| EndReason::parse(reader::text(status)));
    Ok((manager, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::actions;

    fn parse_body(xml: &str) -> (roxmltree::Document<'_>, String) {
        (reader::parse(xml).unwrap(), xml.to_string())
    }

    fn wrap(inner: &str) -> String {
        format!(
            r#"<r xmlns:wse="{}" xmlns:wsa="{}" xmlns:msg="{}">{}</r>"#,
            ns::WSE,
            ns::WSA,
            ns::MSG,
            inner
        )
    }

    #[test]
    fn test_subscribe_roundtrip() {
        let mut request = SubscribeRequest::new(
            "http://consumer:8080/sink",
            &[actions::EPISODIC_METRIC_REPORT, actions::EPISODIC_ALERT_REPORT],
        );
        request.expires = Some(Duration::from_secs(120));
        request
            .notify_to
            .reference_parameters
            .push("<msg:SinkId>7</msg:SinkId>".to_string());

        let xml = wrap(&request.encode());
        let (doc, input) = parse_body(&xml);
        let body = doc.root_element().first_element_child().unwrap();
        let decoded = SubscribeRequest::decode(body, &input).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_subscribe_response_roundtrip() {
        let mut manager = EndpointReference::new("http://device/subs");
        manager
            .reference_parameters
            .push("<wse:Identifier>urn:uuid:abc</wse:Identifier>".to_string());
        let response = SubscribeResponse {
            subscription_manager: manager,
            expires: Duration::from_secs(60),
        };
        let xml = wrap(&response.encode());
        let (doc, input) = parse_body(&xml);
        let body = doc.root_element().first_element_child().unwrap();
        let decoded = SubscribeResponse::decode(body, &input).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_renew_bodies() {
        let xml = wrap(&encode_renew(Some(Duration::from_secs(30))));
        let (doc, _) = parse_body(&xml);
        let body = doc.root_element().first_element_child().unwrap();
        assert_eq!(
            decode_expires(body).unwrap(),
            Some(Duration::from_secs(30))
        );

        let xml = wrap(&encode_expires_response("RenewResponse", Duration::from_secs(55)));
        let (doc, _) = parse_body(&xml);
        let body = doc.root_element().first_element_child().unwrap();
        assert_eq!(
            decode_expires(body).unwrap(),
            Some(Duration::from_secs(55))
        );
    }

    #[test]
    fn test_bad_expires_is_error() {
        let xml = wrap(r#"<wse:Renew><wse:Expires>whenever</wse:Expires></wse:Renew>"#);
        let (doc, _) = parse_body(&xml);
        let body = doc.root_element().first_element_child().unwrap();
        assert!(matches!(
            decode_expires(body),
            Err(Error::InvalidExpiration(_))
        ));
    }

    #[test]
    fn test_subscription_end_roundtrip() {
        let manager = EndpointReference::new("http://device/subs");
        let xml = wrap(&encode_subscription_end(&manager, EndReason::SourceShuttingDown));
        let (doc, input) = parse_body(&xml);
        let body = doc.root_element().first_element_child().unwrap();
        let (decoded_manager, reason) = decode_subscription_end(body, &input).unwrap();
        assert_eq!(decoded_manager, manager);
        assert_eq!(reason, Some(EndReason::SourceShuttingDown));
    }

    #[test]
    fn test_unsupported_delivery_mode() {
        let xml = wrap(
            r#"<wse:Subscribe><wse:Delivery Mode="urn:pull"><wse:NotifyTo><wsa:Address>http://x</wsa:Address></wse:NotifyTo></wse:Delivery></wse:Subscribe>"#,
        );
        let (doc, input) = parse_body(&xml);
        let body = doc.root_element().first_element_child().unwrap();
        assert!(matches!(
            SubscribeRequest::decode(body, &input),
            Err(Error::Fault(_))
        ));
    }
}
