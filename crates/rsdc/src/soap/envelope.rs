// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOAP 1.2 envelope model with WS-Addressing 2005/08 headers.
//!
//! One builder produces every outbound envelope (requests, responses,
//! notifications, discovery datagrams); one parser extracts the header
//! block. Reference parameters are opaque: inbound ones are kept as raw
//! source slices, outbound ones are re-emitted verbatim with the
//! `wsa:IsReferenceParameter` marker injected.

use roxmltree::{Document, Node};

use crate::biceps::qname::{ns, QName};
use crate::ident::Uuid;
use crate::xml::{reader, XmlWriter};
use crate::{Error, Result};

/// WS-Addressing header block of one message.
#[derive(Debug, Clone, Default)]
pub struct WsaHeaders {
    pub action: String,
    pub message_id: Option<String>,
    pub to: Option<String>,
    pub relates_to: Option<String>,
    pub reply_to: Option<String>,
    /// Raw header elements carried as reference parameters.
    pub reference_parameters: Vec<String>,
}

/// SDC continuity headers stamped on MDIB-carrying messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MdibHeaders {
    pub mdib_version: u64,
    pub sequence_id: Uuid,
    pub instance_id: Option<u64>,
}

/// Builder for outbound envelopes.
pub struct EnvelopeBuilder {
    action: String,
    to: Option<String>,
    message_id: String,
    relates_to: Option<String>,
    reply_to: Option<String>,
    reference_parameters: Vec<String>,
    extra_headers: Vec<String>,
    mdib: Option<MdibHeaders>,
    body: String,
}

impl EnvelopeBuilder {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            to: None,
            message_id: Uuid::generate().to_urn(),
            relates_to: None,
            reply_to: None,
            reference_parameters: Vec::new(),
            extra_headers: Vec::new(),
            mdib: None,
            body: String::new(),
        }
    }

    pub fn to(mut self, to: &str) -> Self {
        self.to = Some(to.to_string());
        self
    }

    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = id.to_string();
        self
    }

    pub fn relates_to(mut self, id: &str) -> Self {
        self.relates_to = Some(id.to_string());
        self
    }

    pub fn reply_to(mut self, address: &str) -> Self {
        self.reply_to = Some(address.to_string());
        self
    }

    /// Echo an opaque reference parameter element; the
    /// `wsa:IsReferenceParameter="true"` marker is injected on emission.
    pub fn reference_parameter(mut self, raw_element: &str) -> Self {
        self.reference_parameters.push(raw_element.to_string());
        self
    }

    /// Raw additional header element (AppSequence, subscription identifier).
    pub fn header(mut self, raw_element: &str) -> Self {
        self.extra_headers.push(raw_element.to_string());
        self
    }

    pub fn mdib_headers(mut self, mdib: MdibHeaders) -> Self {
        self.mdib = Some(mdib);
        self
    }

    /// Inner XML of the SOAP body (exactly one element, canonical prefixes).
    pub fn body(mut self, inner_xml: &str) -> Self {
        self.body = inner_xml.to_string();
        self
    }

    pub fn build(self) -> String {
        let mut w = XmlWriter::new();
        w.open_root(QName::new(ns::SOAP, "Envelope"));
        w.open(QName::new(ns::SOAP, "Header"));
        w.leaf(QName::new(ns::WSA, "Action"), &self.action);
        w.leaf(QName::new(ns::WSA, "MessageID"), &self.message_id);
        if let Some(to) = &self.to {
            w.leaf(QName::new(ns::WSA, "To"), to);
        }
        if let Some(relates_to) = &self.relates_to {
            w.leaf(QName::new(ns::WSA, "RelatesTo"), relates_to);
        }
        if let Some(reply_to) = &self.reply_to {
            w.open(QName::new(ns::WSA, "ReplyTo"));
            w.leaf(QName::new(ns::WSA, "Address"), reply_to);
            w.close();
        }
        for parameter in &self.reference_parameters {
            w.raw(&mark_reference_parameter(parameter));
        }
        for header in &self.extra_headers {
            w.raw(header);
        }
        if let Some(mdib) = &self.mdib {
            w.leaf(
                QName::new(ns::MSG, "MdibVersion"),
                &mdib.mdib_version.to_string(),
            );
            w.leaf(
                QName::new(ns::MSG, "SequenceId"),
                &mdib.sequence_id.to_urn(),
            );
            if let Some(instance_id) = mdib.instance_id {
                w.leaf(QName::new(ns::MSG, "InstanceId"), &instance_id.to_string());
            }
        }
        w.close(); // Header
        w.open(QName::new(ns::SOAP, "Body"));
        if !self.body.is_empty() {
            w.raw(&self.body);
        }
        w.close(); // Body
        w.close(); // Envelope
        w.finish()
    }
}

/// Inject `wsa:IsReferenceParameter="true"` into the start tag of a raw
/// element unless it is already marked.
fn mark_reference_parameter(raw: &str) -> String {
    if raw.contains("IsReferenceParameter") {
        return raw.to_string();
    }
    match raw.find(|c: char| c.is_whitespace() || c == '>' || c == '/') {
        Some(split) if raw.starts_with('<') => {
            let (head, tail) = raw.split_at(split);
            format!("{} wsa:IsReferenceParameter=\"true\"{}", head, tail)
        }
        _ => raw.to_string(),
    }
}

/// Locate the header block of a parsed envelope.
pub fn header_node<'a, 'input>(doc: &'a Document<'input>) -> Option<Node<'a, 'input>> {
    reader::child(doc.root_element(), ns::SOAP, "Header")
}

/// Locate the first element inside the SOAP body.
pub fn body_element<'a, 'input>(doc: &'a Document<'input>) -> Result<Node<'a, 'input>> {
    let body = reader::require_child(doc.root_element(), ns::SOAP, "Body")?;
    body.children()
        .find(Node::is_element)
        .ok_or_else(|| Error::Xml("empty SOAP body".to_string()))
}

/// Extract WS-Addressing headers. `strict` requires `wsa:Action`.
pub fn parse_headers(doc: &Document<'_>, input: &str, strict: bool) -> Result<WsaHeaders> {
    let mut headers = WsaHeaders::default();
    let Some(header) = header_node(doc) else {
        if strict {
            return Err(Error::Xml("missing SOAP header".to_string()));
        }
        return Ok(headers);
    };

    for child in header.children().filter(Node::is_element) {
        let tag = child.tag_name();
        if tag.namespace() == Some(ns::WSA) {
            match tag.name() {
                "Action" => headers.action = reader::text(child).to_string(),
                "MessageID" => headers.message_id = Some(reader::text(child).to_string()),
                "To" => headers.to = Some(reader::text(child).to_string()),
                "RelatesTo" => headers.relates_to = Some(reader::text(child).to_string()),
                "ReplyTo" => {
                    headers.reply_to = reader::child(child, ns::WSA, "Address")
                        .map(|address| reader::text(address).to_string());
                }
                _ => {}
            }
            continue;
        }
        if child
            .attribute((ns::WSA, "IsReferenceParameter"))
            .is_some_and(|v| v == "true" || v == "1")
        {
            headers
                .reference_parameters
                .push(reader::source_slice(child, input).to_string());
        }
    }

    if strict && headers.action.is_empty() {
        return Err(Error::Xml("missing wsa:Action".to_string()));
    }
    Ok(headers)
}

/// Extract SDC continuity headers, falling back to the MdibVersion/
/// SequenceId attributes BICEPS stamps on report and response bodies.
pub fn parse_mdib_headers(doc: &Document<'_>) -> Result<Option<MdibHeaders>> {
    let from_header = header_node(doc).and_then(|header| {
        let version = reader::child(header, ns::MSG, "MdibVersion")?;
        Some((header, version))
    });

    if let Some((header, version)) = from_header {
        let mdib_version = reader::text(version)
            .parse::<u64>()
            .map_err(|_| Error::Xml("bad MdibVersion header".to_string()))?;
        let sequence_id = reader::child(header, ns::MSG, "SequenceId")
            .and_then(|n| Uuid::parse(reader::text(n)))
            .ok_or_else(|| Error::Xml("missing or bad SequenceId header".to_string()))?;
        let instance_id = match reader::child(header, ns::MSG, "InstanceId") {
            Some(node) => Some(
                reader::text(node)
                    .parse::<u64>()
                    .map_err(|_| Error::Xml("bad InstanceId header".to_string()))?,
            ),
            None => None,
        };
        return Ok(Some(MdibHeaders {
            mdib_version,
            sequence_id,
            instance_id,
        }));
    }

    // Fallback: body attributes.
    let Ok(body) = body_element(doc) else {
        return Ok(None);
    };
    let Some(mdib_version) = reader::attr_u64(body, "MdibVersion")? else {
        return Ok(None);
    };
    let sequence_id = body
        .attribute("SequenceId")
        .and_then(Uuid::parse)
        .ok_or_else(|| Error::Xml("body MdibVersion without SequenceId".to_string()))?;
    Ok(Some(MdibHeaders {
        mdib_version,
        sequence_id,
        instance_id: reader::attr_u64(body, "InstanceId")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::actions;

    #[test]
    fn test_build_and_parse_roundtrip() {
        let xml = EnvelopeBuilder::new(actions::GET_MDIB)
            .to("https://device.example/get")
            .reply_to(actions::WSA_ANONYMOUS)
            .body("<msg:GetMdib/>")
            .build();

        let doc = reader::parse(&xml).unwrap();
        let headers = parse_headers(&doc, &xml, true).unwrap();
        assert_eq!(headers.action, actions::GET_MDIB);
        assert_eq!(headers.to.as_deref(), Some("https://device.example/get"));
        assert_eq!(headers.reply_to.as_deref(), Some(actions::WSA_ANONYMOUS));
        assert!(headers.message_id.unwrap().starts_with("urn:uuid:"));

        let body = body_element(&doc).unwrap();
        assert!(body.has_tag_name((ns::MSG, "GetMdib")));
    }

    #[test]
    fn test_reference_parameter_marking() {
        let xml = EnvelopeBuilder::new("urn:test")
            .reference_parameter("<msg:Identifier>abc</msg:Identifier>")
            .body("<msg:Renew/>")
            .build();
        assert!(xml.contains(
            r#"<msg:Identifier wsa:IsReferenceParameter="true">abc</msg:Identifier>"#
        ));

        let doc = reader::parse(&xml).unwrap();
        let headers = parse_headers(&doc, &xml, true).unwrap();
        assert_eq!(headers.reference_parameters.len(), 1);
        assert!(headers.reference_parameters[0].contains("abc"));
    }

    #[test]
    fn test_mark_self_closing_parameter() {
        assert_eq!(
            mark_reference_parameter("<msg:Id/>"),
            r#"<msg:Id wsa:IsReferenceParameter="true"/>"#
        );
        // Already marked: left alone.
        let marked = r#"<msg:Id wsa:IsReferenceParameter="true"/>"#;
        assert_eq!(mark_reference_parameter(marked), marked);
    }

    #[test]
    fn test_mdib_headers_roundtrip() {
        let sequence_id = Uuid::generate();
        let xml = EnvelopeBuilder::new(actions::EPISODIC_METRIC_REPORT)
            .mdib_headers(MdibHeaders {
                mdib_version: 42,
                sequence_id,
                instance_id: Some(7),
            })
            .body("<msg:EpisodicMetricReport/>")
            .build();

        let doc = reader::parse(&xml).unwrap();
        let mdib = parse_mdib_headers(&doc).unwrap().unwrap();
        assert_eq!(mdib.mdib_version, 42);
        assert_eq!(mdib.sequence_id, sequence_id);
        assert_eq!(mdib.instance_id, Some(7));
    }

    #[test]
    fn test_mdib_headers_from_body_attributes() {
        let sequence_id = Uuid::generate();
        let body = format!(
            r#"<msg:GetMdibResponse MdibVersion="9" SequenceId="{}"/>"#,
            sequence_id.to_urn()
        );
        let xml = EnvelopeBuilder::new(actions::GET_MDIB_RESPONSE)
            .body(&body)
            .build();
        let doc = reader::parse(&xml).unwrap();
        let mdib = parse_mdib_headers(&doc).unwrap().unwrap();
        assert_eq!(mdib.mdib_version, 9);
        assert_eq!(mdib.sequence_id, sequence_id);
        assert_eq!(mdib.instance_id, None);
    }

    #[test]
    fn test_strict_requires_action() {
        let xml = EnvelopeBuilder::new("").body("<msg:GetMdib/>").build();
        let doc = reader::parse(&xml).unwrap();
        assert!(parse_headers(&doc, &xml, true).is_err());
        assert!(parse_headers(&doc, &xml, false).is_ok());
    }

    #[test]
    fn test_empty_body_is_error() {
        let xml = EnvelopeBuilder::new("urn:test").build();
        let doc = reader::parse(&xml).unwrap();
        assert!(body_element(&doc).is_err());
    }
}
