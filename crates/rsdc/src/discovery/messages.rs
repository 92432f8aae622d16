// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WS-Discovery 2005/04 message codec (SOAP-over-UDP payloads).

use roxmltree::{Document, Node};

use crate::biceps::actions;
use crate::biceps::qname::{self, ns, QName};
use crate::soap::{parse_headers, EnvelopeBuilder, WsaHeaders};
use crate::xml::{reader, XmlWriter};
use crate::{Error, Result};

/// An owned qualified name (remote types are not in our static tables).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QNameOwned {
    pub ns: String,
    pub local: String,
}

impl QNameOwned {
    pub fn new(ns: &str, local: &str) -> Self {
        Self {
            ns: ns.to_string(),
            local: local.to_string(),
        }
    }

    /// The DPWS device type every provider advertises.
    pub fn dpws_device() -> Self {
        Self::new(ns::DPWS, "Device")
    }

    /// The MDPWS medical device type.
    pub fn medical_device() -> Self {
        Self::new(ns::MDPWS, "MedicalDevice")
    }
}

/// Per-node `wsd:AppSequence` values (ordering hint for receivers).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AppSequence {
    pub instance_id: u64,
    pub message_number: u64,
}

impl AppSequence {
    fn header_element(&self) -> String {
        format!(
            r#"<wsd:AppSequence InstanceId="{}" MessageNumber="{}"/>"#,
            self.instance_id, self.message_number
        )
    }
}

/// Announcement payload shared by Hello, ProbeMatch and ResolveMatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Announcement {
    pub endpoint: String,
    pub types: Vec<QNameOwned>,
    pub scopes: Vec<String>,
    pub xaddrs: Vec<String>,
    pub metadata_version: u64,
}

/// Parsed Probe body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Probe {
    pub types: Vec<QNameOwned>,
    pub scopes: Vec<String>,
    pub match_by: Option<String>,
}

/// A classified inbound discovery message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    Hello(Announcement),
    Bye { endpoint: String },
    Probe(Probe),
    ProbeMatches(Vec<Announcement>),
    Resolve { endpoint: String },
    ResolveMatches(Option<Announcement>),
}

// ------------------------------------------------------------------ encode

fn encode_endpoint_reference(w: &mut XmlWriter, endpoint: &str) {
    w.open(QName::new(ns::WSA, "EndpointReference"));
    w.leaf(QName::new(ns::WSA, "Address"), endpoint);
    w.close();
}

fn encode_types(w: &mut XmlWriter, types: &[QNameOwned]) {
    if types.is_empty() {
        return;
    }
    let lexical: Vec<String> = types
        .iter()
        .map(|t| {
            match qname::PREFIXES.iter().find(|(_, uri)| *uri == t.ns) {
                Some((prefix, _)) => format!("{}:{}", prefix, t.local),
                None => t.local.clone(),
            }
        })
        .collect();
    w.leaf(QName::new(ns::WSD, "Types"), &lexical.join(" "));
}

fn encode_scopes(w: &mut XmlWriter, scopes: &[String], match_by: Option<&str>) {
    if scopes.is_empty() && match_by.is_none() {
        return;
    }
    w.open(QName::new(ns::WSD, "Scopes"));
    if let Some(match_by) = match_by {
        w.attr("MatchBy", match_by);
    }
    w.text(&scopes.join(" "));
    w.close();
}

fn encode_announcement_into(w: &mut XmlWriter, element: QName, announcement: &Announcement) {
    w.open(element);
    encode_endpoint_reference(w, &announcement.endpoint);
    encode_types(w, &announcement.types);
    encode_scopes(w, &announcement.scopes, None);
    if !announcement.xaddrs.is_empty() {
        w.leaf(QName::new(ns::WSD, "XAddrs"), &announcement.xaddrs.join(" "));
    }
    w.leaf(
        QName::new(ns::WSD, "MetadataVersion"),
        &announcement.metadata_version.to_string(),
    );
    w.close();
}

/// Multicast Hello envelope.
pub fn encode_hello(announcement: &Announcement, sequence: AppSequence) -> String {
    let mut w = XmlWriter::new();
    encode_announcement_into(&mut w, QName::new(ns::WSD, "Hello"), announcement);
    EnvelopeBuilder::new(actions::HELLO)
        .to(actions::DISCOVERY_URN)
        .header(&sequence.header_element())
        .body(&w.finish())
        .build()
}

/// Multicast Bye envelope.
pub fn encode_bye(endpoint: &str, sequence: AppSequence) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::WSD, "Bye"));
    encode_endpoint_reference(&mut w, endpoint);
    w.close();
    EnvelopeBuilder::new(actions::BYE)
        .to(actions::DISCOVERY_URN)
        .header(&sequence.header_element())
        .body(&w.finish())
        .build()
}

/// Multicast Probe envelope. Returns `(envelope, message_id)` so the sender
/// can correlate ProbeMatches via `RelatesTo`.
pub fn encode_probe(probe: &Probe) -> (String, String) {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::WSD, "Probe"));
    encode_types(&mut w, &probe.types);
    encode_scopes(&mut w, &probe.scopes, probe.match_by.as_deref());
    w.close();
    let message_id = crate::ident::Uuid::generate().to_urn();
    let envelope = EnvelopeBuilder::new(actions::PROBE)
        .to(actions::DISCOVERY_URN)
        .message_id(&message_id)
        .body(&w.finish())
        .build();
    (envelope, message_id)
}

/// Unicast ProbeMatches envelope relating to the probe's MessageID.
pub fn encode_probe_matches(
    matches: &[Announcement],
    relates_to: &str,
    sequence: AppSequence,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::WSD, "ProbeMatches"));
    for announcement in matches {
        encode_announcement_into(&mut w, QName::new(ns::WSD, "ProbeMatch"), announcement);
    }
    w.close();
    EnvelopeBuilder::new(actions::PROBE_MATCHES)
        .to(actions::WSA_ANONYMOUS)
        .relates_to(relates_to)
        .header(&sequence.header_element())
        .body(&w.finish())
        .build()
}

/// Multicast Resolve envelope. Returns `(envelope, message_id)`.
pub fn encode_resolve(endpoint: &str) -> (String, String) {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::WSD, "Resolve"));
    encode_endpoint_reference(&mut w, endpoint);
    w.close();
    let message_id = crate::ident::Uuid::generate().to_urn();
    let envelope = EnvelopeBuilder::new(actions::RESOLVE)
        .to(actions::DISCOVERY_URN)
        .message_id(&message_id)
        .body(&w.finish())
        .build();
    (envelope, message_id)
}

/// Unicast ResolveMatches envelope.
pub fn encode_resolve_matches(
    announcement: &Announcement,
    relates_to: &str,
    sequence: AppSequence,
) -> String {
    let mut w = XmlWriter::new();
    w.open(QName::new(ns::WSD, "ResolveMatches"));
    encode_announcement_into(&mut w, QName::new(ns::WSD, "ResolveMatch"), announcement);
    w.close();
    EnvelopeBuilder::new(actions::RESOLVE_MATCHES)
        .to(actions::WSA_ANONYMOUS)
        .relates_to(relates_to)
        .header(&sequence.header_element())
        .body(&w.finish())
        .build()
}

// ------------------------------------------------------------------ decode

fn decode_qname_list(node: Node<'_, '_>) -> Vec<QNameOwned> {
    reader::text(node)
        .split_ascii_whitespace()
        .filter_map(|lexical| {
            qname::resolve_lexical(&node, lexical)
                .map(|(uri, local)| QNameOwned::new(&uri, local))
        })
        .collect()
}

fn decode_endpoint(node: Node<'_, '_>) -> Result<String> {
    let epr = reader::require_child(node, ns::WSA, "EndpointReference")?;
    Ok(reader::text(reader::require_child(epr, ns::WSA, "Address")?).to_string())
}

fn decode_announcement(node: Node<'_, '_>) -> Result<Announcement> {
    let types = reader::child(node, ns::WSD, "Types")
        .map(decode_qname_list)
        .unwrap_or_default();
    let scopes = reader::child(node, ns::WSD, "Scopes")
        .map(|scopes| {
            reader::text(scopes)
                .split_ascii_whitespace()
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let xaddrs = reader::child(node, ns::WSD, "XAddrs")
        .map(|xaddrs| {
            reader::text(xaddrs)
                .split_ascii_whitespace()
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let metadata_version = match reader::child(node, ns::WSD, "MetadataVersion") {
        Some(version) => reader::text(version)
            .parse::<u64>()
            .map_err(|_| Error::Xml("bad MetadataVersion".to_string()))?,
        None => 1,
    };
    Ok(Announcement {
        endpoint: decode_endpoint(node)?,
        types,
        scopes,
        xaddrs,
        metadata_version,
    })
}

/// Classify and decode one inbound discovery datagram. Returns the parsed
/// WS-Addressing headers alongside the typed message.
pub fn decode_datagram(input: &str) -> Result<(WsaHeaders, DiscoveryMessage)> {
    let doc: Document<'_> = reader::parse(input)?;
    let headers = parse_headers(&doc, input, true)?;
    let body = crate::soap::body_element(&doc)?;

    let message = match headers.action.as_str() {
        actions::HELLO => DiscoveryMessage::Hello(decode_announcement(body)?),
        actions::BYE => DiscoveryMessage::Bye {
            endpoint: decode_endpoint(body)?,
        },
        actions::PROBE => DiscoveryMessage::Probe(Probe {
            types: reader::child(body, ns::WSD, "Types")
                .map(decode_qname_list)
                .unwrap_or_default(),
            scopes: reader::child(body, ns::WSD, "Scopes")
                .map(|scopes| {
                    reader::text(scopes)
                        .split_ascii_whitespace()
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            match_by: reader::child(body, ns::WSD, "Scopes")
                .and_then(|scopes| scopes.attribute("MatchBy"))
                .map(str::to_string),
        }),
        actions::PROBE_MATCHES => DiscoveryMessage::ProbeMatches(
            reader::children(body, ns::WSD, "ProbeMatch")
                .into_iter()
                .map(decode_announcement)
                .collect::<Result<Vec<_>>>()?,
        ),
        actions::RESOLVE => DiscoveryMessage::Resolve {
            endpoint: decode_endpoint(body)?,
        },
        actions::RESOLVE_MATCHES => DiscoveryMessage::ResolveMatches(
            reader::child(body, ns::WSD, "ResolveMatch")
                .map(decode_announcement)
                .transpose()?,
        ),
        other => return Err(Error::UnknownAction(other.to_string())),
    };
    Ok((headers, message))
}
