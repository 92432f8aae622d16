// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Canonical names: namespaces, qualified names and the static QName registry.
//!
//! Decoding dispatches on `(namespace, local name)` through the compile-time
//! tables below instead of any runtime type registry. **NEVER hardcode a
//! namespace URI elsewhere!**

use std::fmt;

/// Namespace URIs of every vocabulary on the wire.
pub mod ns {
    /// SOAP 1.2 envelope
    pub const SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
    /// WS-Addressing 2005/08
    pub const WSA: &str = "http://www.w3.org/2005/08/addressing";
    /// WS-Eventing
    pub const WSE: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing";
    /// WS-Discovery 2005/04
    pub const WSD: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";
    /// WS-Transfer (DPWS metadata exchange)
    pub const WXF: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer";
    /// WS-MetadataExchange
    pub const WSX: &str = "http://schemas.xmlsoap.org/ws/2004/09/mex";
    /// DPWS 1.1
    pub const DPWS: &str = "http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01";
    /// MDPWS (IEEE 11073-20702)
    pub const MDPWS: &str = "http://standards.ieee.org/downloads/11073/11073-20702-2016";
    /// BICEPS participant model (IEEE 11073-10207)
    pub const PM: &str = "http://standards.ieee.org/downloads/11073/11073-10207-2017/participant";
    /// BICEPS message model (IEEE 11073-10207)
    pub const MSG: &str = "http://standards.ieee.org/downloads/11073/11073-10207-2017/message";
    /// BICEPS extension model
    pub const EXT: &str = "http://standards.ieee.org/downloads/11073/11073-10207-2017/extension";
    /// XML Schema instance (xsi:type dispatch)
    pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
    /// SDC glue (IEEE 11073-20701), base of all service action URIs
    pub const SDC: &str = "http://standards.ieee.org/downloads/11073/11073-20701-2018";
}

/// Default prefix table used by the XML writer. Order is the declaration
/// order on the envelope root.
pub const PREFIXES: &[(&str, &str)] = &[
    ("s12", ns::SOAP),
    ("wsa", ns::WSA),
    ("wse", ns::WSE),
    ("wsd", ns::WSD),
    ("wxf", ns::WXF),
    ("dpws", ns::DPWS),
    ("mdpws", ns::MDPWS),
    ("pm", ns::PM),
    ("msg", ns::MSG),
    ("ext", ns::EXT),
    ("xsi", ns::XSI),
];

/// A qualified name with static namespace and local part.
///
/// All names the stack ever emits are canonical entries of the tables in this
/// module; parsed names are compared against them without allocation.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub ns: &'static str,
    pub local: &'static str,
}

impl QName {
    pub const fn new(ns: &'static str, local: &'static str) -> Self {
        Self { ns, local }
    }

    /// True if a parsed `(namespace, local)` pair names this QName.
    pub fn matches(&self, ns: &str, local: &str) -> bool {
        self.ns == ns && self.local == local
    }

    /// Writer prefix for this QName's namespace, from [`PREFIXES`].
    pub fn prefix(&self) -> Option<&'static str> {
        PREFIXES
            .iter()
            .find(|(_, uri)| *uri == self.ns)
            .map(|(prefix, _)| *prefix)
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix() {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => write!(f, "{{{}}}{}", self.ns, self.local),
        }
    }
}

impl fmt::Debug for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QName({})", self)
    }
}

/// Parse a lexical QName (`prefix:local`) against the in-scope namespaces of
/// a roxmltree node. Used for `xsi:type` and probe `wsd:Types` values.
pub fn resolve_lexical<'a>(
    node: &roxmltree::Node<'a, '_>,
    lexical: &'a str,
) -> Option<(String, &'a str)> {
    let (prefix, local) = match lexical.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, lexical),
    };
    let uri = node.lookup_namespace_uri(prefix)?;
    Some((uri.to_string(), local))
}
