// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! roxmltree helpers shared by every decoder.

use roxmltree::{Document, Node};

use crate::biceps::qname;
use crate::{Error, Result};

/// Parse a document, mapping the parser error into [`Error::Xml`].
pub fn parse(xml: &str) -> Result<Document<'_>> {
    Document::parse(xml).map_err(|e| Error::Xml(format!("parse: {}", e)))
}

/// First child element with the given namespace and local name.
pub fn child<'a, 'input>(
    node: Node<'a, 'input>,
    ns: &str,
    local: &str,
) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.has_tag_name((ns, local)))
}

/// All child elements with the given namespace and local name, in document
/// order.
pub fn children<'a, 'input>(
    node: Node<'a, 'input>,
    ns: &str,
    local: &str,
) -> Vec<Node<'a, 'input>> {
    node.children()
        .filter(|n| n.is_element() && n.has_tag_name((ns, local)))
        .collect()
}

/// Child element that must exist.
pub fn require_child<'a, 'input>(
    node: Node<'a, 'input>,
    ns: &str,
    local: &str,
) -> Result<Node<'a, 'input>> {
    child(node, ns, local)
        .ok_or_else(|| Error::Xml(format!("missing <{}> in <{}>", local, node.tag_name().name())))
}

/// Attribute that must exist.
pub fn require_attr<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name)
        .ok_or_else(|| Error::Xml(format!("missing @{} on <{}>", name, node.tag_name().name())))
}

/// Optional attribute parsed as u64.
pub fn attr_u64(node: Node<'_, '_>, name: &str) -> Result<Option<u64>> {
    match node.attribute(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::Xml(format!("@{}='{}' is not an unsigned integer", name, raw))),
    }
}

/// Optional attribute parsed as f64.
pub fn attr_f64(node: Node<'_, '_>, name: &str) -> Result<Option<f64>> {
    match node.attribute(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| Error::Xml(format!("@{}='{}' is not a number", name, raw))),
    }
}

/// Optional attribute parsed as xsd:boolean.
pub fn attr_bool(node: Node<'_, '_>, name: &str) -> Result<Option<bool>> {
    match node.attribute(name) {
        None => Ok(None),
        Some("true" | "1") => Ok(Some(true)),
        Some("false" | "0") => Ok(Some(false)),
        Some(other) => Err(Error::Xml(format!("@{}='{}' is not a boolean", name, other))),
    }
}

/// Trimmed character content of a node.
pub fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().map(str::trim).unwrap_or("")
}

/// Resolved `xsi:type` of a node: `(namespace, local)`.
pub fn xsi_type<'a>(node: Node<'a, '_>) -> Result<Option<(String, &'a str)>> {
    let Some(lexical) = node.attribute((qname::ns::XSI, "type")) else {
        return Ok(None);
    };
    qname::resolve_lexical(&node, lexical)
        .map(Some)
        .ok_or_else(|| Error::Xml(format!("unresolvable xsi:type '{}'", lexical)))
}

/// Source text of an element, straight from the input buffer.
pub fn source_slice<'input>(node: Node<'_, 'input>, input: &'input str) -> &'input str {
    &input[node.range()]
}

/// Wrap a raw element fragment in a root that declares every canonical
/// prefix, so fragments sliced out of our own documents parse standalone.
pub fn fragment_document(raw: &str) -> Result<String> {
    let mut root = String::from("<fragment");
    for (prefix, uri) in crate::biceps::qname::PREFIXES {
        root.push_str(&format!(r#" xmlns:{}="{}""#, prefix, uri));
    }
    root.push('>');
    root.push_str(raw);
    root.push_str("</fragment>");
    // Validate eagerly so callers get one error site.
    Document::parse(&root).map_err(|e| Error::Xml(format!("fragment: {}", e)))?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::ns;

    const XML: &str = r#"<root xmlns:pm="http://standards.ieee.org/downloads/11073/11073-10207-2017/participant" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
        <pm:State xsi:type="pm:NumericMetricState" StateVersion="5" Flag="true" Res="0.5">text</pm:State>
        <pm:State StateVersion="6"/>
    </root>"#;

    #[test]
    fn test_child_lookup() {
        let doc = parse(XML).unwrap();
        let root = doc.root_element();
        assert!(child(root, ns::PM, "State").is_some());
        assert!(child(root, ns::PM, "Missing").is_none());
        assert_eq!(children(root, ns::PM, "State").len(), 2);
        assert!(require_child(root, ns::PM, "Missing").is_err());
    }

    #[test]
    fn test_attr_parsers() {
        let doc = parse(XML).unwrap();
        let state = child(doc.root_element(), ns::PM, "State").unwrap();
        assert_eq!(attr_u64(state, "StateVersion").unwrap(), Some(5));
        assert_eq!(attr_bool(state, "Flag").unwrap(), Some(true));
        assert_eq!(attr_f64(state, "Res").unwrap(), Some(0.5));
        assert_eq!(attr_u64(state, "Absent").unwrap(), None);
        assert!(require_attr(state, "Absent").is_err());
        assert!(attr_u64(state, "Flag").is_err());
    }

    #[test]
    fn test_xsi_type_resolution() {
        let doc = parse(XML).unwrap();
        let states = children(doc.root_element(), ns::PM, "State");
        let mut states = states.into_iter();
        let typed = states.next().unwrap();
        let (uri, local) = xsi_type(typed).unwrap().unwrap();
        assert_eq!(uri, ns::PM);
        assert_eq!(local, "NumericMetricState");

        let untyped = states.next().unwrap();
        assert!(xsi_type(untyped).unwrap().is_none());
    }

    #[test]
    fn test_source_slice() {
        let doc = parse(XML).unwrap();
        let state = child(doc.root_element(), ns::PM, "State").unwrap();
        let slice = source_slice(state, XML);
        assert!(slice.starts_with("<pm:State"));
        assert!(slice.ends_with("</pm:State>"));
    }
}
