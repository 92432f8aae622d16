// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Namespace-aware XML writer.
//!
//! All wire payloads are built through this writer, the same way the
//! reference middleware hand-builds its packets. Prefixes come from the
//! canonical table in [`crate::biceps::qname`]; the root element declares
//! them once and every nested element reuses them.

use crate::biceps::qname::{QName, PREFIXES};

/// Streaming XML writer over a `String` buffer.
///
/// Invariant: after `open()` the element tag stays open for attributes until
/// the first child/text/close, at which point it is sealed (`>`), or
/// self-closed (`/>`) if nothing was written inside.
pub struct XmlWriter {
    buf: String,
    stack: Vec<String>,
    tag_open: bool,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self {
            buf: String::with_capacity(1024),
            stack: Vec::new(),
            tag_open: false,
        }
    }

    /// Open the document root, declaring every canonical prefix.
    pub fn open_root(&mut self, name: QName) -> &mut Self {
        self.open(name);
        for (prefix, uri) in PREFIXES {
            self.attr(&format!("xmlns:{}", prefix), uri);
        }
        self
    }

    /// Open a nested element.
    pub fn open(&mut self, name: QName) -> &mut Self {
        self.seal();
        let qualified = Self::qualified(name);
        self.buf.push('<');
        self.buf.push_str(&qualified);
        self.stack.push(qualified);
        self.tag_open = true;
        self
    }

    /// Write an attribute on the currently open tag.
    ///
    /// `name` is the literal attribute name, optionally prefixed
    /// (`Handle`, `xsi:type`, `wsa:IsReferenceParameter`).
    pub fn attr(&mut self, name: &str, value: &str) -> &mut Self {
        debug_assert!(self.tag_open, "attr() outside an open tag");
        self.buf.push(' ');
        self.buf.push_str(name);
        self.buf.push_str("=\"");
        escape_into(&mut self.buf, value, true);
        self.buf.push('"');
        self
    }

    /// Write an attribute whose value is a canonical QName (`xsi:type`).
    pub fn attr_qname(&mut self, name: &str, value: QName) -> &mut Self {
        let lexical = match value.prefix() {
            Some(prefix) => format!("{}:{}", prefix, value.local),
            None => value.local.to_string(),
        };
        self.attr(name, &lexical)
    }

    /// Escaped character content.
    pub fn text(&mut self, text: &str) -> &mut Self {
        self.seal();
        escape_into(&mut self.buf, text, false);
        self
    }

    /// Verbatim XML (preserved source snippets, opaque reference
    /// parameters). The caller guarantees well-formedness.
    pub fn raw(&mut self, xml: &str) -> &mut Self {
        self.seal();
        self.buf.push_str(xml);
        self
    }

    /// Close the innermost open element.
    pub fn close(&mut self) -> &mut Self {
        let qualified = self.stack.pop().unwrap_or_default();
        if self.tag_open {
            self.buf.push_str("/>");
            self.tag_open = false;
        } else {
            self.buf.push_str("</");
            self.buf.push_str(&qualified);
            self.buf.push('>');
        }
        self
    }

    /// `<name>text</name>` in one call.
    pub fn leaf(&mut self, name: QName, text: &str) -> &mut Self {
        self.open(name);
        self.text(text);
        self.close()
    }

    /// Consume the writer. Panics in debug builds if elements stay open.
    pub fn finish(mut self) -> String {
        debug_assert!(self.stack.is_empty(), "unclosed elements: {:?}", self.stack);
        while !self.stack.is_empty() {
            self.close();
        }
        self.buf
    }

    fn seal(&mut self) {
        if self.tag_open {
            self.buf.push('>');
            self.tag_open = false;
        }
    }

    fn qualified(name: QName) -> String {
        match name.prefix() {
            Some(prefix) => format!("{}:{}", prefix, name.local),
            None => name.local.to_string(),
        }
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal escaping: `&`, `<`, `>` everywhere, quotes only in attributes.
fn escape_into(buf: &mut String, text: &str, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' if attribute => buf.push_str("&quot;"),
            _ => buf.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::ns;

    #[test]
    fn test_nested_elements() {
        let mut w = XmlWriter::new();
        w.open(QName::new(ns::PM, "Mds"));
        w.attr("Handle", "mds0");
        w.open(QName::new(ns::PM, "Vmd"));
        w.attr("Handle", "vmd0");
        w.close();
        w.close();
        assert_eq!(
            w.finish(),
            r#"<pm:Mds Handle="mds0"><pm:Vmd Handle="vmd0"/></pm:Mds>"#
        );
    }

    #[test]
    fn test_root_declares_prefixes() {
        let mut w = XmlWriter::new();
        w.open_root(QName::new(ns::SOAP, "Envelope"));
        w.close();
        let xml = w.finish();
        assert!(xml.starts_with("<s12:Envelope"));
        assert!(xml.contains(r#"xmlns:pm="http://standards.ieee.org/downloads/11073/11073-10207-2017/participant""#));
        assert!(xml.contains(r#"xmlns:wsa="http://www.w3.org/2005/08/addressing""#));
    }

    #[test]
    fn test_escaping() {
        let mut w = XmlWriter::new();
        w.open(QName::new(ns::PM, "Value"));
        w.attr("Name", "a\"b<c");
        w.text("1 < 2 & 3 > 2");
        w.close();
        assert_eq!(
            w.finish(),
            r#"<pm:Value Name="a&quot;b&lt;c">1 &lt; 2 &amp; 3 &gt; 2</pm:Value>"#
        );
    }

    #[test]
    fn test_leaf_and_raw() {
        let mut w = XmlWriter::new();
        w.open(QName::new(ns::MSG, "Report"));
        w.leaf(QName::new(ns::PM, "Source"), "hr.num");
        w.raw("<pm:Opaque/>");
        w.close();
        assert_eq!(
            w.finish(),
            "<msg:Report><pm:Source>hr.num</pm:Source><pm:Opaque/></msg:Report>"
        );
    }

    #[test]
    fn test_parses_back() {
        let mut w = XmlWriter::new();
        w.open_root(QName::new(ns::SOAP, "Envelope"));
        w.open(QName::new(ns::SOAP, "Body"));
        w.leaf(QName::new(ns::MSG, "GetMdib"), "");
        w.close();
        w.close();
        let xml = w.finish();
        let doc = roxmltree::Document::parse(&xml).unwrap();
        assert!(doc
            .descendants()
            .any(|n| n.has_tag_name((ns::MSG, "GetMdib"))));
    }
}
