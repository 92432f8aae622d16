// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOAP 1.2 fault encoding/decoding.

use std::fmt;

use roxmltree::Document;

use crate::biceps::qname::{ns, QName};
use crate::biceps::actions;
use crate::soap::envelope::{body_element, EnvelopeBuilder};
use crate::xml::{reader, XmlWriter};
use crate::{Error, Result};

/// SOAP 1.2 fault code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultCode {
    /// The message was malformed or not understood (`s12:Sender`).
    Sender,
    /// The receiver failed to process a valid message (`s12:Receiver`).
    Receiver,
}

impl FaultCode {
    fn as_lexical(self) -> &'static str {
        match self {
            Self::Sender => "s12:Sender",
            Self::Receiver => "s12:Receiver",
        }
    }
}

/// A SOAP fault, either to be sent or received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: FaultCode,
    /// Qualified subcode value, e.g. `wsa:ActionNotSupported` or
    /// `wse:UnableToRenew`.
    pub subcode: Option<String>,
    pub reason: String,
    pub detail: Option<String>,
}

impl Fault {
    pub fn sender(subcode: &str, reason: &str) -> Self {
        Self {
            code: FaultCode::Sender,
            subcode: Some(subcode.to_string()),
            reason: reason.to_string(),
            detail: None,
        }
    }

    pub fn receiver(reason: &str) -> Self {
        Self {
            code: FaultCode::Receiver,
            subcode: None,
            reason: reason.to_string(),
            detail: None,
        }
    }

    /// Plain Sender fault without a subcode (malformed envelope).
    pub fn malformed(reason: &str) -> Self {
        Self {
            code: FaultCode::Sender,
            subcode: None,
            reason: reason.to_string(),
            detail: None,
        }
    }

    /// `wsa:ActionNotSupported` for an unroutable action.
    pub fn action_not_supported(action: &str) -> Self {
        let mut fault = Self::sender("wsa:ActionNotSupported", "The action is not supported.");
        fault.detail = Some(action.to_string());
        fault
    }

    /// WS-Eventing `UnableToRenew`/unknown-subscription fault.
    pub fn unknown_subscription() -> Self {
        Self::sender(
            "wse:UnableToRenew",
            "The subscription is not known to this source.",
        )
    }

    /// WS-Eventing `InvalidExpirationTime` fault.
    pub fn invalid_expiration() -> Self {
        Self::sender(
            "wse:InvalidExpirationTime",
            "The expiration time requested is invalid.",
        )
    }

    /// WS-Eventing `DeliveryModeRequestedUnavailable` fault.
    pub fn delivery_mode_unavailable() -> Self {
        Self::sender(
            "wse:DeliveryModeRequestedUnavailable",
            "The requested delivery mode is not supported.",
        )
    }

    /// WS-Eventing `EventSourceUnableToProcess` fault.
    pub fn unable_to_process(reason: &str) -> Self {
        Self::sender("wse:EventSourceUnableToProcess", reason)
    }

    /// True for faults that authoritatively end a subscription on the
    /// sending side (the consumer must resubscribe, not retry).
    pub fn ends_subscription(&self) -> bool {
        self.subcode
            .as_deref()
            .is_some_and(|s| s.ends_with("UnableToRenew"))
    }

    /// Serialize as a complete fault envelope relating to `relates_to`.
    pub fn to_envelope(&self, relates_to: Option<&str>) -> String {
        let mut w = XmlWriter::new();
        w.open(QName::new(ns::SOAP, "Fault"));
        w.open(QName::new(ns::SOAP, "Code"));
        w.leaf(QName::new(ns::SOAP, "Value"), self.code.as_lexical());
        if let Some(subcode) = &self.subcode {
            w.open(QName::new(ns::SOAP, "Subcode"));
            w.leaf(QName::new(ns::SOAP, "Value"), subcode);
            w.close();
        }
        w.close(); // Code
        w.open(QName::new(ns::SOAP, "Reason"));
        w.open(QName::new(ns::SOAP, "Text"));
        w.attr("xml:lang", "en");
        w.text(&self.reason);
        w.close();
        w.close(); // Reason
        if let Some(detail) = &self.detail {
            w.open(QName::new(ns::SOAP, "Detail"));
            w.text(detail);
            w.close();
        }
        w.close(); // Fault

        let mut builder = EnvelopeBuilder::new(actions::SOAP_FAULT).body(&w.finish());
        if let Some(relates_to) = relates_to {
            builder = builder.relates_to(relates_to);
        }
        builder.build()
    }

    /// Decode a fault from a parsed envelope body, if it is one.
    pub fn from_body(doc: &Document<'_>) -> Result<Option<Fault>> {
        let Ok(body) = body_element(doc) else {
            return Ok(None);
        };
        if !body.has_tag_name((ns::SOAP, "Fault")) {
            return Ok(None);
        }
        let code_node = reader::require_child(body, ns::SOAP, "Code")?;
        let value = reader::require_child(code_node, ns::SOAP, "Value")?;
        let code = if reader::text(value).ends_with("Receiver") {
            FaultCode::Receiver
        } else {
            FaultCode::Sender
        };
        let subcode = reader::child(code_node, ns::SOAP, "Subcode")
            .and_then(|subcode| reader::child(subcode, ns::SOAP, "Value"))
            .map(|value| reader::text(value).to_string());
        let reason = reader::child(body, ns::SOAP, "Reason")
            .and_then(|reason| reader::child(reason, ns::SOAP, "Text"))
            .map(|text| reader::text(text).to_string())
            .unwrap_or_default();
        let detail = reader::child(body, ns::SOAP, "Detail")
            .map(|detail| reader::text(detail).to_string())
            .filter(|s| !s.is_empty());
        Ok(Some(Fault {
            code,
            subcode,
            reason,
            detail,
        }))
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subcode {
            Some(subcode) => write!(f, "[{}] {}", subcode, self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        Error::Fault(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_envelope_roundtrip() {
        let fault = Fault::action_not_supported("urn:bogus");
        let xml = fault.to_envelope(Some("urn:uuid:abc"));
        let doc = reader::parse(&xml).unwrap();
        let decoded = Fault::from_body(&doc).unwrap().unwrap();
        assert_eq!(decoded, fault);
    }

    #[test]
    fn test_non_fault_body() {
        let xml = EnvelopeBuilder::new("urn:test")
            .body("<msg:GetMdib/>")
            .build();
        let doc = reader::parse(&xml).unwrap();
        assert!(Fault::from_body(&doc).unwrap().is_none());
    }

    #[test]
    fn test_receiver_fault_code() {
        let fault = Fault::receiver("internal error");
        let xml = fault.to_envelope(None);
        let doc = reader::parse(&xml).unwrap();
        let decoded = Fault::from_body(&doc).unwrap().unwrap();
        assert_eq!(decoded.code, FaultCode::Receiver);
        assert!(decoded.subcode.is_none());
    }

    #[test]
    fn test_ends_subscription() {
        assert!(Fault::unknown_subscription().ends_subscription());
        assert!(!Fault::invalid_expiration().ends_subscription());
        assert!(!Fault::receiver("x").ends_subscription());
    }
}
