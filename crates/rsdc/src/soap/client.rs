// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound SOAP request/response client.
//!
//! The HTTP(S) transport itself is pluggable: anything implementing
//! [`SoapPoster`] can carry envelopes. Idempotent requests are retried once
//! on transport errors; everything else surfaces to the caller.

use std::sync::Arc;

use crate::soap::envelope::{parse_headers, parse_mdib_headers, MdibHeaders, WsaHeaders};
use crate::soap::fault::Fault;
use crate::soap::EnvelopeBuilder;
use crate::xml::reader;
use crate::{Error, Result};

/// Transport seam: POST one SOAP envelope, return the response body.
///
/// An empty response string means HTTP 202 (accepted one-way message).
pub trait SoapPoster: Send + Sync {
    fn post(&self, endpoint: &str, envelope: &str) -> Result<String>;
}

/// A parsed response envelope, owning its text.
pub struct ResponseEnvelope {
    xml: String,
    pub headers: WsaHeaders,
    pub mdib: Option<MdibHeaders>,
}

impl ResponseEnvelope {
    /// Parse a response; a fault body becomes `Error::Fault`.
    pub fn parse(xml: String) -> Result<Self> {
        let (headers, mdib) = {
            let doc = reader::parse(&xml)?;
            if let Some(fault) = Fault::from_body(&doc)? {
                return Err(Error::Fault(fault));
            }
            (
                parse_headers(&doc, &xml, false)?,
                parse_mdib_headers(&doc)?,
            )
        };
        Ok(Self { xml, headers, mdib })
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Re-parse and hand the body element to `f`. roxmltree borrows from
    /// the owned text, so navigation happens inside the closure.
    pub fn with_body<T>(
        &self,
        f: impl FnOnce(roxmltree::Node<'_, '_>, &str) -> Result<T>,
    ) -> Result<T> {
        let doc = reader::parse(&self.xml)?;
        let body = crate::soap::envelope::body_element(&doc)?;
        f(body, &self.xml)
    }
}

/// Request/response client over a pluggable poster.
#[derive(Clone)]
pub struct SoapClient {
    poster: Arc<dyn SoapPoster>,
}

impl SoapClient {
    pub fn new(poster: Arc<dyn SoapPoster>) -> Self {
        Self { poster }
    }

    pub fn poster(&self) -> Arc<dyn SoapPoster> {
        Arc::clone(&self.poster)
    }

    /// Send a request and parse the response. `idempotent` requests are
    /// retried once after a transport error; non-idempotent ones are not.
    pub fn request(
        &self,
        endpoint: &str,
        envelope: EnvelopeBuilder,
        idempotent: bool,
    ) -> Result<ResponseEnvelope> {
        let request = envelope.to(endpoint).build();
        let response = match self.poster.post(endpoint, &request) {
            Ok(response) => response,
            Err(error) if idempotent && is_transient(&error) => {
                log::debug!(
                    "[soap] transient error to {}, retrying once: {}",
                    endpoint,
                    error
                );
                self.poster.post(endpoint, &request)?
            }
            Err(error) => return Err(error),
        };
        ResponseEnvelope::parse(response)
    }

    /// Fire a one-way message (notification); no response expected.
    pub fn send(&self, endpoint: &str, envelope: EnvelopeBuilder) -> Result<()> {
        let request = envelope.to(endpoint).build();
        self.poster.post(endpoint, &request).map(|_| ())
    }
}

fn is_transient(error: &Error) -> bool {
    matches!(
        error,
        Error::PostFailed(_) | Error::Timeout(_) | Error::IoError(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::qname::ns;
    use parking_lot::Mutex;

    /// Poster failing the first N posts, then answering with a canned body.
    struct FlakyPoster {
        failures_left: Mutex<u32>,
        response_body: String,
        posts: Mutex<u32>,
    }

    impl FlakyPoster {
        fn new(failures: u32, body: &str) -> Self {
            Self {
                failures_left: Mutex::new(failures),
                response_body: body.to_string(),
                posts: Mutex::new(0),
            }
        }
    }

    impl SoapPoster for FlakyPoster {
        fn post(&self, _endpoint: &str, _envelope: &str) -> Result<String> {
            *self.posts.lock() += 1;
            let mut failures = self.failures_left.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::PostFailed("connection refused".to_string()));
            }
            Ok(EnvelopeBuilder::new("urn:test/Response")
                .body(&self.response_body)
                .build())
        }
    }

    #[test]
    fn test_idempotent_retry_once() {
        let poster = Arc::new(FlakyPoster::new(1, "<msg:Ok/>"));
        let client = SoapClient::new(Arc::clone(&poster) as Arc<dyn SoapPoster>);
        let response = client
            .request("http://device/get", EnvelopeBuilder::new("urn:test"), true)
            .unwrap();
        assert_eq!(response.headers.action, "urn:test/Response");
        assert_eq!(*poster.posts.lock(), 2);
    }

    #[test]
    fn test_non_idempotent_no_retry() {
        let poster = Arc::new(FlakyPoster::new(1, "<msg:Ok/>"));
        let client = SoapClient::new(Arc::clone(&poster) as Arc<dyn SoapPoster>);
        let result = client.request(
            "http://device/set",
            EnvelopeBuilder::new("urn:test"),
            false,
        );
        assert!(matches!(result, Err(Error::PostFailed(_))));
        assert_eq!(*poster.posts.lock(), 1);
    }

    #[test]
    fn test_fault_response_is_error() {
        struct FaultPoster;
        impl SoapPoster for FaultPoster {
            fn post(&self, _: &str, _: &str) -> Result<String> {
                Ok(Fault::unknown_subscription().to_envelope(None))
            }
        }
        let client = SoapClient::new(Arc::new(FaultPoster));
        let result = client.request("http://device", EnvelopeBuilder::new("urn:test"), true);
        match result {
            Err(Error::Fault(fault)) => assert!(fault.ends_subscription()),
            other => panic!("expected fault, got {:?}", other.map(|r| r.headers.action)),
        }
    }

    #[test]
    fn test_with_body_navigation() {
        let poster = Arc::new(FlakyPoster::new(0, "<msg:Payload>42</msg:Payload>"));
        let client = SoapClient::new(poster as Arc<dyn SoapPoster>);
        let response = client
            .request("http://device", EnvelopeBuilder::new("urn:test"), true)
            .unwrap();
        let value = response
            .with_body(|body, _| {
                assert!(body.has_tag_name((ns::MSG, "Payload")));
                Ok(reader::text(body).to_string())
            })
            .unwrap();
        assert_eq!(value, "42");
    }
}
