// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scope matching rules (WS-Discovery 2005/04 Sec.5.1).

/// RFC 3986 matching rule URI (the default when a Probe names none).
pub const MATCH_BY_RFC3986: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/rfc3986";
/// Exact string comparison rule URI.
pub const MATCH_BY_STRCMP0: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/strcmp0";
/// LDAP rule URI; evaluated as case-insensitive prefix here.
pub const MATCH_BY_LDAP: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/ldap";

/// Selected matching algorithm.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScopeMatcher {
    Rfc3986,
    Strcmp0,
    Ldap,
}

impl ScopeMatcher {
    /// Resolve a `MatchBy` attribute. Absent means RFC 3986; an unsupported
    /// rule yields `None` and the Probe MUST NOT be matched.
    pub fn from_match_by(match_by: Option<&str>) -> Option<Self> {
        match match_by {
            None => Some(Self::Rfc3986),
            Some(MATCH_BY_RFC3986) => Some(Self::Rfc3986),
            Some(MATCH_BY_STRCMP0) => Some(Self::Strcmp0),
            Some(MATCH_BY_LDAP) => Some(Self::Ldap),
            Some(_) => None,
        }
    }

    /// True if a supplied scope satisfies one requested scope.
    pub fn matches(&self, supplied: &str, requested: &str) -> bool {
        match self {
            Self::Strcmp0 => supplied == requested,
            Self::Ldap => {
                let supplied = supplied.to_ascii_lowercase();
                let requested = requested.to_ascii_lowercase();
                supplied.starts_with(&requested)
            }
            Self::Rfc3986 => rfc3986_matches(supplied, requested),
        }
    }

    /// Every requested scope must be satisfied by some supplied scope.
    pub fn matches_all(&self, supplied: &[String], requested: &[String]) -> bool {
        requested
            .iter()
            .all(|r| supplied.iter().any(|s| self.matches(s, r)))
    }
}

/// RFC 3986 rule: scheme and authority compare case-insensitively, the path
/// of the requested scope must be a complete-segment prefix of the supplied
/// path (case-sensitive), and query/fragment must be absent to match.
fn rfc3986_matches(supplied: &str, requested: &str) -> bool {
    let Some(supplied) = SplitUri::parse(supplied) else {
        return false;
    };
    let Some(requested) = SplitUri::parse(requested) else {
        return false;
    };
    if !supplied.scheme.eq_ignore_ascii_case(requested.scheme) {
        return false;
    }
    if !supplied.authority.eq_ignore_ascii_case(requested.authority) {
        return false;
    }

    let supplied_segments: Vec<&str> = supplied.path.split('/').filter(|s| !s.is_empty()).collect();
    let requested_segments: Vec<&str> =
        requested.path.split('/').filter(|s| !s.is_empty()).collect();
    if requested_segments.len() > supplied_segments.len() {
        return false;
    }
    supplied_segments
        .iter()
        .zip(&requested_segments)
        .all(|(s, r)| s == r)
}

struct SplitUri<'a> {
    scheme: &'a str,
    authority: &'a str,
    path: &'a str,
}

impl<'a> SplitUri<'a> {
    fn parse(uri: &'a str) -> Option<Self> {
        let (scheme, rest) = uri.split_once(':')?;
        if scheme.is_empty() {
            return None;
        }
        // Query and fragment never match under the RFC 3986 rule.
        if rest.contains('?') || rest.contains('#') {
            return None;
        }
        if let Some(rest) = rest.strip_prefix("//") {
            let (authority, path) = match rest.find('/') {
                Some(index) => rest.split_at(index),
                None => (rest, ""),
            };
            Some(Self {
                scheme,
                authority,
                path,
            })
        } else {
            // Opaque URIs (sdc.ctxt.loc:/...): empty authority, rest is path.
            Some(Self {
                scheme,
                authority: "",
                path: rest,
            })
        }
    }
}
