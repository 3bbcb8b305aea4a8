//! Request classification: client identity and endpoint group.
//!
//! Identity is derived in priority order:
//! 1. API-key header → `apikey:<value>`
//! 2. Authenticated user attached by the auth layer → `user:<id>`
//! 3. Left-most forwarded-for address → `ip:<addr>`
//! 4. Transport peer address → `ip:<addr>`
//! 5. Nothing usable → the shared `unknown` bucket
//!
//! Forwarded and peer addresses produce the same key text, so one address is
//! one limiter subject however it was observed.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::http::{HeaderMap, Request};

use crate::config::IdentityConfig;
use crate::routing::matcher::{AnyMatcher, Matcher};
use crate::routing::router::{GroupRouter, Route};

/// Identity of an authenticated caller, inserted into request extensions by
/// the authentication layer in front of the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Which quota tier a key falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyTier {
    /// API-key holders and authenticated users.
    Identified,
    /// Address-derived and unknown keys.
    Anonymous,
}

/// Derived client identity used to scope rate limits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    text: Arc<str>,
    tier: KeyTier,
}

impl RequestKey {
    pub fn api_key(value: &str) -> Self {
        Self {
            text: format!("apikey:{value}").into(),
            tier: KeyTier::Identified,
        }
    }

    pub fn user(id: &str) -> Self {
        Self {
            text: format!("user:{id}").into(),
            tier: KeyTier::Identified,
        }
    }

    pub fn address(ip: IpAddr) -> Self {
        Self {
            text: format!("ip:{ip}").into(),
            tier: KeyTier::Anonymous,
        }
    }

    pub fn unknown() -> Self {
        Self {
            text: Arc::from("unknown"),
            tier: KeyTier::Anonymous,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn tier(&self) -> KeyTier {
        self.tier
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Logical upstream target of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointGroup {
    /// Exempt from circuit breaking and rate limiting.
    Bypass,
    Named(Arc<str>),
}

impl EndpointGroup {
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        EndpointGroup::Named(name.into())
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, EndpointGroup::Bypass)
    }

    pub fn as_str(&self) -> &str {
        match self {
            EndpointGroup::Bypass => "bypass",
            EndpointGroup::Named(name) => name,
        }
    }
}

impl fmt::Display for EndpointGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one request.
#[derive(Debug, Clone)]
pub struct Classification {
    pub key: RequestKey,
    pub group: EndpointGroup,
    /// Upstream route for the path, present even for bypassed paths that
    /// fall under a group prefix.
    pub route: Option<Arc<Route>>,
}

/// Derives `(RequestKey, EndpointGroup)` from request metadata.
#[derive(Debug)]
pub struct RequestClassifier {
    api_key_header: String,
    forwarded_header: String,
    bypass: AnyMatcher,
    router: Arc<GroupRouter>,
}

impl RequestClassifier {
    pub fn new<S: AsRef<str>>(
        identity: &IdentityConfig,
        bypass_paths: &[S],
        router: Arc<GroupRouter>,
    ) -> Self {
        Self {
            api_key_header: identity.api_key_header.to_ascii_lowercase(),
            forwarded_header: identity.forwarded_header.to_ascii_lowercase(),
            bypass: AnyMatcher::from_patterns(bypass_paths),
            router,
        }
    }

    /// Classify a request. Never fails; missing signals degrade to coarser
    /// identities and unmatched paths to the bypass group.
    pub fn classify<B>(&self, req: &Request<B>, peer: Option<SocketAddr>) -> Classification {
        let path = req.uri().path();
        let route = self.router.resolve(path).cloned();

        let group = match &route {
            _ if self.bypass.matches(path) => EndpointGroup::Bypass,
            Some(route) => EndpointGroup::Named(route.group.clone()),
            None => EndpointGroup::Bypass,
        };

        let user = req.extensions().get::<AuthenticatedUser>();
        let key = self.derive_key(req.headers(), user, peer);

        Classification { key, group, route }
    }

    fn derive_key(
        &self,
        headers: &HeaderMap,
        user: Option<&AuthenticatedUser>,
        peer: Option<SocketAddr>,
    ) -> RequestKey {
        if let Some(api_key) = header_str(headers, &self.api_key_header) {
            return RequestKey::api_key(api_key);
        }

        if let Some(AuthenticatedUser(id)) = user.filter(|u| !u.0.is_empty()) {
            return RequestKey::user(id);
        }

        if let Some(ip) = header_str(headers, &self.forwarded_header).and_then(first_forwarded) {
            return RequestKey::address(ip);
        }

        match peer {
            Some(addr) => RequestKey::address(addr.ip()),
            None => RequestKey::unknown(),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Left-most entry of a forwarded-for list, if it is an address.
fn first_forwarded(value: &str) -> Option<IpAddr> {
    let first = value.split(',').next()?.trim();
    first
        .parse::<IpAddr>()
        .or_else(|_| first.parse::<SocketAddr>().map(|s| s.ip()))
        .map_err(|_| tracing::debug!(value = %first, "Ignoring unparsable forwarded address"))
        .ok()
}
