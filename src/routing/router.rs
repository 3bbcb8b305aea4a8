//! Endpoint group lookup.
//!
//! # Responsibilities
//! - Store compiled routes (prefix → group → upstream)
//! - Resolve the longest matching prefix for a path
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) prefix scan, routes pre-sorted longest first
//! - Explicit `None` rather than silent default

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::UpstreamConfig;
use crate::routing::matcher::{Matcher, PathPrefixMatcher};

/// A compiled route to one endpoint group.
#[derive(Debug)]
pub struct Route {
    pub group: Arc<str>,
    pub matcher: PathPrefixMatcher,
    pub upstream: SocketAddr,
}

/// Longest-prefix router over configured upstream groups.
#[derive(Debug, Default)]
pub struct GroupRouter {
    routes: Vec<Arc<Route>>,
}

impl GroupRouter {
    /// Compile routes from configuration. Entries with unparsable addresses
    /// are skipped; validation rejects them before this point.
    pub fn from_config(upstreams: &[UpstreamConfig]) -> Self {
        let mut routes: Vec<Arc<Route>> = upstreams
            .iter()
            .filter_map(|u| match u.address.parse() {
                Ok(upstream) => Some(Arc::new(Route {
                    group: Arc::from(u.group.as_str()),
                    matcher: PathPrefixMatcher::new(u.path_prefix.clone()),
                    upstream,
                })),
                Err(_) => {
                    tracing::warn!(group = %u.group, address = %u.address, "Invalid upstream address");
                    None
                }
            })
            .collect();

        routes.sort_by(|a, b| b.matcher.prefix().len().cmp(&a.matcher.prefix().len()));
        Self { routes }
    }

    /// Find the route with the longest prefix matching `path`.
    pub fn resolve(&self, path: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|r| r.matcher.matches(path))
    }

    /// Group names in routing order.
    pub fn groups(&self) -> impl Iterator<Item = &Arc<str>> {
        self.routes.iter().map(|r| &r.group)
    }

    /// Group name owning a configured path prefix.
    pub fn group_for_prefix(&self, prefix: &str) -> Option<&Arc<str>> {
        self.routes
            .iter()
            .find(|r| r.matcher.prefix() == prefix)
            .map(|r| &r.group)
    }
}
