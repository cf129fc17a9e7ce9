//! Routes deciding which connections are admitted and where their streams go

use std::collections::HashMap;
use std::net::IpAddr;

#[cfg(test)]
mod route_test;

/// Address part of a route. The wildcard is its own variant so matching is a
/// tagged comparison rather than null handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteAddress {
    /// Matches any address.
    Any,
    /// Matches exactly this address.
    Ip(IpAddr),
}

impl RouteAddress {
    /// Whether `ip` satisfies this address.
    pub fn matches(&self, ip: IpAddr) -> bool {
        match self {
            RouteAddress::Any => true,
            RouteAddress::Ip(routed) => *routed == ip,
        }
    }
}

impl From<Option<IpAddr>> for RouteAddress {
    fn from(ip: Option<IpAddr>) -> Self {
        match ip {
            Some(ip) => RouteAddress::Ip(ip),
            None => RouteAddress::Any,
        }
    }
}

/// A registered rule mapping `(source_name, source_ref, address)` to
/// `(target_name, target_ref)`. Immutable after creation.
///
/// Server routes use `source_ref` as the listening port; client routes use
/// `target_ref` as the remote port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Name of the source the connection arrives from.
    pub source_name: String,
    /// Reference the route is indexed by.
    pub source_ref: u64,
    /// Name of the downstream target the stream is delivered to.
    pub target_name: String,
    /// Reference handed to the target in BEGIN frames.
    pub target_ref: u64,
    /// Address filter, wildcard permitted.
    pub address: RouteAddress,
}

/// Routes indexed by `source_ref`; the adapter keeps one table per side
/// (accept and connect).
///
/// Within a reference bucket, resolution walks insertion order; duplicate
/// routes may be added, and removal takes the first match.
#[derive(Debug, Default)]
pub struct RouteTable {
    by_ref: HashMap<u64, Vec<Route>>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `route` to its reference bucket.
    pub fn add(&mut self, route: Route) {
        self.by_ref.entry(route.source_ref).or_default().push(route);
    }

    /// Removes the first route satisfying `predicate`. Returns whether one was removed.
    pub fn remove<P>(&mut self, source_ref: u64, predicate: P) -> bool
    where
        P: Fn(&Route) -> bool,
    {
        let Some(routes) = self.by_ref.get_mut(&source_ref) else {
            return false;
        };
        let Some(at) = routes.iter().position(|r| predicate(r)) else {
            return false;
        };
        routes.remove(at);
        if routes.is_empty() {
            self.by_ref.remove(&source_ref);
        }
        true
    }

    /// Resolves the first route under `source_ref` matching `source_name` and `ip`.
    pub fn resolve(&self, source_name: &str, source_ref: u64, ip: IpAddr) -> Option<&Route> {
        self.by_ref.get(&source_ref).and_then(|routes| {
            routes
                .iter()
                .find(|r| r.source_name == source_name && r.address.matches(ip))
        })
    }

    /// Resolves the first route under `source_ref` matching `source_name` alone.
    pub fn resolve_by_ref(&self, source_name: &str, source_ref: u64) -> Option<&Route> {
        self.by_ref
            .get(&source_ref)
            .and_then(|routes| routes.iter().find(|r| r.source_name == source_name))
    }

    /// Number of routes currently stored.
    pub fn len(&self) -> usize {
        self.by_ref.values().map(Vec::len).sum()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.by_ref.is_empty()
    }
}
