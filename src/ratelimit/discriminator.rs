//! Counter identities and the scopes a request is checked against.

use std::fmt;
use std::net::IpAddr;

/// The identity a counter is keyed on.
///
/// Requests with no API key (or no address) all map to `None` and share a
/// single counter per limit, so anonymous callers draw from one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Discriminator {
    /// Keyed on the caller's API key
    User(String),
    /// Keyed on the caller's network address
    Address(IpAddr),
    /// One shared counter
    None,
}

impl Discriminator {
    /// Discriminator for user-scoped limits.
    pub fn user(api_key: Option<&str>) -> Self {
        match api_key {
            Some(key) => Discriminator::User(key.to_string()),
            None => Discriminator::None,
        }
    }

    /// Discriminator for address-scoped limits.
    pub fn address(addr: Option<IpAddr>) -> Self {
        match addr {
            Some(addr) => Discriminator::Address(addr),
            None => Discriminator::None,
        }
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discriminator::User(key) => write!(f, "{key}"),
            Discriminator::Address(addr) => write!(f, "{addr}"),
            Discriminator::None => f.write_str("None"),
        }
    }
}

/// Whether a scope belongs to a single endpoint or the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeLevel {
    Endpoint,
    Service,
}

/// What a scope's counters are keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    User,
    Ip,
    Global,
}

/// One of the six rate limit categories a request is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope {
    pub level: ScopeLevel,
    pub kind: ScopeKind,
}

impl Scope {
    pub const ENDPOINT_USER: Scope = Scope::new(ScopeLevel::Endpoint, ScopeKind::User);
    pub const ENDPOINT_IP: Scope = Scope::new(ScopeLevel::Endpoint, ScopeKind::Ip);
    pub const ENDPOINT_GLOBAL: Scope = Scope::new(ScopeLevel::Endpoint, ScopeKind::Global);
    pub const SERVICE_USER: Scope = Scope::new(ScopeLevel::Service, ScopeKind::User);
    pub const SERVICE_IP: Scope = Scope::new(ScopeLevel::Service, ScopeKind::Ip);
    pub const SERVICE_GLOBAL: Scope = Scope::new(ScopeLevel::Service, ScopeKind::Global);

    /// All six scopes, in evaluation order.
    pub const ALL: [Scope; 6] = [
        Scope::ENDPOINT_USER,
        Scope::ENDPOINT_IP,
        Scope::ENDPOINT_GLOBAL,
        Scope::SERVICE_USER,
        Scope::SERVICE_IP,
        Scope::SERVICE_GLOBAL,
    ];

    pub const fn new(level: ScopeLevel, kind: ScopeKind) -> Self {
        Self { level, kind }
    }

    /// The discriminator this scope counts a request under.
    pub fn discriminator(&self, api_key: Option<&str>, remote_addr: Option<IpAddr>) -> Discriminator {
        match self.kind {
            ScopeKind::User => Discriminator::user(api_key),
            ScopeKind::Ip => Discriminator::address(remote_addr),
            ScopeKind::Global => Discriminator::None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            ScopeLevel::Endpoint => "endpoint",
            ScopeLevel::Service => "service",
        };
        let kind = match self.kind {
            ScopeKind::User => "user",
            ScopeKind::Ip => "ip",
            ScopeKind::Global => "global",
        };
        write!(f, "{level}-{kind}")
    }
}
