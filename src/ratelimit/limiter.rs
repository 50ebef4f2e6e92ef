//! Core rate limiter: composes endpoint and service limits into one verdict.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, trace};

use super::counter::{CounterStore, Window};
use super::discriminator::{Scope, ScopeKind, ScopeLevel};
use super::evaluate::evaluate;
use super::limit::LimitSpec;
use super::rules::{EndpointRule, RateLimitRules, ScopeLimits};
use super::verdict::{humanize_secs, Verdict};
use crate::error::{QuotaguardError, Result};

/// Identifies a registered endpoint. The method is stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub method: String,
    pub path: String,
}

impl EndpointKey {
    pub fn new(path: &str, method: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// What the limiter needs to know about an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub api_key: Option<&'a str>,
    pub remote_addr: Option<IpAddr>,
    pub path: &'a str,
    pub method: &'a str,
}

impl<'a> RequestContext<'a> {
    /// An anonymous request with no known address.
    pub fn new(path: &'a str, method: &'a str) -> Self {
        Self {
            api_key: None,
            remote_addr: None,
            path,
            method,
        }
    }

    pub fn with_api_key(mut self, api_key: &'a str) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: IpAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }
}

/// Limits and counters for the user, address and global scopes of one level.
#[derive(Debug)]
struct ScopeSet {
    level: ScopeLevel,
    limits: ScopeLimits,
    user: CounterStore,
    ip: CounterStore,
    global: CounterStore,
}

impl ScopeSet {
    fn new(level: ScopeLevel, limits: ScopeLimits) -> Self {
        Self {
            level,
            limits,
            user: CounterStore::new(),
            ip: CounterStore::new(),
            global: CounterStore::new(),
        }
    }

    fn store(&self, kind: ScopeKind) -> &CounterStore {
        match kind {
            ScopeKind::User => &self.user,
            ScopeKind::Ip => &self.ip,
            ScopeKind::Global => &self.global,
        }
    }

    /// Count the request in all three scopes, collecting every breach.
    fn check(&self, request: &RequestContext<'_>, now: u64, breaches: &mut Vec<(Scope, u64)>) {
        for kind in [ScopeKind::User, ScopeKind::Ip, ScopeKind::Global] {
            let scope = Scope::new(self.level, kind);
            let discriminator = scope.discriminator(request.api_key, request.remote_addr);

            if let Some(wait) = evaluate(self.limits.for_kind(kind), now, self.store(kind), &discriminator) {
                debug!(
                    scope = %scope,
                    discriminator = %discriminator,
                    wait_secs = wait,
                    "Rate limit exceeded"
                );
                breaches.push((scope, wait));
            }
        }
    }

    fn prune(&self, now: u64) -> usize {
        self.user.prune(now) + self.ip.prune(now) + self.global.prune(now)
    }

    fn window_count(&self) -> usize {
        self.user.len() + self.ip.len() + self.global.len()
    }
}

/// The rate limiter shared by every request handler of a service.
///
/// Holds the service-wide counters and one set of counters per registered
/// endpoint. Counters live as long as the limiter; share it with `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    service: ScopeSet,
    endpoints: RwLock<HashMap<EndpointKey, Arc<ScopeSet>>>,
}

impl RateLimiter {
    /// Create a rate limiter with the given service-wide limits.
    pub fn new(service: ScopeLimits) -> Self {
        Self {
            service: ScopeSet::new(ScopeLevel::Service, service),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Create a rate limiter and register every endpoint in `rules`.
    pub fn from_rules(rules: RateLimitRules) -> Result<Self> {
        let limiter = Self::new(rules.service);
        for rule in rules.endpoints {
            limiter.register(rule)?;
        }
        Ok(limiter)
    }

    /// Register limits for one endpoint.
    ///
    /// Fails if the same path and method were already registered.
    pub fn register(&self, rule: EndpointRule) -> Result<()> {
        let key = EndpointKey::new(&rule.path, &rule.method);
        let mut endpoints = self.endpoints.write();

        if endpoints.contains_key(&key) {
            return Err(QuotaguardError::DuplicateEndpoint {
                method: key.method,
                path: key.path,
            });
        }

        info!(
            endpoint = %key,
            user_limits = rule.limits.user_limits.len(),
            ip_limits = rule.limits.ip_limits.len(),
            global_limits = rule.limits.global_limits.len(),
            "Registered endpoint limits"
        );

        endpoints.insert(key, Arc::new(ScopeSet::new(ScopeLevel::Endpoint, rule.limits)));
        Ok(())
    }

    /// Count a request at `now` (unix seconds) and decide whether it may proceed.
    ///
    /// All six scopes are counted on every call, even when an earlier one
    /// has already breached. A denied request reports the longest wait of
    /// any breached scope. Requests to unregistered endpoints are only
    /// subject to the service-wide limits.
    pub fn check(&self, request: &RequestContext<'_>, now: u64) -> Verdict {
        let key = EndpointKey::new(request.path, request.method);
        let endpoint = self.endpoint(&key);

        let mut breaches = Vec::new();
        match &endpoint {
            Some(endpoint) => endpoint.check(request, now, &mut breaches),
            None => trace!(endpoint = %key, "No limits registered for endpoint"),
        }
        self.service.check(request, now, &mut breaches);

        let Some(retry_after) = breaches.iter().map(|(_, wait)| *wait).max() else {
            return Verdict::Allowed;
        };

        debug!(
            endpoint = %key,
            retry_after,
            retry_in = %humanize_secs(retry_after),
            breached = breaches.len(),
            "Request rate limited"
        );

        Verdict::Denied {
            retry_after,
            breached: breaches.into_iter().map(|(scope, _)| scope).collect(),
        }
    }

    /// Like [`RateLimiter::check`], using the current wall-clock time.
    pub fn check_now(&self, request: &RequestContext<'_>) -> Verdict {
        self.check(request, now_secs())
    }

    /// Current window of one limit for a request, without counting anything.
    pub fn peek(&self, scope: Scope, request: &RequestContext<'_>, limit: &LimitSpec) -> Option<Window> {
        let discriminator = scope.discriminator(request.api_key, request.remote_addr);
        match scope.level {
            ScopeLevel::Service => self.service.store(scope.kind).peek(&discriminator, limit),
            ScopeLevel::Endpoint => self
                .endpoint(&EndpointKey::new(request.path, request.method))?
                .store(scope.kind)
                .peek(&discriminator, limit),
        }
    }

    /// Drop every window that has already rolled over.
    ///
    /// Never called by `check`; without it counters are kept for the
    /// lifetime of the limiter.
    pub fn prune(&self, now: u64) -> usize {
        let endpoints: Vec<Arc<ScopeSet>> = self.endpoints.read().values().cloned().collect();
        let removed = self.service.prune(now) + endpoints.iter().map(|e| e.prune(now)).sum::<usize>();

        debug!(removed, "Pruned stale rate limit windows");
        removed
    }

    /// Number of registered endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Number of windows across every store.
    pub fn window_count(&self) -> usize {
        let endpoints: Vec<Arc<ScopeSet>> = self.endpoints.read().values().cloned().collect();
        self.service.window_count() + endpoints.iter().map(|e| e.window_count()).sum::<usize>()
    }

    fn endpoint(&self, key: &EndpointKey) -> Option<Arc<ScopeSet>> {
        self.endpoints.read().get(key).cloned()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(ScopeLimits::new())
    }
}

/// Current unix time in whole seconds.
pub fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/maths/<method>";

    fn limits(user: &[&str], ip: &[&str], global: &[&str]) -> ScopeLimits {
        ScopeLimits::parse(user, ip, global).unwrap()
    }

    fn limiter_with(endpoint: ScopeLimits, service: ScopeLimits) -> RateLimiter {
        let limiter = RateLimiter::new(service);
        limiter.register(EndpointRule::new(PATH, "GET", endpoint)).unwrap();
        limiter
    }

    fn spec(text: &str) -> LimitSpec {
        LimitSpec::parse(text).unwrap()
    }

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.endpoint_count(), 0);
        assert_eq!(limiter.window_count(), 0);
    }

    #[test]
    fn test_allows_until_limit_then_denies() {
        let limiter = limiter_with(limits(&["3/min"], &[], &[]), ScopeLimits::new());
        let request = RequestContext::new(PATH, "GET").with_api_key("alice");
        let now = 6_010;

        for _ in 0..3 {
            assert_eq!(limiter.check(&request, now), Verdict::Allowed);
        }

        assert_eq!(
            limiter.check(&request, now),
            Verdict::Denied {
                retry_after: 50,
                breached: vec![Scope::ENDPOINT_USER],
            }
        );
    }

    #[test]
    fn test_no_short_circuit_and_worst_wait() {
        let limiter = limiter_with(
            limits(&["1/min"], &["5/min"], &["5/min"]),
            limits(&["5/min"], &["5/min"], &["1/2 min"]),
        );
        let addr: IpAddr = "192.168.1.1".parse().unwrap();
        let request = RequestContext::new(PATH, "GET")
            .with_api_key("alice")
            .with_remote_addr(addr);
        let now = 30;

        assert!(limiter.check(&request, now).is_allowed());

        let verdict = limiter.check(&request, now);
        assert_eq!(verdict.retry_after(), Some(90));
        assert_eq!(verdict.breached(), &[Scope::ENDPOINT_USER, Scope::SERVICE_GLOBAL]);

        // Every scope counted both requests, including the denied one.
        for (scope, limit) in [
            (Scope::ENDPOINT_USER, "1/min"),
            (Scope::ENDPOINT_IP, "5/min"),
            (Scope::ENDPOINT_GLOBAL, "5/min"),
            (Scope::SERVICE_USER, "5/min"),
            (Scope::SERVICE_IP, "5/min"),
            (Scope::SERVICE_GLOBAL, "1/2 min"),
        ] {
            let window = limiter.peek(scope, &request, &spec(limit)).unwrap();
            assert_eq!(window.count, 2, "scope {scope}");
        }
    }

    #[test]
    fn test_anonymous_requests_share_user_counter() {
        let limiter = limiter_with(limits(&["1/min"], &[], &[]), ScopeLimits::new());
        let first = RequestContext::new(PATH, "GET").with_remote_addr("10.0.0.1".parse().unwrap());
        let second = RequestContext::new(PATH, "GET").with_remote_addr("10.0.0.2".parse().unwrap());

        assert!(limiter.check(&first, 0).is_allowed());
        assert!(!limiter.check(&second, 0).is_allowed());

        let window = limiter.peek(Scope::ENDPOINT_USER, &first, &spec("1/min")).unwrap();
        assert_eq!(window.count, 2);
    }

    #[test]
    fn test_users_are_counted_separately() {
        let limiter = limiter_with(limits(&["1/min"], &[], &[]), ScopeLimits::new());
        let alice = RequestContext::new(PATH, "GET").with_api_key("alice");
        let bob = RequestContext::new(PATH, "GET").with_api_key("bob");

        assert!(limiter.check(&alice, 0).is_allowed());
        assert!(limiter.check(&bob, 0).is_allowed());
        assert!(!limiter.check(&alice, 0).is_allowed());
    }

    #[test]
    fn test_service_limits_span_endpoints() {
        let limiter = RateLimiter::new(limits(&[], &[], &["2/min"]));
        limiter
            .register(EndpointRule::new("/a", "GET", ScopeLimits::new()))
            .unwrap();

        assert!(limiter.check(&RequestContext::new("/a", "GET"), 0).is_allowed());
        // Unregistered endpoints still count towards service limits.
        assert!(limiter.check(&RequestContext::new("/b", "POST"), 0).is_allowed());

        let verdict = limiter.check(&RequestContext::new("/a", "GET"), 0);
        assert_eq!(verdict.retry_after(), Some(60));
        assert_eq!(verdict.breached(), &[Scope::SERVICE_GLOBAL]);
    }

    #[test]
    fn test_endpoints_have_separate_counters() {
        let limiter = RateLimiter::new(ScopeLimits::new());
        for method in ["GET", "POST"] {
            limiter
                .register(EndpointRule::new(PATH, method, limits(&[], &[], &["1/min"])))
                .unwrap();
        }

        assert!(limiter.check(&RequestContext::new(PATH, "GET"), 0).is_allowed());
        assert!(limiter.check(&RequestContext::new(PATH, "post"), 0).is_allowed());
        assert!(!limiter.check(&RequestContext::new(PATH, "get"), 0).is_allowed());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let limiter = RateLimiter::default();
        limiter
            .register(EndpointRule::new(PATH, "get", ScopeLimits::new()))
            .unwrap();

        let err = limiter
            .register(EndpointRule::new(PATH, "GET", ScopeLimits::new()))
            .unwrap_err();
        assert!(matches!(err, QuotaguardError::DuplicateEndpoint { .. }));
        assert_eq!(limiter.endpoint_count(), 1);
    }

    #[test]
    fn test_window_rolls_over() {
        let limiter = limiter_with(limits(&[], &[], &["1/min"]), ScopeLimits::new());
        let request = RequestContext::new(PATH, "GET");

        assert!(limiter.check(&request, 100).is_allowed());
        assert_eq!(limiter.check(&request, 110).retry_after(), Some(10));
        assert!(limiter.check(&request, 120).is_allowed());
    }

    #[test]
    fn test_prune() {
        let limiter = limiter_with(limits(&["5/min"], &[], &[]), limits(&[], &[], &["5/hour"]));
        limiter.check(&RequestContext::new(PATH, "GET").with_api_key("alice"), 10);
        limiter.check(&RequestContext::new(PATH, "GET").with_api_key("bob"), 70);
        assert_eq!(limiter.window_count(), 3);

        assert_eq!(limiter.prune(70), 1);
        assert_eq!(limiter.window_count(), 2);
    }

    #[test]
    fn test_from_rules() {
        let rules = RateLimitRules::from_yaml(
            r#"
service:
  user_limits: ["8/min"]
endpoints:
  - path: /a
  - path: /a
    method: POST
"#,
        )
        .unwrap();

        let limiter = RateLimiter::from_rules(rules).unwrap();
        assert_eq!(limiter.endpoint_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_checks_count_exactly() {
        let limiter = Arc::new(limiter_with(
            limits(&["1000000/day"], &[], &["1000000/day"]),
            ScopeLimits::new(),
        ));
        let tasks = 32;
        let per_task = 250;

        let mut handles = Vec::new();
        for _ in 0..tasks {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let request = RequestContext::new(PATH, "GET").with_api_key("alice");
                for _ in 0..per_task {
                    assert!(limiter.check(&request, 5_000).is_allowed());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let request = RequestContext::new(PATH, "GET").with_api_key("alice");
        let limit = spec("1000000/day");
        for scope in [Scope::ENDPOINT_USER, Scope::ENDPOINT_GLOBAL] {
            let window = limiter.peek(scope, &request, &limit).unwrap();
            assert_eq!(window.count, tasks * per_task);
        }
    }
}
