//! Rate limit rules: which limits apply to the service and to each endpoint.
//!
//! Rules are plain data, normally loaded from YAML at startup. Every limit
//! expression is parsed while the rules are deserialized, so a typo in a
//! limit aborts loading instead of surfacing on the first request.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::discriminator::ScopeKind;
use super::limit::LimitSpec;
use crate::error::{QuotaguardError, Result};

/// Limits for the user, address and global scopes of one level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeLimits {
    /// Limits applied per API key
    #[serde(default)]
    pub user_limits: Vec<LimitSpec>,
    /// Limits applied per remote address
    #[serde(default)]
    pub ip_limits: Vec<LimitSpec>,
    /// Limits shared by every request
    #[serde(default)]
    pub global_limits: Vec<LimitSpec>,
}

impl ScopeLimits {
    /// No limits at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from limit expressions, failing on the first invalid one.
    pub fn parse<S: AsRef<str>>(user: &[S], ip: &[S], global: &[S]) -> Result<Self> {
        Ok(Self {
            user_limits: LimitSpec::parse_all(user)?,
            ip_limits: LimitSpec::parse_all(ip)?,
            global_limits: LimitSpec::parse_all(global)?,
        })
    }

    /// Limits configured for one kind of scope.
    pub fn for_kind(&self, kind: ScopeKind) -> &[LimitSpec] {
        match kind {
            ScopeKind::User => &self.user_limits,
            ScopeKind::Ip => &self.ip_limits,
            ScopeKind::Global => &self.global_limits,
        }
    }

    /// Total number of limits across the three scopes.
    pub fn len(&self) -> usize {
        self.user_limits.len() + self.ip_limits.len() + self.global_limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Limits registered for one path and method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRule {
    /// Route path, matched exactly
    pub path: String,
    /// HTTP method, matched case-insensitively
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub limits: ScopeLimits,
}

fn default_method() -> String {
    "GET".to_string()
}

impl EndpointRule {
    pub fn new(path: impl Into<String>, method: impl Into<String>, limits: ScopeLimits) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            limits,
        }
    }
}

/// The complete set of rules for a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRules {
    /// Limits counted across every endpoint
    #[serde(default)]
    pub service: ScopeLimits,
    /// Per-endpoint limits
    #[serde(default)]
    pub endpoints: Vec<EndpointRule>,
}

impl RateLimitRules {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| QuotaguardError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }

    /// Find the rule registered for a path and method.
    pub fn find_endpoint(&self, path: &str, method: &str) -> Option<&EndpointRule> {
        self.endpoints
            .iter()
            .find(|rule| rule.path == path && rule.method.eq_ignore_ascii_case(method))
    }

    /// Total number of limits in the rule set.
    pub fn limit_count(&self) -> usize {
        self.service.len() + self.endpoints.iter().map(|e| e.limits.len()).sum::<usize>()
    }
}
