//! The outcome of a rate limit check and how callers present it.

use serde::{Deserialize, Serialize};

use super::discriminator::Scope;

/// HTTP status a denied request should be answered with.
pub const RATE_LIMITED_STATUS: u16 = 429;

/// Header carrying the wait time of a denied request.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Result of checking one request against every scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The request may proceed
    Allowed,
    /// The request must wait `retry_after` seconds
    Denied {
        retry_after: u64,
        /// Every scope that breached, in evaluation order
        breached: Vec<Scope>,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    /// Seconds to wait before retrying, if denied.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Verdict::Allowed => None,
            Verdict::Denied { retry_after, .. } => Some(*retry_after),
        }
    }

    /// Scopes that caused a denial.
    pub fn breached(&self) -> &[Scope] {
        match self {
            Verdict::Allowed => &[],
            Verdict::Denied { breached, .. } => breached,
        }
    }

    /// The `Retry-After` header a denied response should carry.
    pub fn retry_after_header(&self) -> Option<(&'static str, String)> {
        self.retry_after()
            .map(|secs| (RETRY_AFTER_HEADER, secs.to_string()))
    }

    /// JSON body for a denied response.
    pub fn denial_body(&self) -> Option<RateLimitedBody> {
        self.retry_after().map(RateLimitedBody::new)
    }
}

/// Body of a `429` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitedBody {
    pub success: bool,
    pub cause: String,
}

impl RateLimitedBody {
    pub fn new(retry_after: u64) -> Self {
        Self {
            success: false,
            cause: format!("Rate Limited - Try again in {retry_after} seconds."),
        }
    }
}

/// Render a number of seconds as a short string such as `5m10s` or `2d3h`.
///
/// Only the two most significant units are shown.
pub fn humanize_secs(secs: u64) -> String {
    let (m, s) = (secs / 60, secs % 60);
    let (h, m) = (m / 60, m % 60);
    let (d, h) = (h / 24, h % 24);

    if d > 0 {
        format!("{d}d{h}h")
    } else if h > 0 {
        format!("{h}h{m}m")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
