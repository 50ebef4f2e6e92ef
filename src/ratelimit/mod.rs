//! Rate limiting logic and state management.

mod counter;
mod discriminator;
mod evaluate;
mod limit;
mod limiter;
mod rules;
mod verdict;

pub use counter::{CounterStore, Window};
pub use discriminator::{Discriminator, Scope, ScopeKind, ScopeLevel};
pub use evaluate::evaluate;
pub use limit::{LimitSpec, TimeUnit};
pub use limiter::{now_secs, EndpointKey, RateLimiter, RequestContext};
pub use rules::{EndpointRule, RateLimitRules, ScopeLimits};
pub use verdict::{humanize_secs, RateLimitedBody, Verdict, RATE_LIMITED_STATUS, RETRY_AFTER_HEADER};
