//! Evaluation of a list of limits against one scope's counters.

use tracing::trace;

use super::counter::CounterStore;
use super::discriminator::Discriminator;
use super::limit::LimitSpec;

/// Count one request against every limit and report the longest wait.
///
/// Every limit is advanced, even after an earlier one has breached, so all
/// windows stay accurate. Returns the number of seconds until the slowest
/// breached window rolls over, or `None` if nothing breached. An empty
/// `limits` slice leaves the store untouched.
pub fn evaluate(
    limits: &[LimitSpec],
    now: u64,
    store: &CounterStore,
    discriminator: &Discriminator,
) -> Option<u64> {
    limits
        .iter()
        .filter_map(|limit| {
            let window = store.advance(discriminator, limit, now);

            trace!(
                discriminator = %discriminator,
                limit = %limit,
                frame = window.frame,
                count = window.count,
                "Advanced window"
            );

            (window.count > limit.count()).then(|| limit.wait_at(now))
        })
        .max()
}
