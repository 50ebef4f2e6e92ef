//! Fixed-window request counters.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::discriminator::Discriminator;
use super::limit::LimitSpec;

/// Request count within one fixed time bucket.
///
/// `frame` is `now / window_secs`. A request in a later frame replaces the
/// window with a fresh one instead of merging into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Index of the time bucket
    pub frame: u64,
    /// Requests seen in this bucket, breaching ones included
    pub count: u64,
}

impl Window {
    fn open(frame: u64) -> Self {
        Self { frame, count: 1 }
    }

    /// Count one request observed in `frame`.
    fn record(&mut self, frame: u64) {
        if self.frame == frame {
            self.count = self.count.saturating_add(1);
        } else {
            *self = Window::open(frame);
        }
    }
}

/// Key of a single window within a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    discriminator: Discriminator,
    limit: String,
    window_secs: u64,
}

impl WindowKey {
    fn new(discriminator: &Discriminator, limit: &LimitSpec) -> Self {
        Self {
            discriminator: discriminator.clone(),
            limit: limit.as_str().to_string(),
            window_secs: limit.window_secs(),
        }
    }
}

/// Windows for one scope, keyed by discriminator and limit text.
///
/// Each key lives in one shard of the map, and every update runs while
/// holding that shard's write guard, so concurrent updates to the same key
/// are serialized and never lose a count. Only one guard is held per call.
///
/// Entries are never removed by updates; see [`CounterStore::prune`].
#[derive(Debug, Default)]
pub struct CounterStore {
    windows: DashMap<WindowKey, Window>,
}

impl CounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the window for this key, opening one at `now` if none exists.
    ///
    /// An existing window is returned as is, even if its frame is stale.
    pub fn get_or_init(&self, discriminator: &Discriminator, limit: &LimitSpec, now: u64) -> Window {
        let frame = limit.frame_at(now);
        *self
            .windows
            .entry(WindowKey::new(discriminator, limit))
            .or_insert_with(|| Window::open(frame))
    }

    /// Count one request at `now` and return the updated window.
    pub fn advance(&self, discriminator: &Discriminator, limit: &LimitSpec, now: u64) -> Window {
        let frame = limit.frame_at(now);

        match self.windows.entry(WindowKey::new(discriminator, limit)) {
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                window.record(frame);
                *window
            }
            Entry::Vacant(vacant) => *vacant.insert(Window::open(frame)),
        }
    }

    /// Current window for this key, without counting anything.
    pub fn peek(&self, discriminator: &Discriminator, limit: &LimitSpec) -> Option<Window> {
        self.windows
            .get(&WindowKey::new(discriminator, limit))
            .map(|window| *window)
    }

    /// Drop windows whose frame ended before `now`.
    ///
    /// Such windows would be replaced on their next update anyway, so this
    /// only bounds memory. Returns how many windows were removed.
    pub fn prune(&self, now: u64) -> usize {
        let mut removed = 0;
        self.windows.retain(|key, window| {
            let live = window.frame >= now / key.window_secs;
            if !live {
                removed += 1;
            }
            live
        });
        removed
    }

    /// Number of windows currently stored.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
