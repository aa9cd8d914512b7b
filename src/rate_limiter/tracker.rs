//! # Completion Tracking
//!
//! Counts how much capacity is occupied. Two kinds of occupancy exist:
//!
//! ```text
//!     limit = 4, window = 1s
//!
//!     active  [A][B]        ← started, not finished
//!     recent  [C]           ← finished, but started < 1s ago
//!     free    [ ]
//!
//!     occupied = active + recent = 3
//! ```
//!
//! Without a window, `recent` stays empty and occupancy equals the number of
//! requests in flight. The tracker itself is not synchronized; the limiter
//! owns it behind its single mutex.

use super::request::{RequestHandle, RequestKey};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

struct ActiveRequest {
    // Kept alive so the key stays unique while the request runs.
    _handle: RequestHandle,
    started_at: Instant,
}

/// Active/recent request accounting.
pub(crate) struct CompletionTracker {
    limit: usize,
    window: Option<Duration>,
    active: HashMap<RequestKey, ActiveRequest>,
    /// Start instants of finished requests still inside the window.
    recent: VecDeque<Instant>,
}

impl CompletionTracker {
    pub(crate) fn new(limit: usize, window: Option<Duration>) -> Self {
        Self {
            limit,
            window,
            active: HashMap::with_capacity(limit),
            recent: VecDeque::new(),
        }
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn is_active(&self, key: RequestKey) -> bool {
        self.active.contains_key(&key)
    }

    /// Capacity in use at `now`. Does not mutate.
    pub(crate) fn occupied(&self, now: Instant) -> usize {
        let recent = match self.window {
            Some(window) => self
                .recent
                .iter()
                .filter(|started| !Self::expired(**started, window, now))
                .count(),
            None => 0,
        };
        self.active.len() + recent
    }

    pub(crate) fn at_limit(&self, now: Instant) -> bool {
        self.occupied(now) >= self.limit
    }

    /// Records a start. Returns `false` if the request was already counted.
    pub(crate) fn record_start(&mut self, key: RequestKey, handle: RequestHandle, now: Instant) -> bool {
        if self.active.contains_key(&key) {
            return false;
        }
        self.active.insert(
            key,
            ActiveRequest {
                _handle: handle,
                started_at: now,
            },
        );
        true
    }

    /// Records a finish. Returns `false` for requests that were not active.
    pub(crate) fn record_finish(&mut self, key: RequestKey, now: Instant) -> bool {
        let Some(request) = self.active.remove(&key) else {
            return false;
        };
        if let Some(window) = self.window {
            if !Self::expired(request.started_at, window, now) {
                self.recent.push_back(request.started_at);
            }
        }
        true
    }

    /// Drops window entries that no longer occupy capacity.
    pub(crate) fn prune(&mut self, now: Instant) -> usize {
        let Some(window) = self.window else {
            return 0;
        };
        let before = self.recent.len();
        self.recent.retain(|started| !Self::expired(*started, window, now));
        before - self.recent.len()
    }

    /// Time until the earliest windowed slot frees up.
    pub(crate) fn next_expiry(&self, now: Instant) -> Option<Duration> {
        let window = self.window?;
        self.recent
            .iter()
            .filter_map(|started| started.checked_add(window))
            .map(|expires| expires.saturating_duration_since(now))
            .filter(|remaining| !remaining.is_zero())
            .min()
    }

    /// Forgets everything. Used on teardown.
    pub(crate) fn clear(&mut self) {
        self.active.clear();
        self.recent.clear();
    }

    #[inline]
    fn expired(started: Instant, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(started) >= window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RateLimitedRequest;
    use std::sync::Arc;

    struct Stub;

    impl RateLimitedRequest for Stub {
        fn request_start(&self) -> bool {
            true
        }
    }

    fn keyed() -> (RequestKey, RequestHandle) {
        let handle: RequestHandle = Arc::new(Stub);
        (RequestKey::of(&handle), handle)
    }

    #[test]
    fn test_start_and_finish() {
        let now = Instant::now();
        let mut tracker = CompletionTracker::new(2, None);
        let (ka, a) = keyed();
        let (kb, b) = keyed();

        assert!(tracker.record_start(ka, a, now));
        assert!(!tracker.at_limit(now));
        assert!(tracker.record_start(kb, b, now));
        assert!(tracker.at_limit(now));
        assert_eq!(tracker.active_count(), 2);

        assert!(tracker.record_finish(ka, now));
        assert_eq!(tracker.active_count(), 1);
        assert!(!tracker.at_limit(now));
    }

    #[test]
    fn test_double_start_not_counted() {
        let now = Instant::now();
        let mut tracker = CompletionTracker::new(4, None);
        let (key, handle) = keyed();

        assert!(tracker.record_start(key, handle.clone(), now));
        assert!(!tracker.record_start(key, handle, now));
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_stale_finish_is_noop() {
        let now = Instant::now();
        let mut tracker = CompletionTracker::new(4, None);
        let (key, _handle) = keyed();

        assert!(!tracker.record_finish(key, now));
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.occupied(now), 0);
    }

    #[test]
    fn test_window_keeps_slot_until_expiry() {
        let start = Instant::now();
        let window = Duration::from_secs(1);
        let mut tracker = CompletionTracker::new(1, Some(window));
        let (key, handle) = keyed();

        tracker.record_start(key, handle, start);
        let finished = start + Duration::from_millis(200);
        assert!(tracker.record_finish(key, finished));

        assert_eq!(tracker.active_count(), 0);
        assert!(tracker.at_limit(finished));
        assert_eq!(tracker.next_expiry(finished), Some(Duration::from_millis(800)));

        let later = start + window;
        assert!(!tracker.at_limit(later));
        assert_eq!(tracker.next_expiry(later), None);
        assert_eq!(tracker.prune(later), 1);
    }

    #[test]
    fn test_finish_after_window_frees_immediately() {
        let start = Instant::now();
        let mut tracker = CompletionTracker::new(1, Some(Duration::from_millis(100)));
        let (key, handle) = keyed();

        tracker.record_start(key, handle, start);
        let finished = start + Duration::from_millis(150);
        tracker.record_finish(key, finished);

        assert_eq!(tracker.occupied(finished), 0);
    }

    #[test]
    fn test_unbounded_window_never_expires() {
        let start = Instant::now();
        let mut tracker = CompletionTracker::new(1, Some(Duration::MAX));
        let (key, handle) = keyed();

        tracker.record_start(key, handle, start);
        let finished = start + Duration::from_secs(5);
        assert!(tracker.record_finish(key, finished));

        assert!(tracker.at_limit(finished));
        assert_eq!(tracker.next_expiry(finished), None);
        assert_eq!(tracker.prune(finished), 0);
    }

    #[test]
    fn test_occupied_has_no_side_effects() {
        let start = Instant::now();
        let mut tracker = CompletionTracker::new(2, Some(Duration::from_millis(50)));
        let (key, handle) = keyed();
        tracker.record_start(key, handle, start);
        tracker.record_finish(key, start);

        let later = start + Duration::from_millis(60);
        assert_eq!(tracker.occupied(later), 0);
        // Still stored until pruned.
        assert_eq!(tracker.prune(later), 1);
    }
}
