//! FIFO holding area for requests blocked by capacity.

use super::request::{RequestHandle, RequestKey};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Strict FIFO queue of request handles with identity-based deduplication.
///
/// Insertion order is release order. A handle can be queued at most once at
/// a time.
#[derive(Default)]
pub(crate) struct WaitQueue {
    entries: VecDeque<(RequestKey, RequestHandle)>,
    members: HashSet<RequestKey>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends `handle` at the tail. Returns `false` if it is already queued.
    pub(crate) fn push_back(&mut self, handle: RequestHandle) -> bool {
        let key = RequestKey::of(&handle);
        if !self.members.insert(key) {
            return false;
        }
        self.entries.push_back((key, handle));
        true
    }

    #[allow(dead_code)]
    pub(crate) fn peek_front(&self) -> Option<&RequestHandle> {
        self.entries.front().map(|(_, handle)| handle)
    }

    pub(crate) fn pop_front(&mut self) -> Option<(RequestKey, RequestHandle)> {
        let (key, handle) = self.entries.pop_front()?;
        self.members.remove(&key);
        Some((key, handle))
    }

    /// Removes the handle with identity `key`, wherever it sits.
    pub(crate) fn remove(&mut self, key: RequestKey) -> Option<RequestHandle> {
        if !self.members.remove(&key) {
            return None;
        }
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        self.entries.remove(index).map(|(_, handle)| handle)
    }

    pub(crate) fn contains(&self, key: RequestKey) -> bool {
        self.members.contains(&key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every queued handle, returning how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.members.clear();
        count
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(key, _)| key))
            .finish()
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

    fn handle() -> RequestHandle {
        Arc::new(Stub)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = WaitQueue::new();
        let (a, b, c) = (handle(), handle(), handle());

        assert!(queue.push_back(a.clone()));
        assert!(queue.push_back(b.clone()));
        assert!(queue.push_back(c.clone()));
        assert_eq!(queue.len(), 3);
        assert!(Arc::ptr_eq(queue.peek_front().unwrap(), &a));

        let popped: Vec<RequestKey> = std::iter::from_fn(|| queue.pop_front().map(|(k, _)| k)).collect();
        assert_eq!(
            popped,
            vec![RequestKey::of(&a), RequestKey::of(&b), RequestKey::of(&c)]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut queue = WaitQueue::new();
        let a = handle();

        assert!(queue.push_back(a.clone()));
        assert!(!queue.push_back(a.clone()));
        assert_eq!(queue.len(), 1);

        // Once popped it may be queued again.
        queue.pop_front();
        assert!(queue.push_back(a));
    }

    #[test]
    fn test_remove_by_identity() {
        let mut queue = WaitQueue::new();
        let (a, b, c) = (handle(), handle(), handle());
        queue.push_back(a.clone());
        queue.push_back(b.clone());
        queue.push_back(c.clone());

        assert!(queue.remove(RequestKey::of(&b)).is_some());
        assert!(queue.remove(RequestKey::of(&b)).is_none());
        assert!(!queue.contains(RequestKey::of(&b)));

        assert_eq!(queue.pop_front().map(|(k, _)| k), Some(RequestKey::of(&a)));
        assert_eq!(queue.pop_front().map(|(k, _)| k), Some(RequestKey::of(&c)));
    }

    #[test]
    fn test_clear() {
        let mut queue = WaitQueue::new();
        queue.push_back(handle());
        queue.push_back(handle());

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }
}
