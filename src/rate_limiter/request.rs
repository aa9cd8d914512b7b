//! # Rate-Limited Request Capability
//!
//! Any outbound operation can be admitted by a [`RateLimiter`] as long as it
//! implements [`RateLimitedRequest`]. The limiter does not know how the
//! request performs its I/O; it only asks "start now?" and listens for the
//! start/finish events.
//!
//! ```text
//!     Request lifecycle seen by the limiter:
//!
//!     register ──► queued ──► request_start() ──true──► active ──► finished
//!                    │               │
//!                    │             false
//!                    ▼               ▼
//!                 cancelled       abandoned
//! ```
//!
//! [`RateLimiter`]: crate::RateLimiter

use super::core::RateLimiter;
use std::fmt;
use std::sync::{Arc, Weak};

/// Capability implemented by operations that go through a rate limiter.
///
/// ## Contract
///
/// - [`request_start`](Self::request_start) is called with the limiter lock
///   held. It must begin the request (or decide it never will) and return
///   without calling back into the limiter.
/// - Once started, the request reports completion with
///   [`RateLimiter::request_did_finish`].
///
/// ## Example
///
/// ```rust
/// use inflight::{RateLimitedRequest, RateLimiter};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::{Mutex, Weak};
///
/// #[derive(Default)]
/// struct Download {
///     limiter: Mutex<Weak<RateLimiter>>,
///     cancelled: AtomicBool,
///     started: AtomicBool,
/// }
///
/// impl RateLimitedRequest for Download {
///     fn attach_rate_limiter(&self, limiter: Weak<RateLimiter>) {
///         *self.limiter.lock().unwrap() = limiter;
///     }
///
///     fn request_start(&self) -> bool {
///         if self.cancelled.load(Ordering::SeqCst) {
///             return false;
///         }
///         self.started.store(true, Ordering::SeqCst);
///         true
///     }
/// }
/// ```
pub trait RateLimitedRequest: Send + Sync {
    /// Receives the non-owning back-reference to the limiter tracking this
    /// request. Called on registration.
    fn attach_rate_limiter(&self, limiter: Weak<RateLimiter>) {
        let _ = limiter;
    }

    /// Starts the request now.
    ///
    /// Returns `true` if the request began, `false` if it was not and never
    /// will be started (for example because it already finished or was
    /// cancelled).
    fn request_start(&self) -> bool;
}

/// Shared handle to a rate-limited request.
pub type RequestHandle = Arc<dyn RateLimitedRequest>;

/// Identity of a request handle.
///
/// Derived from the handle's allocation. It stays unique for as long as the
/// limiter holds the handle, which it does while the request is queued or
/// active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(usize);

impl RequestKey {
    /// Returns the identity of `handle`.
    #[inline]
    pub fn of(handle: &RequestHandle) -> Self {
        Self(Arc::as_ptr(handle) as *const () as usize)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{:x}", self.0)
    }
}

/// Start/finish notification for a tracked request.
///
/// Delivered either by calling [`RateLimiter::observe`] directly or by
/// sending it down the channel returned from
/// [`RateLimiter::spawn_event_listener`].
#[derive(Clone)]
pub enum CompletionEvent {
    /// The request is about to start outside the drain path.
    WillStart(RequestHandle),
    /// The request has finished, successfully or not.
    DidFinish(RequestHandle),
}

impl CompletionEvent {
    /// Returns the identity of the request the event refers to.
    pub fn key(&self) -> RequestKey {
        match self {
            Self::WillStart(handle) | Self::DidFinish(handle) => RequestKey::of(handle),
        }
    }
}

impl fmt::Debug for CompletionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WillStart(_) => f.debug_tuple("WillStart").field(&self.key()).finish(),
            Self::DidFinish(_) => f.debug_tuple("DidFinish").field(&self.key()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl RateLimitedRequest for Noop {
        fn request_start(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_request_key_identity() {
        let a: RequestHandle = Arc::new(Noop);
        let b: RequestHandle = Arc::new(Noop);
        let a_again = a.clone();

        assert_eq!(RequestKey::of(&a), RequestKey::of(&a_again));
        assert_ne!(RequestKey::of(&a), RequestKey::of(&b));
    }

    #[test]
    fn test_event_key_and_debug() {
        let handle: RequestHandle = Arc::new(Noop);
        let event = CompletionEvent::DidFinish(handle.clone());

        assert_eq!(event.key(), RequestKey::of(&handle));
        assert!(format!("{:?}", event).starts_with("DidFinish("));
        assert!(RequestKey::of(&handle).to_string().starts_with("req#"));
    }
}
