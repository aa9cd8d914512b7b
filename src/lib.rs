//! # Inflight - Client-Side Admission Control for Outbound Requests
//!
//! A small library that decides when outbound network requests are allowed to
//! start. It caps how many requests are in flight at once, queues the rest in
//! arrival order, and starts them as capacity frees up.
//!
//! ## What Does It Do?
//!
//! Backends often throttle clients that open too many connections at once.
//! Instead of letting every request race to the server, each request
//! registers with a [`RateLimiter`] and waits its turn:
//!
//! ```text
//!     limit = 2
//!
//!     register A  → starts          active [A]      waiting []
//!     register B  → starts          active [A][B]   waiting []
//!     register C  → waits           active [A][B]   waiting [C]
//!     A finishes  → C starts        active [B][C]   waiting []
//! ```
//!
//! ## Features
//!
//! - 🚦 **Concurrency Cap** - At most `limit` requests in flight
//! - 📋 **FIFO Queue** - Waiting requests start in the order they arrived
//! - ⏱️ **Optional Window** - Finished requests can keep their slot until a
//!   window has elapsed since they started
//! - 🔁 **Self-Healing** - A delayed re-check drains the queue even if a
//!   finish event is missed
//! - 🧪 **Injectable Time** - Clock and scheduler are seams, so tests run on
//!   virtual time
//! - 🌐 **Per-Context Limiting** - One limiter per backend via the registry
//! - 📊 **Metrics** - Counters and health status for observability
//!
//! ## Quick Start
//!
//! ```rust
//! use inflight::{RateLimitedRequest, RateLimiter, RequestHandle};
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Fetch {
//!     started: AtomicBool,
//! }
//!
//! impl RateLimitedRequest for Fetch {
//!     fn request_start(&self) -> bool {
//!         self.started.store(true, Ordering::SeqCst);
//!         true
//!     }
//! }
//!
//! let limiter = RateLimiter::new(2);
//! let fetch = Arc::new(Fetch::default());
//! let handle: RequestHandle = fetch.clone();
//!
//! limiter.register_waiting_request(handle.clone());
//! assert!(fetch.started.load(Ordering::SeqCst));
//!
//! // ... later, when the response arrives:
//! limiter.request_did_finish(&handle);
//! ```
//!
//! ### Builder With Virtual Time
//!
//! ```rust
//! use inflight::{ManualClock, ManualScheduler, RateLimiterBuilder};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let scheduler = Arc::new(ManualScheduler::new(Arc::new(ManualClock::new())));
//!
//! let limiter = RateLimiterBuilder::new()
//!     .limit(4)
//!     .window(Duration::from_secs(1))
//!     .manual(&scheduler)
//!     .build();
//!
//! assert_eq!(limiter.rate_limit(), 4);
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Your HTTP Client      │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼───────────────┐
//!                    │    Rate Limiter API      │
//!                    ├──────────────────────────┤
//!                    │  • register_waiting_...  │
//!                    │  • request_did_finish()  │
//!                    │  • lock() / at_limit     │
//!                    └──────────┬───────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │   Limiter State     │       │   Time Seams         │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • Wait queue        │       │ • Clock::now()       │
//!     │ • Active tracker    │       │ • Scheduler::after() │
//!     │ • Re-check state    │       │ • TimerHandle        │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! All public types are thread-safe. Limiters are always handed out as
//! `Arc<RateLimiter>` because the delayed re-check needs a weak reference
//! back to the limiter.
//!
//! ## Examples
//!
//! See the `demos/` directory for a runnable example:
//! - `basic.rs` - Simulated downloads going through a limiter

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_op_in_unsafe_fn)]

// Internal module
mod rate_limiter;

use std::sync::Arc;
use std::time::Duration;

// Public re-exports
pub use rate_limiter::{
    Callback, Clock, CompletionEvent, HealthStatus, LimitSignal, ManualClock, ManualScheduler,
    RateLimitGuard, RateLimitedRequest, RateLimiter, RateLimiterConfig, RateLimiterMetrics,
    RateLimiterRegistry, RegistryStats, RequestHandle, RequestKey, Scheduler, SystemClock,
    ThreadScheduler, TimerHandle, DEFAULT_LIMIT, DEFAULT_RECHECK_INTERVAL,
};

/// A rate limiter shared across threads.
///
/// # Example
/// ```rust
/// use inflight::{RateLimiter, SharedRateLimiter};
///
/// let shared: SharedRateLimiter = RateLimiter::new(4);
///
/// let limiter_clone = shared.clone();
/// std::thread::spawn(move || {
///     limiter_clone.at_rate_limit();
/// });
/// ```
pub type SharedRateLimiter = Arc<RateLimiter>;

/// A registry wrapped in `Arc` for sharing across threads.
pub type SharedRegistry = Arc<RateLimiterRegistry>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
///
/// This crate requires at least Rust 1.70.0 due to:
/// - `let ... else` statements
/// - Edition 2021 features
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// Import everything you need with a single line:
/// ```rust
/// use inflight::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical admission control use cases.
    //!
    //! # Example
    //! ```rust
    //! use inflight::prelude::*;
    //!
    //! let limiter = RateLimiter::new(4);
    //! let config = RateLimiterConfig::concurrent(8);
    //! let status = HealthStatus::Healthy;
    //! ```

    pub use crate::{
        CompletionEvent, HealthStatus, LimitSignal, RateLimitedRequest, RateLimiter,
        RateLimiterBuilder, RateLimiterConfig, RateLimiterMetrics, RateLimiterRegistry,
        RequestHandle, SharedRateLimiter, SharedRegistry,
    };
}

/// Builder pattern for creating rate limiters with custom configuration.
///
/// # Example
///
/// ```rust
/// use inflight::RateLimiterBuilder;
/// use std::time::Duration;
///
/// // 10 requests per second, started no more than 10 at a time
/// let limiter = RateLimiterBuilder::new()
///     .limit(10)
///     .window(Duration::from_secs(1))
///     .build();
///
/// // Or use try_build() for error handling
/// let result = RateLimiterBuilder::new()
///     .limit(0)  // Invalid!
///     .try_build();
///
/// assert!(result.is_err());
/// ```
#[derive(Clone, Default)]
pub struct RateLimiterBuilder {
    config: RateLimiterConfig,
    clock: Option<Arc<dyn Clock>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl RateLimiterBuilder {
    /// Creates a new builder with default configuration.
    ///
    /// Default configuration:
    /// - 4 requests in flight
    /// - No window
    /// - 1 second re-check interval
    /// - System clock and thread scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of occupied slots (must be > 0).
    pub fn limit(mut self, limit: usize) -> Self {
        self.config.limit = limit;
        self
    }

    /// Makes finished requests keep their slot until `window` has elapsed
    /// since they started.
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = Some(window);
        self
    }

    /// Sets the fallback delay before a blocked queue is re-evaluated.
    pub fn recheck_interval(mut self, interval: Duration) -> Self {
        self.config.recheck_interval = interval;
        self
    }

    /// Uses `clock` as the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses `scheduler` for delayed re-checks.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Drives the limiter from a [`ManualScheduler`] and its clock.
    pub fn manual(self, scheduler: &Arc<ManualScheduler>) -> Self {
        let clock: Arc<dyn Clock> = scheduler.clock().clone();
        self.clock(clock).scheduler(scheduler.clone())
    }

    /// Builds the rate limiter with the configured settings.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid:
    /// - `limit` is 0
    /// - `window` is zero
    /// - `recheck_interval` is zero
    ///
    /// Use `try_build()` if you want to handle errors.
    pub fn build(self) -> Arc<RateLimiter> {
        self.try_build().expect("Invalid rate limiter configuration")
    }

    /// Attempts to build the rate limiter, returning an error if invalid.
    ///
    /// # Errors
    ///
    /// Returns an error message if configuration is invalid.
    pub fn try_build(self) -> Result<Arc<RateLimiter>, &'static str> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(ThreadScheduler::new()));
        RateLimiter::with_parts(self.config, clock, scheduler)
    }
}

impl std::fmt::Debug for RateLimiterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterBuilder")
            .field("config", &self.config)
            .field("custom_clock", &self.clock.is_some())
            .field("custom_scheduler", &self.scheduler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
    }

    impl RateLimitedRequest for Counting {
        fn request_start(&self) -> bool {
            self.starts.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn manual() -> Arc<ManualScheduler> {
        Arc::new(ManualScheduler::new(Arc::new(ManualClock::new())))
    }

    #[test]
    fn test_basic_functionality() {
        let limiter = RateLimiterBuilder::new().limit(2).manual(&manual()).build();
        let requests: Vec<Arc<Counting>> = (0..3).map(|_| Arc::default()).collect();
        let handles: Vec<RequestHandle> = requests
            .iter()
            .map(|r| r.clone() as RequestHandle)
            .collect();

        for handle in &handles {
            assert!(limiter.register_waiting_request(handle.clone()));
        }

        assert_eq!(limiter.active_count(), 2);
        assert_eq!(limiter.waiting_count(), 1);
        assert_eq!(requests[2].starts.load(Ordering::SeqCst), 0);

        limiter.request_did_finish(&handles[0]);
        assert_eq!(requests[2].starts.load(Ordering::SeqCst), 1);

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_registered, 3);
        assert_eq!(metrics.total_granted, 3);
    }

    #[test]
    fn test_builder() {
        let limiter = RateLimiterBuilder::new()
            .limit(8)
            .window(Duration::from_millis(500))
            .recheck_interval(Duration::from_millis(250))
            .manual(&manual())
            .build();

        assert_eq!(limiter.rate_limit(), 8);
        assert_eq!(limiter.config().window, Some(Duration::from_millis(500)));
        assert_eq!(
            limiter.config().recheck_interval,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_builder_validation() {
        assert!(RateLimiterBuilder::new().limit(0).try_build().is_err());
        assert!(RateLimiterBuilder::new()
            .window(Duration::ZERO)
            .try_build()
            .is_err());
        assert!(RateLimiterBuilder::new()
            .recheck_interval(Duration::ZERO)
            .try_build()
            .is_err());
    }

    #[test]
    fn test_thread_safety() {
        let limiter = RateLimiterBuilder::new().limit(8).manual(&manual()).build();
        let mut handles = vec![];

        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(thread::spawn(move || {
                let request: RequestHandle = Arc::new(Counting::default());
                for _ in 0..50 {
                    limiter.register_waiting_request(request.clone());
                    limiter.request_did_finish(&request);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(limiter.active_count(), 0);
        assert_eq!(limiter.waiting_count(), 0);
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _limiter = RateLimiter::new(4);
        let _config = RateLimiterConfig::default();
        let _signal = LimitSignal::Lifted;
        let _status = HealthStatus::Healthy;
    }

    #[test]
    fn test_shared_types() {
        let _shared: SharedRateLimiter = RateLimiter::new(4);
        let registry = RateLimiterRegistry::new(RateLimiterConfig::default());
        let _shared_registry: SharedRegistry = Arc::new(registry);
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(MSRV, "1.70.0");
        assert_eq!(DEFAULT_LIMIT, 4);
    }

    #[test]
    fn test_builder_default() {
        let limiter = RateLimiterBuilder::default().build();
        assert_eq!(limiter.rate_limit(), DEFAULT_LIMIT);
        assert!(!limiter.at_rate_limit());
        limiter.tear_down();
    }

    #[test]
    fn test_builder_debug() {
        let debug = format!("{:?}", RateLimiterBuilder::new().manual(&manual()));
        assert!(debug.contains("custom_clock: true"));
    }
}
