//! # Per-Context Rate Limiter Registry
//!
//! A client usually talks to several backends, and each deserves its own
//! admission budget. The registry hands out one [`RateLimiter`] per context
//! key (typically a host name) and tears limiters down when their context
//! goes away.
//!
//! ```text
//!     Client contexts:
//!
//!     api.example.com ────┐
//!     cdn.example.com ────┼──► Registry ──► Individual Rate Limiters
//!     auth.example.com ───┘       │
//!                                 ▼
//!                        ┌────────────────────┐
//!                        │  DashMap           │
//!                        │  ┌──────────────┐  │
//!                        │  │ key → RL     │  │  RL = Rate Limiter
//!                        │  │ key → RL     │  │
//!                        │  └──────────────┘  │
//!                        └────────────────────┘
//! ```
//!
//! All limiters created by one registry share its clock and scheduler.

use super::{
    config::RateLimiterConfig,
    core::RateLimiter,
    scheduler::{Clock, Scheduler, SystemClock, ThreadScheduler},
};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of rate limiters keyed by client context.
///
/// ## Example
///
/// ```rust
/// use inflight::{RateLimiterConfig, RateLimiterRegistry};
/// use std::sync::Arc;
///
/// let registry = RateLimiterRegistry::new(RateLimiterConfig::concurrent(4));
///
/// let api = registry.get_or_create("api.example.com");
/// let same = registry.get_or_create("api.example.com");
/// assert!(Arc::ptr_eq(&api, &same));
///
/// registry.remove("api.example.com");
/// assert!(api.is_torn_down());
/// ```
pub struct RateLimiterRegistry {
    /// Context key to limiter. DashMap shards the lock per bucket.
    limiters: DashMap<String, Arc<RateLimiter>, ahash::RandomState>,

    /// Configuration template for new limiters.
    config: RateLimiterConfig,

    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,

    /// Limiters created since startup.
    total_created: AtomicU64,

    /// Limiters removed and torn down since startup.
    total_removed: AtomicU64,
}

impl RateLimiterRegistry {
    /// Creates a registry using the system clock and a thread scheduler.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(config: RateLimiterConfig) -> Self {
        config.validate().expect("Invalid rate limiter configuration");
        Self::from_validated(config, Arc::new(SystemClock), Arc::new(ThreadScheduler::new()))
    }

    /// Creates a registry with injected time source and scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error message if the configuration is invalid.
    pub fn with_parts(
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, &'static str> {
        config.validate()?;
        Ok(Self::from_validated(config, clock, scheduler))
    }

    fn from_validated(
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            limiters: DashMap::with_hasher(ahash::RandomState::new()),
            config,
            clock,
            scheduler,
            total_created: AtomicU64::new(0),
            total_removed: AtomicU64::new(0),
        }
    }

    /// Returns the limiter for `key`, creating it on first use.
    pub fn get_or_create(&self, key: &str) -> Arc<RateLimiter> {
        // Fast path: no allocation for known keys
        if let Some(limiter) = self.limiters.get(key) {
            return limiter.clone();
        }

        self.limiters
            .entry(key.to_string())
            .or_insert_with(|| {
                let limiter = RateLimiter::from_validated(
                    self.config.clone(),
                    self.clock.clone(),
                    self.scheduler.clone(),
                );
                let total = self.total_created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Created rate limiter for context {} (total: {})", key, total);
                limiter
            })
            .clone()
    }

    /// Returns the limiter for `key` if one exists.
    pub fn get(&self, key: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(key).map(|entry| entry.clone())
    }

    /// Removes the limiter for `key` and tears it down.
    ///
    /// Returns `true` if a limiter was registered under `key`.
    pub fn remove(&self, key: &str) -> bool {
        match self.limiters.remove(key) {
            Some((_, limiter)) => {
                limiter.tear_down();
                self.total_removed.fetch_add(1, Ordering::Relaxed);
                debug!("Removed rate limiter for context {}", key);
                true
            }
            None => false,
        }
    }

    /// Removes and tears down every limiter.
    pub fn tear_down_all(&self) {
        let keys: Vec<String> = self.limiters.iter().map(|entry| entry.key().clone()).collect();
        let mut removed = 0;
        for key in &keys {
            if self.remove(key) {
                removed += 1;
            }
        }
        info!("Tore down {} rate limiters", removed);
    }

    /// Number of contexts with a limiter.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Returns `true` if no limiter is registered.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Returns aggregated statistics across all limiters.
    pub fn stats(&self) -> RegistryStats {
        let (active_requests, waiting_requests, contexts_at_limit) = self.limiters.iter().fold(
            (0, 0, 0),
            |(active, waiting, at_limit), entry| {
                let limiter = entry.value();
                (
                    active + limiter.active_count(),
                    waiting + limiter.waiting_count(),
                    at_limit + usize::from(limiter.at_rate_limit()),
                )
            },
        );

        RegistryStats {
            contexts: self.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
            active_requests,
            waiting_requests,
            contexts_at_limit,
        }
    }
}

impl fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("contexts", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Statistics for a [`RateLimiterRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Contexts with a live limiter.
    pub contexts: usize,

    /// Limiters created since startup.
    pub total_created: u64,

    /// Limiters removed since startup.
    pub total_removed: u64,

    /// Requests in flight across all contexts.
    pub active_requests: usize,

    /// Requests queued across all contexts.
    pub waiting_requests: usize,

    /// Contexts currently at their limit.
    pub contexts_at_limit: usize,
}

impl RegistryStats {
    /// Returns a human-readable summary of the statistics.
    pub fn summary(&self) -> String {
        format!(
            "Rate Limiter Registry Stats:\n\
             ├─ Contexts:\n\
             │  ├─ Live: {}\n\
             │  └─ At Limit: {}\n\
             ├─ Requests:\n\
             │  ├─ Active: {}\n\
             │  └─ Waiting: {}\n\
             └─ Lifetime:\n\
                ├─ Total Created: {}\n\
                └─ Total Removed: {}",
            self.contexts,
            self.contexts_at_limit,
            self.active_requests,
            self.waiting_requests,
            self.total_created,
            self.total_removed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, ManualScheduler};
    use crate::{RateLimitedRequest, RequestHandle};
    use std::thread;

    struct Eager;

    impl RateLimitedRequest for Eager {
        fn request_start(&self) -> bool {
            true
        }
    }

    fn registry(limit: usize) -> RateLimiterRegistry {
        let clock = Arc::new(ManualClock::new());
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        RateLimiterRegistry::with_parts(RateLimiterConfig::concurrent(limit), clock, scheduler).unwrap()
    }

    #[test]
    fn test_get_or_create_reuses_limiter() {
        let registry = registry(2);

        let a = registry.get_or_create("a.example");
        let again = registry.get_or_create("a.example");
        let b = registry.get_or_create("b.example");

        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.stats().total_created, 2);
    }

    #[test]
    fn test_contexts_are_isolated() {
        let registry = registry(1);
        let a = registry.get_or_create("a.example");
        let b = registry.get_or_create("b.example");

        let first: RequestHandle = Arc::new(Eager);
        let second: RequestHandle = Arc::new(Eager);
        a.register_waiting_request(first);
        b.register_waiting_request(second);

        assert!(a.at_rate_limit());
        assert!(b.at_rate_limit());
        assert_eq!(a.waiting_count(), 0);
        assert_eq!(registry.stats().contexts_at_limit, 2);
    }

    #[test]
    fn test_remove_tears_down() {
        let registry = registry(2);
        let limiter = registry.get_or_create("gone.example");

        assert!(registry.remove("gone.example"));
        assert!(!registry.remove("gone.example"));
        assert!(limiter.is_torn_down());
        assert!(registry.get("gone.example").is_none());
        assert_eq!(registry.stats().total_removed, 1);
    }

    #[test]
    fn test_tear_down_all() {
        let registry = registry(2);
        let limiters: Vec<_> = (0..5)
            .map(|i| registry.get_or_create(&format!("host-{}", i)))
            .collect();

        registry.tear_down_all();

        assert!(registry.is_empty());
        assert!(limiters.iter().all(|l| l.is_torn_down()));
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let registry = Arc::new(registry(4));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get_or_create("shared.example"))
            })
            .collect();

        let limiters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(limiters.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.stats().total_created, 1);
    }

    #[test]
    fn test_stats_summary() {
        let registry = registry(3);
        registry.get_or_create("a.example");

        let summary = registry.stats().summary();
        assert!(summary.contains("Live: 1"));
        assert!(summary.contains("Total Created: 1"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
        let result = RateLimiterRegistry::with_parts(RateLimiterConfig::concurrent(0), clock, scheduler);
        assert!(result.is_err());
    }
}
