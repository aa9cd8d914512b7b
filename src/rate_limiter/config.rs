//! # Rate Limiter Configuration
//!
//! Settings that decide how much outbound traffic a [`RateLimiter`] admits.
//!
//! ```text
//!     Admission Configuration:
//!
//!     ┌──────────────────────────────────┐
//!     │   limit: 4                       │ ← Concurrent slots
//!     │   ┌──────────────────────────┐   │
//!     │   │ [A] [B] [C] [ ]          │   │ ← Occupied slots
//!     │   └──────────────────────────┘   │
//!     │                                  │
//!     │   window: Some(1s)               │ ← Finished requests hold their
//!     │                                  │   slot until 1s after start
//!     │   recheck_interval: 1s           │ ← Fallback re-check delay
//!     └──────────────────────────────────┘
//! ```
//!
//! [`RateLimiter`]: crate::RateLimiter

use std::time::Duration;

/// Default number of requests allowed in flight at once.
pub const DEFAULT_LIMIT: usize = 4;

/// Default delay before a blocked queue is re-evaluated when no window is set.
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for rate limiter instances.
///
/// ## Examples
///
/// ```rust
/// use inflight::RateLimiterConfig;
/// use std::time::Duration;
///
/// // At most 4 requests in flight
/// let config = RateLimiterConfig::concurrent(4);
///
/// // At most 10 requests started in any 1 second window
/// let config = RateLimiterConfig::per_window(10, Duration::from_secs(1));
///
/// // Tune the fallback re-check delay
/// let config = RateLimiterConfig::default()
///     .with_recheck_interval(Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Maximum number of requests occupying capacity at once.
    pub limit: usize,

    /// Sliding window measured from each request's start.
    ///
    /// When set, a finished request keeps its slot until the window has
    /// elapsed since it started. `None` means only in-flight requests count.
    pub window: Option<Duration>,

    /// Delay used for the delayed re-check when there is no window expiry
    /// to wait for.
    pub recheck_interval: Duration,
}

impl Default for RateLimiterConfig {
    /// Four concurrent requests, no window, one second re-check.
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: None,
            recheck_interval: DEFAULT_RECHECK_INTERVAL,
        }
    }
}

impl RateLimiterConfig {
    /// Creates a configuration capping in-flight requests only.
    pub fn concurrent(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Creates a configuration capping requests started within `window`.
    ///
    /// Requests still in flight keep counting after the window passes.
    pub fn per_window(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window: Some(window),
            ..Default::default()
        }
    }

    /// Sets the sliding window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    /// Sets the fallback re-check delay.
    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    /// Validates the configuration for correctness.
    ///
    /// # Errors
    ///
    /// Returns an error message if:
    /// - `limit` is 0
    /// - `window` is set to zero
    /// - `recheck_interval` is zero
    ///
    /// ```rust
    /// use inflight::RateLimiterConfig;
    ///
    /// assert!(RateLimiterConfig::concurrent(0).validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.limit == 0 {
            return Err("limit must be greater than 0");
        }

        if self.window == Some(Duration::ZERO) {
            return Err("window must be greater than 0 when set");
        }

        if self.recheck_interval.is_zero() {
            return Err("recheck_interval must be greater than 0");
        }

        Ok(())
    }

    /// Returns the sustained request rate per second implied by the window.
    ///
    /// Without a window there is no time-based cap, so this returns `None`.
    ///
    /// ```rust
    /// use inflight::RateLimiterConfig;
    /// use std::time::Duration;
    ///
    /// let config = RateLimiterConfig::per_window(10, Duration::from_millis(500));
    /// assert_eq!(config.effective_rate_per_second(), Some(20.0));
    /// ```
    pub fn effective_rate_per_second(&self) -> Option<f64> {
        self.window
            .filter(|w| !w.is_zero())
            .map(|w| self.limit as f64 / w.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.limit, 4);
        assert_eq!(config.window, None);
        assert_eq!(config.recheck_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimiterConfig::concurrent(0).validate().is_err());

        let zero_window = RateLimiterConfig::per_window(4, Duration::ZERO);
        assert!(zero_window.validate().is_err());

        let zero_recheck = RateLimiterConfig::default().with_recheck_interval(Duration::ZERO);
        assert!(zero_recheck.validate().is_err());
    }

    #[test]
    fn test_config_builders() {
        let config = RateLimiterConfig::concurrent(2).with_window(Duration::from_secs(2));
        assert_eq!(config.limit, 2);
        assert_eq!(config.window, Some(Duration::from_secs(2)));
        assert_eq!(config.effective_rate_per_second(), Some(1.0));
    }

    #[test]
    fn test_effective_rate_without_window() {
        assert_eq!(RateLimiterConfig::concurrent(8).effective_rate_per_second(), None);
    }
}
