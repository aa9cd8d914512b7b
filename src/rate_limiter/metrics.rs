//! # Rate Limiter Metrics
//!
//! Snapshot counters that show how the limiter is admitting traffic and
//! whether requests are piling up behind it.
//!
//! ```text
//!     Metrics Dashboard:
//!     ┌─────────────────────────────────────┐
//!     │  Occupied: 4/4   Waiting: 3         │
//!     │  ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓  (100%)       │
//!     │                                     │
//!     │  Granted: 120   Declined: 2         │
//!     │  Health: ⚠️ Degraded                 │
//!     └─────────────────────────────────────┘
//! ```

use std::fmt;

/// Point-in-time metrics for a [`RateLimiter`](crate::RateLimiter).
///
/// ## Key Metrics Explained
///
/// ### Flow
/// - **total_registered**: requests that entered the wait queue
/// - **total_granted**: requests that accepted a start offer
/// - **total_declined**: requests that refused a start offer and were dropped
/// - **total_finished**: finish events for tracked requests
///
/// ### Anomalies
/// - **stale_finishes**: finish events for requests never counted active
/// - **duplicate_registrations**: registrations ignored because the request
///   was already queued or active
///
/// ### Capacity
/// - **active_requests** / **occupied** / **limit**: current load
/// - **waiting_requests**: queue depth right now
///
/// ```rust
/// use inflight::RateLimiter;
///
/// let limiter = RateLimiter::new(4);
/// let metrics = limiter.metrics();
/// assert_eq!(metrics.limit, 4);
/// println!("{}", metrics.summary());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterMetrics {
    /// Requests accepted into the wait queue.
    pub total_registered: u64,

    /// Requests granted a start (drained or started under the lock).
    pub total_granted: u64,

    /// Requests that declined their start offer.
    pub total_declined: u64,

    /// Finish events that released an active request.
    pub total_finished: u64,

    /// Finish events for requests that were not active.
    pub stale_finishes: u64,

    /// Registrations ignored as duplicates.
    pub duplicate_registrations: u64,

    /// Delayed re-checks scheduled.
    pub rechecks_scheduled: u64,

    /// Requests started and not yet finished.
    pub active_requests: usize,

    /// Capacity in use, including windowed slots of finished requests.
    pub occupied: usize,

    /// Requests currently queued.
    pub waiting_requests: usize,

    /// Configured limit.
    pub limit: usize,
}

impl RateLimiterMetrics {
    /// Fraction of start offers that were accepted (1.0 when none were made).
    #[inline]
    pub fn grant_rate(&self) -> f64 {
        let offers = self.total_granted + self.total_declined;
        if offers == 0 {
            1.0
        } else {
            self.total_granted as f64 / offers as f64
        }
    }

    /// Fraction of start offers that were declined.
    #[inline]
    pub fn decline_rate(&self) -> f64 {
        1.0 - self.grant_rate()
    }

    /// Share of capacity in use, from 0.0 to 1.0.
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            (self.occupied as f64 / self.limit as f64).min(1.0)
        }
    }

    /// Returns `true` if no capacity is left.
    #[inline]
    pub fn is_at_limit(&self) -> bool {
        self.occupied >= self.limit
    }

    /// At the limit with requests waiting.
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.is_at_limit() && self.waiting_requests > 0
    }

    /// More requests waiting than the limiter can run at once.
    #[inline]
    pub fn is_under_sustained_pressure(&self) -> bool {
        self.is_at_limit() && self.waiting_requests >= self.limit.max(1)
    }

    /// Three-level health assessment.
    pub fn health_status(&self) -> HealthStatus {
        if self.is_under_sustained_pressure() {
            HealthStatus::Critical
        } else if self.is_under_pressure() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable report suitable for logging.
    pub fn summary(&self) -> String {
        format!(
            "RateLimiter Metrics:\n\
             ├─ Capacity:\n\
             │  ├─ Occupied: {}/{}\n\
             │  ├─ Active Requests: {}\n\
             │  ├─ Waiting Requests: {}\n\
             │  └─ Utilization: {:.2}%\n\
             ├─ Flow:\n\
             │  ├─ Registered: {}\n\
             │  ├─ Granted: {}\n\
             │  ├─ Declined: {}\n\
             │  ├─ Finished: {}\n\
             │  └─ Grant Rate: {:.2}%\n\
             ├─ Anomalies:\n\
             │  ├─ Stale Finishes: {}\n\
             │  ├─ Duplicate Registrations: {}\n\
             │  └─ Re-checks Scheduled: {}\n\
             └─ Health:\n\
                ├─ Status: {:?}\n\
                └─ Under Pressure: {}",
            self.occupied,
            self.limit,
            self.active_requests,
            self.waiting_requests,
            self.utilization() * 100.0,
            self.total_registered,
            self.total_granted,
            self.total_declined,
            self.total_finished,
            self.grant_rate() * 100.0,
            self.stale_finishes,
            self.duplicate_registrations,
            self.rechecks_scheduled,
            self.health_status(),
            self.is_under_pressure(),
        )
    }
}

impl fmt::Display for RateLimiterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Health status indicator for the rate limiter.
///
/// ```text
///     Healthy ──────► Capacity left, or nothing waiting
///        │
///     Degraded ─────► At the limit with a queue forming
///        │
///     Critical ─────► Queue deeper than the limit itself
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Requests start without waiting.
    Healthy,

    /// Requests are queueing behind a full limiter.
    Degraded,

    /// The queue holds at least a full limit's worth of requests.
    Critical,
}

impl HealthStatus {
    /// Returns true if the status indicates any problems.
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Returns a suggested action based on the health status.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, requests are queueing",
            Self::Critical => "Immediate action required: raise the limit or shed load",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "✅ Healthy"),
            Self::Degraded => write!(f, "⚠️ Degraded"),
            Self::Critical => write!(f, "🔴 Critical"),
        }
    }
}
