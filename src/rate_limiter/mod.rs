//! # Rate Limiter Module
//!
//! Internal implementation of the admission controller, split by concern.
//!
//! ## Module Structure
//!
//! ```text
//!     rate_limiter/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── config.rs       (Limit, window and re-check settings)
//!     ├── core.rs         (Admission decisions and queue draining)
//!     ├── manager.rs      (Per-context limiter registry)
//!     ├── metrics.rs      (Counters and health)
//!     ├── queue.rs        (FIFO of waiting requests)
//!     ├── request.rs      (Request capability and lifecycle events)
//!     ├── scheduler.rs    (Clock and delayed-callback seams)
//!     ├── signal.rs       (Capacity change broadcasts)
//!     └── tracker.rs      (Active and windowed slot accounting)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Request
//!        │ register_waiting_request
//!        ▼
//!     ┌──────────┐   full?   ┌──────────┐
//!     │  Queue   │ ◄──────── │   Core   │ ──► Signals
//!     └────┬─────┘           └────┬─────┘
//!          │ drain                │ now() / after()
//!          ▼                      ▼
//!     ┌──────────┐           ┌───────────┐
//!     │ Tracker  │           │ Scheduler │
//!     └──────────┘           └───────────┘
//! ```

mod config;
mod core;
mod manager;
mod metrics;
mod queue;
mod request;
mod scheduler;
mod signal;
mod tracker;

/// Configuration types for customizing rate limiter behavior
pub use config::{RateLimiterConfig, DEFAULT_LIMIT, DEFAULT_RECHECK_INTERVAL};

/// Admission controller and its lock guard
pub use core::{RateLimitGuard, RateLimiter};

/// Per-context limiter registry
pub use manager::{RateLimiterRegistry, RegistryStats};

/// Metrics and health monitoring for observability
pub use metrics::{HealthStatus, RateLimiterMetrics};

/// Request capability and lifecycle events
pub use request::{CompletionEvent, RateLimitedRequest, RequestHandle, RequestKey};

/// Time source and delayed-callback seams
pub use scheduler::{
    Callback, Clock, ManualClock, ManualScheduler, Scheduler, SystemClock, ThreadScheduler,
    TimerHandle,
};

/// Capacity change broadcasts
pub use signal::LimitSignal;
