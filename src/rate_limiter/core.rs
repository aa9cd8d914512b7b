//! # Core Rate Limiter Implementation
//!
//! The [`RateLimiter`] decides which outbound requests may start. It owns the
//! wait queue and the active-request accounting behind one mutex, and drains
//! the queue whenever capacity might have freed up.
//!
//! ## Admission Flow
//!
//! ```text
//!     register_waiting_request(R)
//!              │
//!              ▼
//!     ┌─────────────────┐        ┌──────────────────────┐
//!     │   Wait Queue    │ ─pop─► │ R.request_start() ?  │
//!     │  [R] [S] [T]    │        └──────────┬───────────┘
//!     └─────────────────┘             true  │  false
//!              ▲                      ▼     ▼
//!              │                  active   dropped
//!              │                     │
//!     drain ◄──┴── request_did_finish / delayed re-check
//! ```
//!
//! ## Locking Protocol
//!
//! Callers that start requests themselves must check-then-act under the
//! limiter's lock:
//!
//! ```rust
//! use inflight::{RateLimitedRequest, RateLimiter, RequestHandle};
//! use std::sync::Arc;
//!
//! struct Ping;
//! impl RateLimitedRequest for Ping {
//!     fn request_start(&self) -> bool { true }
//! }
//!
//! let limiter = RateLimiter::new(4);
//! let ping: RequestHandle = Arc::new(Ping);
//!
//! let mut guard = limiter.lock();
//! if !guard.at_rate_limit() {
//!     guard.request_will_start(&ping);
//!     // ... start the request ...
//! }
//! drop(guard); // unlock
//! ```

use super::{
    config::RateLimiterConfig,
    metrics::RateLimiterMetrics,
    queue::WaitQueue,
    request::{CompletionEvent, RequestHandle, RequestKey},
    scheduler::{Clock, Scheduler, SystemClock, ThreadScheduler, TimerHandle},
    signal::{LimitSignal, SignalHub},
    tracker::CompletionTracker,
};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the event listener thread wakes up to notice teardown.
const LISTENER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// State guarded by the limiter's single mutex.
struct LimiterState {
    tracker: CompletionTracker,
    queue: WaitQueue,
    recheck: RecheckState,
}

/// Bookkeeping for the one outstanding delayed re-check.
///
/// The generation guards against a callback from an older schedule
/// clearing the state of a newer one.
#[derive(Default)]
struct RecheckState {
    pending: bool,
    generation: u64,
    deadline: Option<Instant>,
    timer: Option<TimerHandle>,
}

#[derive(Default)]
struct Counters {
    registered: AtomicU64,
    granted: AtomicU64,
    declined: AtomicU64,
    finished: AtomicU64,
    stale_finishes: AtomicU64,
    duplicates: AtomicU64,
    rechecks: AtomicU64,
}

/// Client-side admission controller for outbound requests.
///
/// Caps how many requests occupy capacity at once, queues the rest in
/// registration order and releases them as capacity frees up. Time and
/// delayed callbacks come from the injected [`Clock`] and [`Scheduler`].
///
/// Always handed out as `Arc<RateLimiter>`: queued requests receive a `Weak`
/// back-reference and delayed re-checks hold one too.
///
/// ## Example
///
/// ```rust
/// use inflight::{RateLimitedRequest, RateLimiter, RequestHandle};
/// use std::sync::Arc;
///
/// struct Fetch;
/// impl RateLimitedRequest for Fetch {
///     fn request_start(&self) -> bool { true }
/// }
///
/// let limiter = RateLimiter::new(2);
/// let requests: Vec<RequestHandle> = (0..3).map(|_| Arc::new(Fetch) as RequestHandle).collect();
/// for request in &requests {
///     limiter.register_waiting_request(request.clone());
/// }
///
/// assert_eq!(limiter.active_count(), 2);
/// assert_eq!(limiter.waiting_count(), 1);
///
/// limiter.request_did_finish(&requests[0]);
/// assert_eq!(limiter.active_count(), 2);
/// assert_eq!(limiter.waiting_count(), 0);
/// # limiter.tear_down();
/// ```
pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<LimiterState>,
    signals: Mutex<SignalHub>,
    torn_down: AtomicBool,
    counters: Counters,
    this: Weak<RateLimiter>,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` requests in flight, driven by the
    /// system clock and a thread-based scheduler.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0.
    pub fn new(limit: usize) -> Arc<Self> {
        Self::with_config(RateLimiterConfig::concurrent(limit))
    }

    /// Creates a limiter from `config` with the system clock and scheduler.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid (see
    /// [`RateLimiterConfig::validate`]).
    pub fn with_config(config: RateLimiterConfig) -> Arc<Self> {
        config.validate().expect("Invalid rate limiter configuration");
        Self::from_validated(config, Arc::new(SystemClock), Arc::new(ThreadScheduler::new()))
    }

    /// Creates a limiter with injected time source and scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error message if the configuration is invalid.
    pub fn with_parts(
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>, &'static str> {
        config.validate()?;
        Ok(Self::from_validated(config, clock, scheduler))
    }

    pub(crate) fn from_validated(
        config: RateLimiterConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        debug!(
            "Creating rate limiter (limit: {}, window: {:?})",
            config.limit, config.window
        );
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(LimiterState {
                tracker: CompletionTracker::new(config.limit, config.window),
                queue: WaitQueue::new(),
                recheck: RecheckState::default(),
            }),
            signals: Mutex::new(SignalHub::default()),
            torn_down: AtomicBool::new(false),
            counters: Counters::default(),
            this: this.clone(),
            config,
            clock,
            scheduler,
        })
    }

    /// Returns the configured limit.
    #[inline]
    pub fn rate_limit(&self) -> usize {
        self.config.limit
    }

    /// Returns the configuration this limiter was built with.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Returns `true` if no capacity is left.
    ///
    /// A snapshot only. To act on the answer, use [`lock`](Self::lock).
    pub fn at_rate_limit(&self) -> bool {
        self.lock_state().tracker.at_limit(self.clock.now())
    }

    /// Number of requests started and not yet finished.
    pub fn active_count(&self) -> usize {
        self.lock_state().tracker.active_count()
    }

    /// Number of requests waiting for capacity.
    pub fn waiting_count(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Acquires the limiter lock for an external check-then-act sequence.
    ///
    /// The lock is released when the returned guard is dropped. Do not call
    /// other limiter methods while holding it.
    pub fn lock(&self) -> RateLimitGuard<'_> {
        RateLimitGuard {
            limiter: self,
            now: self.clock.now(),
            state: self.lock_state(),
        }
    }

    /// Queues `handle` and starts it right away if capacity allows.
    ///
    /// Returns `false` without queueing if the handle is already queued or
    /// active, or if the limiter was torn down.
    pub fn register_waiting_request(&self, handle: RequestHandle) -> bool {
        if self.is_torn_down() {
            debug!("Ignoring registration on torn down rate limiter");
            return false;
        }

        handle.attach_rate_limiter(self.this.clone());
        let key = RequestKey::of(&handle);

        {
            let mut state = self.lock_state();
            // Teardown may have run since the check above, or from inside
            // attach_rate_limiter.
            if self.is_torn_down() {
                debug!("Ignoring registration on torn down rate limiter");
                return false;
            }
            if state.queue.contains(key) || state.tracker.is_active(key) {
                drop(state);
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!("Duplicate registration ignored for {}", key);
                return false;
            }
            state.queue.push_back(handle);
            debug!("Registered {} (waiting: {})", key, state.queue.len());
        }

        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        self.run_waiting_requests();
        true
    }

    /// Removes a queued request without starting it.
    ///
    /// Returns `true` if the request was waiting.
    pub fn cancel_waiting_request(&self, handle: &RequestHandle) -> bool {
        let key = RequestKey::of(handle);
        let removed = self.lock_state().queue.remove(key).is_some();
        if removed {
            debug!("Cancelled waiting request {}", key);
        }
        removed
    }

    /// Records that `handle` is starting outside the drain path.
    ///
    /// Shorthand for taking the lock and calling
    /// [`RateLimitGuard::request_will_start`].
    pub fn request_will_start(&self, handle: &RequestHandle) -> bool {
        self.lock().request_will_start(handle)
    }

    /// Releases the capacity held by `handle` and drains the queue.
    ///
    /// Finishing a request that was never counted active is a no-op and
    /// returns `false`.
    pub fn request_did_finish(&self, handle: &RequestHandle) -> bool {
        if self.is_torn_down() {
            return false;
        }

        let key = RequestKey::of(handle);
        let now = self.clock.now();
        let (released, was_at_limit) = {
            let mut state = self.lock_state();
            let was_at_limit = state.tracker.at_limit(now);
            (state.tracker.record_finish(key, now), was_at_limit)
        };

        if !released {
            self.counters.stale_finishes.fetch_add(1, Ordering::Relaxed);
            debug!("Finish reported for untracked request {}", key);
            return false;
        }

        self.counters.finished.fetch_add(1, Ordering::Relaxed);
        debug!("Request {} finished", key);

        self.run_waiting_requests();

        if was_at_limit && !self.at_rate_limit() {
            self.publish(LimitSignal::Lifted);
        }
        true
    }

    /// Applies a start/finish notification.
    pub fn observe(&self, event: CompletionEvent) {
        match event {
            CompletionEvent::WillStart(handle) => {
                self.request_will_start(&handle);
            }
            CompletionEvent::DidFinish(handle) => {
                self.request_did_finish(&handle);
            }
        }
    }

    /// Starts queued requests, in order, until capacity runs out.
    ///
    /// Requests that decline their start are dropped. If requests are still
    /// waiting afterwards, a delayed re-check is scheduled. Returns the
    /// number of requests started.
    pub fn run_waiting_requests(&self) -> usize {
        let now = self.clock.now();
        let mut granted = 0u64;
        let mut declined = 0u64;

        let recheck = {
            let mut state = self.lock_state();
            if self.is_torn_down() {
                return 0;
            }

            let expired = state.tracker.prune(now);
            if expired > 0 {
                debug!("{} windowed slots expired", expired);
            }

            while !state.tracker.at_limit(now) {
                let Some((key, handle)) = state.queue.pop_front() else {
                    break;
                };

                if handle.request_start() {
                    state.tracker.record_start(key, handle, now);
                    granted += 1;
                    debug!("Started {} (active: {})", key, state.tracker.active_count());
                } else {
                    declined += 1;
                    debug!("Request {} declined to start, dropping it", key);
                }
            }

            self.claim_recheck(&mut state, now)
        };

        if granted > 0 {
            self.counters.granted.fetch_add(granted, Ordering::Relaxed);
        }
        if declined > 0 {
            self.counters.declined.fetch_add(declined, Ordering::Relaxed);
        }

        if let Some((generation, delay)) = recheck {
            self.schedule_recheck(generation, delay);
        }

        granted as usize
    }

    /// Reserves the re-check slot if requests are still waiting.
    ///
    /// A pending re-check is replaced only when an earlier one is needed,
    /// e.g. a windowed slot now expires before the fallback interval.
    /// Called with the state lock held; scheduling itself happens after the
    /// lock is released.
    fn claim_recheck(&self, state: &mut LimiterState, now: Instant) -> Option<(u64, Duration)> {
        if state.queue.is_empty() {
            return None;
        }

        let delay = state
            .tracker
            .next_expiry(now)
            .unwrap_or(self.config.recheck_interval);
        let Some(deadline) = now.checked_add(delay) else {
            // A re-check that far out would never fire.
            debug!("Re-check delay {:?} out of range, not scheduling", delay);
            return None;
        };

        if state.recheck.pending {
            if matches!(state.recheck.deadline, Some(existing) if existing <= deadline) {
                return None;
            }
            if let Some(timer) = state.recheck.timer.take() {
                timer.cancel();
            }
        }

        state.recheck.pending = true;
        state.recheck.generation = state.recheck.generation.wrapping_add(1);
        state.recheck.deadline = Some(deadline);
        Some((state.recheck.generation, delay))
    }

    fn schedule_recheck(&self, generation: u64, delay: Duration) {
        let weak = self.this.clone();
        let timer = self.scheduler.after(
            delay,
            Box::new(move || {
                if let Some(limiter) = weak.upgrade() {
                    limiter.on_recheck(generation);
                }
            }),
        );

        let mut state = self.lock_state();
        if self.is_torn_down() {
            drop(state);
            timer.cancel();
            return;
        }
        // A synchronous scheduler may already have fired this generation.
        if !(state.recheck.pending && state.recheck.generation == generation) {
            return;
        }
        if timer.is_cancelled() {
            // Never armed: free the slot so the next drain can retry.
            state.recheck = RecheckState {
                generation,
                ..RecheckState::default()
            };
            drop(state);
            warn!("Scheduler could not arm re-check in {:?}", delay);
            return;
        }
        state.recheck.timer = Some(timer);
        drop(state);
        self.counters.rechecks.fetch_add(1, Ordering::Relaxed);
        debug!("Scheduled re-check in {:?}", delay);
    }

    fn on_recheck(&self, generation: u64) {
        if self.is_torn_down() {
            return;
        }

        {
            let mut state = self.lock_state();
            if state.recheck.generation == generation {
                state.recheck = RecheckState {
                    generation,
                    ..RecheckState::default()
                };
            }
        }

        debug!("Delayed re-check fired");
        self.publish(LimitSignal::MayHaveLifted);
        self.run_waiting_requests();
    }

    /// Subscribes to advisory capacity signals.
    ///
    /// The receiver disconnects when the limiter is torn down.
    pub fn subscribe(&self) -> Receiver<LimitSignal> {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        let rx = signals.subscribe();
        if self.is_torn_down() {
            signals.clear();
        }
        rx
    }

    fn publish(&self, signal: LimitSignal) {
        if self.is_torn_down() {
            return;
        }
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .publish(signal);
    }

    /// Starts a background thread applying [`CompletionEvent`]s sent down
    /// the returned channel.
    ///
    /// The thread exits once every sender is dropped, the limiter is torn
    /// down, or the limiter itself is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread could not be spawned.
    pub fn spawn_event_listener(
        self: &Arc<Self>,
    ) -> io::Result<(thread::JoinHandle<()>, Sender<CompletionEvent>)> {
        let (tx, rx) = mpsc::channel::<CompletionEvent>();
        let weak = Arc::downgrade(self);

        let handle = thread::Builder::new()
            .name("inflight-events".to_string())
            .spawn(move || {
                info!("Started completion event listener");

                loop {
                    let limiter = match rx.recv_timeout(LISTENER_POLL_INTERVAL) {
                        Ok(event) => match weak.upgrade() {
                            Some(limiter) if !limiter.is_torn_down() => {
                                limiter.observe(event);
                                continue;
                            }
                            _ => break,
                        },
                        Err(mpsc::RecvTimeoutError::Timeout) => weak.upgrade(),
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    };

                    match limiter {
                        Some(limiter) if !limiter.is_torn_down() => continue,
                        _ => break,
                    }
                }

                info!("Completion event listener stopping");
            })?;

        Ok((handle, tx))
    }

    /// Disconnects the limiter from everything it observes.
    ///
    /// Cancels the pending re-check, drops waiting requests without starting
    /// them and disconnects signal subscribers. Calling it again is a no-op.
    pub fn tear_down(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            debug!("Rate limiter already torn down");
            return;
        }

        let (timer, dropped) = {
            let mut state = self.lock_state();
            let timer = state.recheck.timer.take();
            state.recheck.pending = false;
            state.recheck.deadline = None;
            state.tracker.clear();
            (timer, state.queue.clear())
        };

        if let Some(timer) = timer {
            timer.cancel();
        }

        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        info!("Rate limiter torn down ({} waiting requests dropped)", dropped);
    }

    /// Returns `true` once [`tear_down`](Self::tear_down) has run.
    #[inline]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Returns a snapshot of the limiter's counters and load.
    pub fn metrics(&self) -> RateLimiterMetrics {
        let now = self.clock.now();
        let (active_requests, occupied, waiting_requests) = {
            let state = self.lock_state();
            (
                state.tracker.active_count(),
                state.tracker.occupied(now),
                state.queue.len(),
            )
        };

        RateLimiterMetrics {
            total_registered: self.counters.registered.load(Ordering::Relaxed),
            total_granted: self.counters.granted.load(Ordering::Relaxed),
            total_declined: self.counters.declined.load(Ordering::Relaxed),
            total_finished: self.counters.finished.load(Ordering::Relaxed),
            stale_finishes: self.counters.stale_finishes.load(Ordering::Relaxed),
            duplicate_registrations: self.counters.duplicates.load(Ordering::Relaxed),
            rechecks_scheduled: self.counters.rechecks.load(Ordering::Relaxed),
            active_requests,
            occupied,
            waiting_requests,
            limit: self.config.limit,
        }
    }

    #[inline]
    fn lock_state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RateLimiter");
        s.field("limit", &self.config.limit)
            .field("window", &self.config.window)
            .field("torn_down", &self.is_torn_down());
        // try_lock: Debug may run while the caller holds the guard.
        if let Ok(state) = self.state.try_lock() {
            s.field("active", &state.tracker.active_count())
                .field("waiting", &state.queue);
        }
        s.finish()
    }
}

/// Holds the limiter lock for an external check-then-act sequence.
///
/// Dropping the guard unlocks.
pub struct RateLimitGuard<'a> {
    limiter: &'a RateLimiter,
    now: Instant,
    state: MutexGuard<'a, LimiterState>,
}

impl RateLimitGuard<'_> {
    /// Returns `true` if no capacity is left.
    pub fn at_rate_limit(&self) -> bool {
        self.state.tracker.at_limit(self.now)
    }

    /// Returns the configured limit.
    pub fn rate_limit(&self) -> usize {
        self.state.tracker.limit()
    }

    /// Number of requests started and not yet finished.
    pub fn active_count(&self) -> usize {
        self.state.tracker.active_count()
    }

    /// Number of requests waiting for capacity.
    pub fn waiting_count(&self) -> usize {
        self.state.queue.len()
    }

    /// Counts `handle` as active.
    ///
    /// Returns `false` if it was already active or the limiter was torn
    /// down. A handle that was waiting in the queue is taken out of it.
    pub fn request_will_start(&mut self, handle: &RequestHandle) -> bool {
        if self.limiter.is_torn_down() {
            return false;
        }

        let key = RequestKey::of(handle);
        if self.state.tracker.at_limit(self.now) {
            warn!("Request {} starting while at rate limit", key);
        }
        if !self.state.tracker.record_start(key, handle.clone(), self.now) {
            debug!("Start for {} already counted", key);
            return false;
        }
        if self.state.queue.remove(key).is_some() {
            debug!("Request {} started on its own, left the wait queue", key);
        }

        self.limiter.counters.granted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Releases the lock.
    pub fn unlock(self) {}
}

impl fmt::Debug for RateLimitGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitGuard")
            .field("active", &self.state.tracker.active_count())
            .field("waiting", &self.state.queue.len())
            .field("at_rate_limit", &self.at_rate_limit())
            .finish()
    }
}
