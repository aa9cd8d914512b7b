//! # Time Source and Delayed Callbacks
//!
//! The limiter never reads the wall clock and never sleeps. Everything
//! time-related goes through two seams injected at construction:
//!
//! ```text
//!     ┌─────────────┐   now()          ┌─────────────┐
//!     │ RateLimiter │ ───────────────► │    Clock    │
//!     │             │                  └─────────────┘
//!     │             │   after(d, cb)   ┌─────────────┐
//!     │             │ ───────────────► │  Scheduler  │ ──► TimerHandle
//!     └─────────────┘                  └─────────────┘
//! ```
//!
//! Production code uses [`SystemClock`] and [`ThreadScheduler`]. Tests use
//! [`ManualClock`] and [`ManualScheduler`], where time only moves when the
//! test calls [`ManualScheduler::advance`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A callback run once by a [`Scheduler`].
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Runs a callback once after a delay without blocking the caller.
pub trait Scheduler: Send + Sync {
    /// Schedules `callback` to run once after `delay`.
    ///
    /// The returned handle can cancel the callback before it fires. A
    /// scheduler that cannot arm the callback returns an already-cancelled
    /// handle (see [`TimerHandle::failed`]).
    fn after(&self, delay: Duration, callback: Callback) -> TimerHandle;
}

/// Cancellation handle for a scheduled callback.
///
/// Cancelling after the callback already ran is a no-op.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Creates a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle for a callback that was never armed.
    pub fn failed() -> Self {
        let handle = Self::new();
        handle.cancel();
        handle
    }

    /// Prevents the callback from running if it has not fired yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Scheduler that sleeps on a short-lived background thread per callback.
///
/// The limiter schedules at most one re-check at a time, so the thread count
/// stays at one per limiter with a blocked queue.
#[derive(Debug, Clone, Default)]
pub struct ThreadScheduler {
    thread_name: Option<String>,
}

impl ThreadScheduler {
    /// Creates a scheduler whose threads are named `inflight-recheck`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scheduler with a custom thread name.
    pub fn with_thread_name(name: impl Into<String>) -> Self {
        Self {
            thread_name: Some(name.into()),
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn after(&self, delay: Duration, callback: Callback) -> TimerHandle {
        let handle = TimerHandle::new();
        let timer = handle.clone();
        let name = self
            .thread_name
            .clone()
            .unwrap_or_else(|| "inflight-recheck".to_string());

        let spawned = thread::Builder::new().name(name).spawn(move || {
            thread::sleep(delay);
            if timer.is_cancelled() {
                debug!("Delayed callback cancelled before firing");
                return;
            }
            callback();
        });

        if let Err(err) = spawned {
            warn!("Failed to spawn delayed callback thread: {}", err);
            handle.cancel();
        }

        handle
    }
}

/// Clock that only moves when told to.
///
/// ```rust
/// use inflight::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now() - start, Duration::from_millis(250));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct PendingTask {
    deadline: Instant,
    seq: u64,
    handle: TimerHandle,
    callback: Callback,
}

/// Scheduler driven by a [`ManualClock`].
///
/// Callbacks fire only inside [`advance`](Self::advance) or
/// [`run_due`](Self::run_due), in deadline order, on the calling thread.
///
/// ```rust
/// use inflight::{ManualClock, ManualScheduler, Scheduler};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let scheduler = ManualScheduler::new(Arc::new(ManualClock::new()));
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = fired.clone();
/// scheduler.after(Duration::from_secs(1), Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// scheduler.advance(Duration::from_millis(999));
/// assert!(!fired.load(Ordering::SeqCst));
/// scheduler.advance(Duration::from_millis(1));
/// assert!(fired.load(Ordering::SeqCst));
/// ```
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    tasks: Mutex<Vec<PendingTask>>,
    next_seq: AtomicU64,
}

impl ManualScheduler {
    /// Creates a scheduler reading deadlines from `clock`.
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            tasks: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Returns the clock this scheduler reads.
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Advances the clock and runs every callback that became due.
    ///
    /// Returns the number of callbacks that ran.
    pub fn advance(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.run_due()
    }

    /// Runs every callback whose deadline has passed, without moving time.
    ///
    /// Callbacks scheduled by a running callback also run if already due.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.pop_due() {
            if task.handle.is_cancelled() {
                continue;
            }
            // Lock released: the callback may schedule more work.
            (task.callback)();
            ran += 1;
        }
        ran
    }

    /// Returns the number of scheduled callbacks that are not cancelled.
    pub fn pending(&self) -> usize {
        self.lock_tasks()
            .iter()
            .filter(|task| !task.handle.is_cancelled())
            .count()
    }

    /// Returns the delay until the earliest live callback, if any.
    pub fn next_deadline_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.lock_tasks()
            .iter()
            .filter(|task| !task.handle.is_cancelled())
            .map(|task| task.deadline.saturating_duration_since(now))
            .min()
    }

    fn pop_due(&self) -> Option<PendingTask> {
        let now = self.clock.now();
        let mut tasks = self.lock_tasks();
        let index = tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.deadline <= now)
            .min_by_key(|(_, task)| (task.deadline, task.seq))
            .map(|(index, _)| index)?;
        Some(tasks.swap_remove(index))
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<PendingTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn after(&self, delay: Duration, callback: Callback) -> TimerHandle {
        let handle = TimerHandle::new();
        let Some(deadline) = self.clock.now().checked_add(delay) else {
            // Unreachable deadline: the callback can never become due.
            debug!("Dropping callback scheduled {:?} ahead", delay);
            return handle;
        };
        let task = PendingTask {
            deadline,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            handle: handle.clone(),
            callback,
        };
        self.lock_tasks().push(task);
        handle
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    #[test]
    fn test_manual_scheduler_fires_in_deadline_order() {
        let scheduler = ManualScheduler::new(Arc::new(ManualClock::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, ms) in [("late", 30u64), ("early", 10), ("middle", 20)] {
            let order = order.clone();
            scheduler.after(
                Duration::from_millis(ms),
                Box::new(move || order.lock().unwrap().push(label)),
            );
        }

        assert_eq!(scheduler.pending(), 3);
        assert_eq!(scheduler.advance(Duration::from_millis(25)), 2);
        assert_eq!(*order.lock().unwrap(), vec!["early", "middle"]);
        assert_eq!(scheduler.advance(Duration::from_millis(5)), 1);
        assert_eq!(*order.lock().unwrap(), vec!["early", "middle", "late"]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_cancelled_callback_never_runs() {
        let scheduler = ManualScheduler::new(Arc::new(ManualClock::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();

        let handle = scheduler.after(
            Duration::from_millis(5),
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.cancel();

        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(1)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_next_deadline_in() {
        let scheduler = ManualScheduler::new(Arc::new(ManualClock::new()));
        assert_eq!(scheduler.next_deadline_in(), None);

        scheduler.after(Duration::from_millis(40), Box::new(|| {}));
        scheduler.clock().advance(Duration::from_millis(15));
        assert_eq!(scheduler.next_deadline_in(), Some(Duration::from_millis(25)));
    }

    #[test]
    fn test_thread_scheduler_runs_callback() {
        let scheduler = ThreadScheduler::with_thread_name("inflight-test");
        let (tx, rx) = mpsc::channel();

        scheduler.after(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(thread::current().name().map(str::to_owned));
            }),
        );

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("inflight-test"));
    }

    #[test]
    fn test_thread_scheduler_cancel() {
        let scheduler = ThreadScheduler::new();
        let (tx, rx) = mpsc::channel::<()>();

        let handle = scheduler.after(
            Duration::from_millis(50),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        handle.cancel();

        // Sender is dropped without sending once the cancelled thread exits.
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_unreachable_deadline_is_dropped() {
        let scheduler = ManualScheduler::new(Arc::new(ManualClock::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();

        let handle = scheduler.after(
            Duration::MAX,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(!handle.is_cancelled());
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(3600)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_handle_is_cancelled() {
        assert!(TimerHandle::failed().is_cancelled());
        assert!(!TimerHandle::new().is_cancelled());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
