//! Basic usage example for the inflight crate.

use inflight::{
    LimitSignal, RateLimitedRequest, RateLimiter, RateLimiterBuilder, RateLimiterConfig,
    RateLimiterRegistry, RequestHandle,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    println!("=== Basic Admission Control Example ===\n");

    // Example 1: Concurrency cap with a wait queue
    concurrency_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Windowed limit
    window_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Check-then-act under the lock
    lock_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: One limiter per host
    registry_example();
}

/// Simulated download that "completes" on a worker thread.
struct Download {
    name: String,
    duration: Duration,
    started: AtomicBool,
    limiter: Mutex<Weak<RateLimiter>>,
    this: Weak<Download>,
}

impl Download {
    fn new(name: impl Into<String>, duration: Duration) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: name.into(),
            duration,
            started: AtomicBool::new(false),
            limiter: Mutex::new(Weak::new()),
            this: this.clone(),
        })
    }
}

impl RateLimitedRequest for Download {
    fn attach_rate_limiter(&self, limiter: Weak<RateLimiter>) {
        *self.limiter.lock().unwrap() = limiter;
    }

    fn request_start(&self) -> bool {
        self.started.store(true, Ordering::SeqCst);
        println!("   ▶ {} started", self.name);

        // Must not call back into the limiter from here: hand off to a thread.
        let limiter = self.limiter.lock().unwrap().clone();
        let this = self.this.clone();
        let duration = self.duration;
        thread::spawn(move || {
            thread::sleep(duration);
            if let (Some(limiter), Some(this)) = (limiter.upgrade(), this.upgrade()) {
                println!("   ■ {} finished", this.name);
                let handle: RequestHandle = this;
                limiter.request_did_finish(&handle);
            }
        });
        true
    }
}

fn wait_for(downloads: &[Arc<Download>]) {
    while !downloads.iter().all(|d| d.started.load(Ordering::SeqCst)) {
        thread::sleep(Duration::from_millis(10));
    }
}

fn concurrency_example() {
    println!("1. Concurrency Cap:");

    let limiter = RateLimiter::new(2);
    let signals = limiter.subscribe();
    println!("   Created limiter allowing 2 requests in flight");

    let downloads: Vec<_> = (1..=5)
        .map(|i| Download::new(format!("file-{}", i), Duration::from_millis(100)))
        .collect();

    for download in &downloads {
        limiter.register_waiting_request(download.clone());
    }
    println!(
        "   Active: {}, waiting: {}",
        limiter.active_count(),
        limiter.waiting_count()
    );

    wait_for(&downloads);
    thread::sleep(Duration::from_millis(150));

    let lifted = signals
        .try_iter()
        .filter(|s| *s == LimitSignal::Lifted)
        .count();
    println!("   Limit lifted {} time(s)", lifted);
    println!("{}", limiter.metrics().summary());
    limiter.tear_down();
}

fn window_example() {
    println!("2. Windowed Limit:");

    let limiter = RateLimiterBuilder::new()
        .limit(2)
        .window(Duration::from_millis(500))
        .build();
    println!("   At most 2 starts per 500ms");

    let begin = Instant::now();
    let downloads: Vec<_> = (1..=4)
        .map(|i| Download::new(format!("chunk-{}", i), Duration::from_millis(10)))
        .collect();

    for download in &downloads {
        limiter.register_waiting_request(download.clone());
    }

    wait_for(&downloads);
    println!("   All chunks started after {:?}", begin.elapsed());
    limiter.tear_down();
}

fn lock_example() {
    println!("3. Check-Then-Act:");

    let limiter = RateLimiter::new(1);
    let eager: RequestHandle = Download::new("eager", Duration::from_millis(10));
    // Registration normally does this; starting directly skips it.
    eager.attach_rate_limiter(Arc::downgrade(&limiter));

    let mut guard = limiter.lock();
    if guard.at_rate_limit() {
        println!("   At limit, registering instead");
        guard.unlock();
        limiter.register_waiting_request(eager);
    } else {
        guard.request_will_start(&eager);
        guard.unlock();
        eager.request_start();
        println!("   Started outside the queue");
    }

    thread::sleep(Duration::from_millis(50));
    println!("   Active after finish: {}", limiter.active_count());
    limiter.tear_down();
}

fn registry_example() {
    println!("4. Per-Host Limiters:");

    let registry = RateLimiterRegistry::new(RateLimiterConfig::concurrent(1));

    for host in ["api.example.com", "cdn.example.com", "api.example.com"] {
        let limiter = registry.get_or_create(host);
        limiter.register_waiting_request(Download::new(
            format!("{}/index", host),
            Duration::from_millis(20),
        ));
    }

    println!("{}", registry.stats().summary());
    thread::sleep(Duration::from_millis(100));
    registry.tear_down_all();
}
