//! Per-store polling primitive.
//!
//! Idle → Active → Idle lifecycle around a fixed-interval tick loop, with a
//! single-flight discipline: while a cycle is in flight, refresh requests set
//! a flag that is consumed immediately after the cycle settles, so a burst of
//! `update()` calls costs exactly one trailing fetch. `deactivate` abandons
//! the scheduled timer synchronously; a cycle already in flight finishes but
//! its result is discarded by the store's epoch check.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

struct PollerInner {
    interval: Duration,
    active: AtomicBool,
    refresh_requested: AtomicBool,
    force_requested: AtomicBool,
    refresh: Notify,
    shutdown: Notify,
}

pub struct Poller {
    inner: Arc<PollerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                interval,
                active: AtomicBool::new(false),
                refresh_requested: AtomicBool::new(false),
                force_requested: AtomicBool::new(false),
                refresh: Notify::new(),
                shutdown: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Start the tick loop. Idempotent: a second call while active is a
    /// no-op. The first cycle runs immediately, then every `interval`.
    pub fn activate<F, Fut>(&self, cycle: F)
    where
        F: Fn(bool) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let handle = tokio::spawn(run_loop(inner, cycle));
        *self.task.lock() = Some(handle);
        debug!("poller activated");
    }

    /// Stop the loop. The scheduled timer is abandoned right away; an
    /// in-flight cycle completes on its own and its result is dropped by the
    /// caller's epoch check.
    pub fn deactivate(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.refresh_requested.store(false, Ordering::SeqCst);
        self.inner.force_requested.store(false, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        self.task.lock().take();
        debug!("poller deactivated");
    }

    /// Ask for a refresh now. Coalesces into the in-flight cycle if there is
    /// one; the request is never silently dropped.
    pub fn request_refresh(&self, force: bool) {
        if force {
            self.inner.force_requested.store(true, Ordering::SeqCst);
        }
        self.inner.refresh_requested.store(true, Ordering::SeqCst);
        self.inner.refresh.notify_one();
    }
}

async fn run_loop<F, Fut>(inner: Arc<PollerInner>, cycle: F)
where
    F: Fn(bool) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut ticker = tokio::time::interval(inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = inner.refresh.notified() => {
                // A request that landed mid-cycle leaves a stored permit
                // behind after the trailing cycle already served it; a
                // wake-up with no pending request is that permit, not work.
                if !inner.refresh_requested.load(Ordering::SeqCst) {
                    continue;
                }
            }
            _ = inner.shutdown.notified() => break,
        }
        if !inner.active.load(Ordering::SeqCst) {
            break;
        }

        // Run the cycle, then at most one trailing cycle for refreshes that
        // arrived while it was in flight.
        loop {
            let force = inner.force_requested.swap(false, Ordering::SeqCst);
            inner.refresh_requested.store(false, Ordering::SeqCst);
            cycle(force).await;
            if !inner.active.load(Ordering::SeqCst) {
                return;
            }
            if !inner.refresh_requested.load(Ordering::SeqCst) {
                break;
            }
        }
    }
    debug!("poll loop stopped");
}
