//! Cooperative scheduling for per-stream timers.
//!
//! Every registered [`RecurringRunnable`] reports how long until it next
//! needs to run; one executor thread sleeps for the minimum across all of
//! them, wakes, and runs whichever are due. This replaces a timer thread
//! per stream: a session with dozens of SSRCs shares a single thread, and
//! a runnable whose work becomes ready between wakeups nudges the thread
//! through a [`WakeHandle`] instead of waiting out a stale poll interval.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::error;
use shared::error::Result;

/// How long the executor sleeps when nothing is registered or nothing
/// reports pending work. Bounds worst-case latency for work that becomes
/// ready without an explicit wake.
pub const IDLE_WAIT: Duration = Duration::from_millis(1000);

/// A task that periodically has work to do.
pub trait RecurringRunnable: Send + Sync {
    /// Time until this runnable next needs to run: zero when due now, the
    /// remaining delay when scheduled, or a fallback poll interval when
    /// it has no pending work.
    fn time_until_next_run(&self, now: Instant) -> Duration;

    /// Perform the pending work. Invoked on the executor thread; must not
    /// block.
    fn run(&self, now: Instant);
}

#[derive(Default)]
struct State {
    runnables: Vec<Arc<dyn RecurringRunnable>>,
    wake_pending: bool,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Runnables execute outside this lock, so a poisoned guard can
        // only mean the executor loop itself panicked mid-bookkeeping;
        // the registration table is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap handle for interrupting the executor's sleep.
///
/// Holds only a weak back-reference, so a runnable can own one without
/// creating an ownership cycle with the executor. Waking a dropped
/// executor is a no-op.
#[derive(Clone)]
pub struct WakeHandle {
    shared: Weak<Shared>,
}

impl WakeHandle {
    pub fn wake(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.lock().wake_pending = true;
            shared.cond.notify_one();
        }
    }
}

/// Drives registered [`RecurringRunnable`]s from one dedicated thread.
pub struct RecurringRunnableExecutor {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RecurringRunnableExecutor {
    /// Spawn the executor thread. `name` tags the thread for diagnostics.
    pub fn new(name: &str) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("{name}-recurring"))
            .spawn(move || executor_loop(&loop_shared))?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Register a runnable. Registering the same object twice is a no-op.
    pub fn register(&self, runnable: Arc<dyn RecurringRunnable>) {
        let mut state = self.shared.lock();
        if !state.runnables.iter().any(|r| Arc::ptr_eq(r, &runnable)) {
            state.runnables.push(runnable);
            state.wake_pending = true;
            self.shared.cond.notify_one();
        }
    }

    /// Remove a runnable; it will not run again once this returns.
    /// Returns whether it was registered.
    pub fn deregister(&self, runnable: &Arc<dyn RecurringRunnable>) -> bool {
        let mut state = self.shared.lock();
        let before = state.runnables.len();
        state.runnables.retain(|r| !Arc::ptr_eq(r, runnable));
        let removed = state.runnables.len() != before;
        if removed {
            state.wake_pending = true;
            self.shared.cond.notify_one();
        }
        removed
    }

    /// Interrupt the current sleep and re-evaluate all runnables now.
    pub fn wake(&self) {
        self.shared.lock().wake_pending = true;
        self.shared.cond.notify_one();
    }

    /// A cheap, clonable handle that runnables can keep to signal
    /// "work became ready" without owning the executor.
    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Stop the executor thread and wait for it to exit.
    pub fn close(&self) {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.cond.notify_all();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for RecurringRunnableExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

fn executor_loop(shared: &Shared) {
    loop {
        let snapshot = {
            let state = shared.lock();
            if state.closed {
                return;
            }
            state.runnables.clone()
        };

        let now = Instant::now();
        for runnable in &snapshot {
            if runnable.time_until_next_run(now).is_zero()
                && catch_unwind(AssertUnwindSafe(|| runnable.run(now))).is_err()
            {
                error!("recurring runnable panicked; skipping it for this pass");
            }
        }

        let now = Instant::now();
        let mut wait = IDLE_WAIT;
        for runnable in &snapshot {
            wait = wait.min(runnable.time_until_next_run(now));
        }

        let state = shared.lock();
        if state.closed {
            return;
        }
        if state.wake_pending || wait.is_zero() {
            let mut state = state;
            state.wake_pending = false;
            continue;
        }
        let (mut state, _timed_out) = shared
            .cond
            .wait_timeout(state, wait)
            .unwrap_or_else(PoisonError::into_inner);
        state.wake_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Due once at construction, then idle until `arm` is called again.
    struct OneShot {
        armed: AtomicBool,
        runs: AtomicUsize,
    }

    impl OneShot {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                armed: AtomicBool::new(true),
                runs: AtomicUsize::new(0),
            })
        }

        fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    impl RecurringRunnable for OneShot {
        fn time_until_next_run(&self, _now: Instant) -> Duration {
            if self.armed.load(Ordering::SeqCst) {
                Duration::ZERO
            } else {
                Duration::from_secs(60)
            }
        }

        fn run(&self, _now: Instant) {
            self.armed.store(false, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    #[test]
    fn test_due_runnable_runs_promptly() {
        let executor = RecurringRunnableExecutor::new("test").unwrap();
        let runnable = OneShot::new();
        executor.register(runnable.clone());

        assert!(wait_until(Duration::from_secs(2), || runnable.runs() == 1));
        executor.close();
    }

    #[test]
    fn test_wake_interrupts_idle_sleep() {
        let executor = RecurringRunnableExecutor::new("test").unwrap();
        let runnable = OneShot::new();
        executor.register(runnable.clone());
        assert!(wait_until(Duration::from_secs(2), || runnable.runs() == 1));

        // Now idle with a 60s horizon; arming + waking must not wait it out.
        runnable.arm();
        executor.wake();
        assert!(wait_until(Duration::from_secs(2), || runnable.runs() == 2));
        executor.close();
    }

    #[test]
    fn test_wake_handle_survives_executor_drop() {
        let executor = RecurringRunnableExecutor::new("test").unwrap();
        let handle = executor.wake_handle();
        drop(executor);
        // Must not panic or block.
        handle.wake();
    }

    #[test]
    fn test_deregistered_runnable_never_runs_again() {
        let executor = RecurringRunnableExecutor::new("test").unwrap();
        let runnable = OneShot::new();
        executor.register(runnable.clone());
        assert!(wait_until(Duration::from_secs(2), || runnable.runs() == 1));

        let as_dyn: Arc<dyn RecurringRunnable> = runnable.clone();
        assert!(executor.deregister(&as_dyn));

        runnable.arm();
        executor.wake();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runnable.runs(), 1);
        executor.close();
    }

    #[test]
    fn test_panicking_runnable_does_not_kill_executor() {
        struct Panicker {
            armed: AtomicBool,
        }
        impl RecurringRunnable for Panicker {
            fn time_until_next_run(&self, _now: Instant) -> Duration {
                if self.armed.load(Ordering::SeqCst) {
                    Duration::ZERO
                } else {
                    Duration::from_secs(60)
                }
            }
            fn run(&self, _now: Instant) {
                self.armed.store(false, Ordering::SeqCst);
                panic!("broken runnable");
            }
        }

        let executor = RecurringRunnableExecutor::new("test").unwrap();
        let healthy = OneShot::new();
        executor.register(Arc::new(Panicker {
            armed: AtomicBool::new(true),
        }));
        executor.register(healthy.clone());

        assert!(wait_until(Duration::from_secs(2), || healthy.runs() >= 1));
        executor.close();
    }

    #[test]
    fn test_close_is_idempotent() {
        let executor = RecurringRunnableExecutor::new("test").unwrap();
        executor.close();
        executor.close();
    }
}
