// Traced monitor
//
// A mutex + condvar pair that reports contention and waits through the
// runtime hook, the way a JVM reports monitor events.

use crate::events::StateKind;
use crate::hook::RuntimeHook;
use crate::types::ThreadId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tracing::trace;

#[derive(Debug)]
pub struct TracedMonitor<T> {
    name: String,
    inner: Mutex<T>,
    cond: Condvar,
    hook: RuntimeHook,
    contenders: AtomicUsize,
}

impl<T> TracedMonitor<T> {
    pub fn new(name: impl Into<String>, value: T, hook: RuntimeHook) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(value),
            cond: Condvar::new(),
            hook,
            contenders: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the monitor. Blocking on another owner fires
    /// MonitorContendedEnter before and MonitorContendedEntered after.
    pub fn enter(&self, thread: ThreadId) -> MutexGuard<'_, T> {
        match self.inner.try_lock() {
            Ok(guard) => return guard,
            Err(TryLockError::Poisoned(err)) => return err.into_inner(),
            Err(TryLockError::WouldBlock) => {}
        }

        trace!("Thread {} contending for {}", thread, self.name);
        // Count only after the event is queued, so observers polling
        // `contenders` never run ahead of the event stream
        self.hook
            .state(StateKind::MonitorContendedEnter, thread, &self.payload());
        self.contenders.fetch_add(1, Ordering::SeqCst);

        let guard = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        self.contenders.fetch_sub(1, Ordering::SeqCst);

        // The event is reported while holding the monitor, as the JVM does
        self.hook
            .state(StateKind::MonitorContendedEntered, thread, &self.payload());
        guard
    }

    /// Wait on the monitor's condition; returns the reacquired guard and
    /// whether the wait timed out
    pub fn wait<'a>(
        &'a self,
        guard: MutexGuard<'a, T>,
        thread: ThreadId,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        let mut payload = self.payload();
        payload.push(("timeout", format!("{}", timeout.as_millis())));
        self.hook.state(StateKind::MonitorWait, thread, &payload);

        let (guard, result) = match self.cond.wait_timeout(guard, timeout) {
            Ok(pair) => pair,
            Err(err) => err.into_inner(),
        };
        let timed_out = result.timed_out();

        let mut payload = self.payload();
        payload.push(("timed_out", timed_out.to_string()));
        self.hook.state(StateKind::MonitorWaited, thread, &payload);
        (guard, timed_out)
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Threads currently blocked in `enter`
    pub fn contenders(&self) -> usize {
        self.contenders.load(Ordering::SeqCst)
    }

    fn payload(&self) -> Vec<(&'static str, String)> {
        vec![("monitor", self.name.clone())]
    }
}
