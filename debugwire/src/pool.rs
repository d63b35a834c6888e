// Usage pool
//
// Byte accounting for a simulated memory pool with a usage threshold and
// collection events, mirroring a JVM memory pool MXBean.

use crate::events::StateKind;
use crate::hook::RuntimeHook;
use crate::types::ThreadId;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug)]
pub struct UsagePool {
    name: String,
    used: AtomicU64,
    /// Zero disables threshold checking
    threshold: AtomicU64,
    threshold_count: AtomicU64,
    hook: RuntimeHook,
}

impl UsagePool {
    pub fn new(name: impl Into<String>, hook: RuntimeHook) -> Self {
        Self {
            name: name.into(),
            used: AtomicU64::new(0),
            threshold: AtomicU64::new(0),
            threshold_count: AtomicU64::new(0),
            hook,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn usage_threshold(&self) -> u64 {
        self.threshold.load(Ordering::SeqCst)
    }

    pub fn set_usage_threshold(&self, bytes: u64) {
        debug!("Pool {} threshold set to {}", self.name, bytes);
        self.threshold.store(bytes, Ordering::SeqCst);
    }

    pub fn is_usage_threshold_exceeded(&self) -> bool {
        let threshold = self.usage_threshold();
        threshold > 0 && self.used() >= threshold
    }

    /// How many times usage crossed the threshold upward
    pub fn threshold_count(&self) -> u64 {
        self.threshold_count.load(Ordering::SeqCst)
    }

    /// Account `bytes` as used; crossing the threshold fires UsageThresholdExceeded
    pub fn allocate(&self, bytes: u64, thread: ThreadId) -> u64 {
        let result = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_add(bytes))
            });
        let before = match result {
            Ok(before) | Err(before) => before,
        };
        let after = before.saturating_add(bytes);

        let threshold = self.usage_threshold();
        if threshold > 0 && before < threshold && after >= threshold {
            let count = self.threshold_count.fetch_add(1, Ordering::SeqCst) + 1;
            self.hook.state(
                StateKind::UsageThresholdExceeded,
                thread,
                &[
                    ("pool", self.name.clone()),
                    ("used", after.to_string()),
                    ("threshold", threshold.to_string()),
                    ("count", count.to_string()),
                ],
            );
        }
        after
    }

    pub fn release(&self, bytes: u64) -> u64 {
        let result = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            });
        let before = match result {
            Ok(before) | Err(before) => before,
        };
        before.saturating_sub(bytes)
    }

    /// Free everything, bracketed by GcStart and GcFinish; returns bytes freed
    pub fn collect(&self, thread: ThreadId) -> u64 {
        self.hook
            .state(StateKind::GcStart, thread, &[("pool", self.name.clone())]);
        let freed = self.used.swap(0, Ordering::SeqCst);
        self.hook.state(
            StateKind::GcFinish,
            thread,
            &[("pool", self.name.clone()), ("freed", freed.to_string())],
        );
        freed
    }
}

/// Evaluate an eventually-true condition twice before trusting a negative.
/// Usage counters are updated asynchronously on some platforms.
pub fn recheck(mut probe: impl FnMut() -> bool) -> bool {
    probe() || probe()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WireConfig;
    use crate::events::EventKind;
    use crate::protocol::Frame;
    use crate::session::DebugSession;
    use crate::types::SuspendPolicy;

    #[test]
    fn test_threshold_crossing_fires_once() {
        let session = DebugSession::new(WireConfig::default());
        let mut rx = session.take_outbound().unwrap();
        session
            .registry()
            .subscribe(StateKind::UsageThresholdExceeded, SuspendPolicy::None);

        let pool = UsagePool::new("heap", session.hook());
        pool.allocate(100, 1);
        assert!(!pool.is_usage_threshold_exceeded());

        pool.set_usage_threshold(pool.used() + 1);
        pool.allocate(10, 1);
        pool.allocate(10, 1);
        assert!(pool.is_usage_threshold_exceeded());
        assert_eq!(pool.threshold_count(), 1);

        let Frame::Event(event) = rx.try_recv().unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.kind, EventKind::State(StateKind::UsageThresholdExceeded));
        assert_eq!(event.get("used"), Some("110"));
        assert_eq!(event.get("threshold"), Some("101"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disabled_threshold() {
        let session = DebugSession::new(WireConfig::default());
        let pool = UsagePool::new("heap", session.hook());
        pool.allocate(1 << 20, 1);
        assert!(!pool.is_usage_threshold_exceeded());
        assert_eq!(pool.threshold_count(), 0);
    }

    #[test]
    fn test_release_and_collect() {
        let session = DebugSession::new(WireConfig::default());
        session.registry().subscribe(StateKind::GcStart, SuspendPolicy::None);
        session.registry().subscribe(StateKind::GcFinish, SuspendPolicy::None);
        let pool = UsagePool::new("heap", session.hook());

        pool.allocate(64, 1);
        assert_eq!(pool.release(16), 48);
        assert_eq!(pool.release(1000), 0);

        pool.allocate(32, 1);
        assert_eq!(pool.collect(1), 32);
        assert_eq!(pool.used(), 0);
        assert_eq!(session.events_emitted(), 2);
    }

    #[test]
    fn test_allocate_saturates() {
        let session = DebugSession::new(WireConfig::default());
        let pool = UsagePool::new("heap", session.hook());
        pool.set_usage_threshold(u64::MAX);

        pool.allocate(u64::MAX - 1, 1);
        assert!(!pool.is_usage_threshold_exceeded());
        assert_eq!(pool.allocate(10, 1), u64::MAX);
        assert_eq!(pool.used(), u64::MAX);
        assert!(pool.is_usage_threshold_exceeded());
        assert_eq!(pool.threshold_count(), 1);
    }

    #[test]
    fn test_recheck_retries_once() {
        let mut calls = 0;
        assert!(recheck(|| {
            calls += 1;
            calls == 2
        }));
        assert_eq!(calls, 2);

        let mut calls = 0;
        assert!(!recheck(|| {
            calls += 1;
            false
        }));
        assert_eq!(calls, 2);
    }
}
