use std::panic::Location;
use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Instrumented debuggee code may panic while holding a session lock; the
/// session has to keep serving the driver regardless.
#[track_caller]
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, context: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => {
            let loc = Location::caller();
            tracing::error!(
                target: "debugwire",
                context,
                file = loc.file(),
                line = loc.line(),
                column = loc.column(),
                error = %err,
                "session lock poisoned by a panicking thread; continuing with recovered guard"
            );
            mutex.clear_poison();
            err.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_poisoned_lock_recovers() {
        let registry = Arc::new(Mutex::new(vec![63u32]));
        let poisoner = registry.clone();
        let result = std::thread::spawn(move || {
            let mut lines = poisoner.lock().unwrap();
            lines.push(67);
            panic!("instrumented code panicked under the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(registry.is_poisoned());

        assert_eq!(*lock(&registry, "test"), vec![63, 67]);
        assert!(!registry.is_poisoned());
    }
}
