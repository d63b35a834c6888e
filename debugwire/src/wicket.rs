// Wicket: a gate that holds threads until it is unlocked
//
// Used to sequence debuggee workers against the driver: a worker signals
// "about to block on X" and the other side proceeds only after that signal.

use crate::poison;
use crate::protocol::{WireError, WireResult};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WicketState {
    Locked,
    /// Some but not all of the required unlocks have happened
    Unlocking,
    Unlocked,
}

#[derive(Debug)]
struct Gate {
    initial: usize,
    count: usize,
    waiters: usize,
    // Bumped every time the count reaches zero, so a waiter woken by an
    // unlock is released even if the wicket is reset before it runs.
    generation: u64,
}

#[derive(Debug)]
pub struct Wicket {
    gate: Mutex<Gate>,
    cond: Condvar,
}

impl Default for Wicket {
    fn default() -> Self {
        Self::new()
    }
}

impl Wicket {
    /// A locked wicket released by a single `unlock()`
    pub fn new() -> Self {
        Self::with_count(1)
    }

    /// A wicket that needs `count` unlocks before it opens
    pub fn with_count(count: usize) -> Self {
        Self {
            gate: Mutex::new(Gate {
                initial: count,
                count,
                waiters: 0,
                generation: 0,
            }),
            cond: Condvar::new(),
        }
    }

    /// Block while locked. Returns false if `timeout` elapsed first.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        // A deadline past what Instant can hold means no deadline
        let deadline = Instant::now().checked_add(timeout);
        let mut gate = poison::lock(&self.gate, "wicket.wait_for");

        if gate.count == 0 {
            return true;
        }

        let generation = gate.generation;
        gate.waiters += 1;

        let released = loop {
            if gate.count == 0 || gate.generation != generation {
                break true;
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    deadline - now
                }
                None => timeout,
            };
            gate = match self.cond.wait_timeout(gate, remaining) {
                Ok((guard, _)) => guard,
                Err(err) => err.into_inner().0,
            };
        };

        gate.waiters -= 1;
        released
    }

    /// Like `wait_for`, failing with `TimedOut` instead of returning false
    pub fn wait(&self, timeout: Duration) -> WireResult<()> {
        let start = Instant::now();
        if self.wait_for(timeout) {
            Ok(())
        } else {
            Err(WireError::timed_out("wicket", start.elapsed()))
        }
    }

    /// Count down once; the last unlock wakes every waiter
    pub fn unlock(&self) {
        let mut gate = poison::lock(&self.gate, "wicket.unlock");
        if gate.count == 0 {
            return;
        }
        gate.count -= 1;
        if gate.count == 0 {
            gate.generation += 1;
            self.cond.notify_all();
        }
    }

    /// Open the wicket regardless of the remaining count
    pub fn unlock_all(&self) {
        let mut gate = poison::lock(&self.gate, "wicket.unlock_all");
        if gate.count > 0 {
            gate.count = 0;
            gate.generation += 1;
            self.cond.notify_all();
        }
    }

    /// Lock again with the original count, for reuse in loops
    pub fn reset(&self) {
        let mut gate = poison::lock(&self.gate, "wicket.reset");
        gate.count = gate.initial;
    }

    pub fn state(&self) -> WicketState {
        let gate = poison::lock(&self.gate, "wicket.state");
        if gate.count == 0 {
            WicketState::Unlocked
        } else if gate.count < gate.initial {
            WicketState::Unlocking
        } else {
            WicketState::Locked
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == WicketState::Unlocked
    }

    /// Number of threads currently blocked in `wait_for`
    pub fn waiters(&self) -> usize {
        poison::lock(&self.gate, "wicket.waiters").waiters
    }
}

/// Poll `probe` every `interval`, at most `attempts` times plus a final check.
/// Blocks the calling thread.
pub fn wait_until(interval: Duration, attempts: u32, mut probe: impl FnMut() -> bool) -> bool {
    for _ in 0..attempts {
        if probe() {
            return true;
        }
        std::thread::sleep(interval);
    }
    probe()
}
